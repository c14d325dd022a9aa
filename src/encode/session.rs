//! Encode session lifecycle around a [`FrameSink`].
//!
//! The session owns a writer thread that drains a single-slot frame queue, so
//! the caller can compose the next frame while the previous one is written.
//! Frames are accepted only when the slot is free and presentation times are
//! strictly increasing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::{CanvasSpec, FrameRate};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::error::{LapseError, LapseResult};
use crate::pool::FrameBuffer;

/// Lifecycle of an encode session.
///
/// A session returned by [`EncodeSession::start`] is already `Writing`; `Idle`
/// describes a session that has not been started yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Accepting frames.
    Writing,
    /// Finished and finalized successfully.
    Completed,
    /// Terminated by an error; no output file remains.
    Failed,
    /// Aborted before completion; no output file remains.
    Cancelled,
}

/// Counters reported by a successful [`EncodeSession::finish`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Frames handed to the sink.
    pub frames_appended: u64,
}

/// A canvas-conformant pixel buffer paired with its presentation time.
#[derive(Debug)]
pub struct CompositedFrame {
    buffer: FrameBuffer,
    pts: Duration,
}

impl CompositedFrame {
    /// Pair a filled buffer with its presentation time.
    pub fn new(buffer: FrameBuffer, pts: Duration) -> Self {
        Self { buffer, pts }
    }

    /// Presentation time within the output track.
    pub fn pts(&self) -> Duration {
        self.pts
    }

    /// The frame's pixels.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }
}

struct QueuedFrame {
    pts: Duration,
    buffer: FrameBuffer,
}

/// Queue state shared between the session owner and the writer thread.
#[derive(Default)]
struct Slot {
    queued: Option<QueuedFrame>,
    /// The writer holds a frame it has taken out of `queued`.
    writing: bool,
    /// No more frames will be queued.
    closed: bool,
    /// Discard the output instead of finalizing it.
    abort: bool,
    /// First writer-side failure; terminal for the session.
    error: Option<String>,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One video-file write from `start` to a single terminal state.
///
/// The destination is replaced, never appended to: any pre-existing file is
/// removed in `start`, and `finish`/`abort` remove whatever was written when
/// the session does not complete.
pub struct EncodeSession {
    shared: Arc<Shared>,
    writer: Option<JoinHandle<LapseResult<()>>>,
    state: SessionState,
    destination: PathBuf,
    last_pts: Option<Duration>,
    frames_appended: u64,
}

impl EncodeSession {
    /// Opens the sink and spawns the writer thread.
    ///
    /// Fails with a writer-start error when the destination cannot be
    /// replaced or the sink cannot open it.
    pub fn start(
        mut sink: Box<dyn FrameSink>,
        destination: &Path,
        canvas: CanvasSpec,
        frame_duration: Duration,
    ) -> LapseResult<Self> {
        canvas.validate()?;
        let frame_rate = FrameRate::from_frame_duration(frame_duration)?;

        if destination.exists() {
            std::fs::remove_file(destination).map_err(|e| {
                LapseError::writer_start(format!(
                    "could not replace existing file '{}': {e}",
                    destination.display()
                ))
            })?;
        }

        sink.begin(SinkConfig {
            canvas,
            frame_rate,
            destination: destination.to_path_buf(),
        })?;

        let shared = Arc::new(Shared::default());
        let writer_shared = Arc::clone(&shared);
        let writer = std::thread::spawn(move || writer_loop(&writer_shared, sink.as_mut()));

        tracing::debug!(destination = %destination.display(), "encode session started");
        Ok(Self {
            shared,
            writer: Some(writer),
            state: SessionState::Writing,
            destination: destination.to_path_buf(),
            last_pts: None,
            frames_appended: 0,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Path of the output file.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Frames accepted so far.
    pub fn frames_appended(&self) -> u64 {
        self.frames_appended
    }

    /// True when `append` would be accepted right now. Never blocks.
    pub fn is_ready_for_next_frame(&self) -> bool {
        if self.state != SessionState::Writing {
            return false;
        }
        let slot = self.shared.lock();
        slot.queued.is_none() && !slot.writing && slot.error.is_none()
    }

    /// Blocks until the writer can take another frame.
    ///
    /// Returns the writer's failure if one occurred in the meantime.
    pub fn wait_until_ready(&self) -> LapseResult<()> {
        if self.state != SessionState::Writing {
            return Err(LapseError::append_order(format!(
                "session is {:?}, not writing",
                self.state
            )));
        }
        let mut slot = self.shared.lock();
        loop {
            if let Some(msg) = &slot.error {
                return Err(LapseError::encode(msg.clone()));
            }
            if slot.queued.is_none() && !slot.writing {
                return Ok(());
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Queues one frame for the writer.
    ///
    /// The caller must have observed readiness, and presentation times must be
    /// strictly increasing. Violations are programming errors in the caller
    /// and return an append-order error; the frame's buffer is released either
    /// way.
    pub fn append(&mut self, frame: CompositedFrame) -> LapseResult<()> {
        if self.state != SessionState::Writing {
            return Err(LapseError::append_order(format!(
                "append on a session that is {:?}",
                self.state
            )));
        }
        if let Some(last) = self.last_pts
            && frame.pts <= last
        {
            return Err(LapseError::append_order(format!(
                "presentation time {:?} is not after {:?}",
                frame.pts, last
            )));
        }

        let mut slot = self.shared.lock();
        if let Some(msg) = &slot.error {
            return Err(LapseError::encode(msg.clone()));
        }
        if slot.queued.is_some() || slot.writing {
            debug_assert!(false, "append called while the writer was busy");
            return Err(LapseError::append_order(
                "append called while the writer was busy",
            ));
        }

        self.last_pts = Some(frame.pts);
        self.frames_appended += 1;
        slot.queued = Some(QueuedFrame {
            pts: frame.pts,
            buffer: frame.buffer,
        });
        self.shared.ready.notify_all();
        Ok(())
    }

    /// Drains the queue, finalizes the sink, and reports the result.
    ///
    /// Finishing with zero appended frames is an error and leaves no file, as
    /// does any writer failure.
    pub fn finish(&mut self) -> LapseResult<EncodeStats> {
        if self.state != SessionState::Writing {
            return Err(LapseError::append_order(format!(
                "finish on a session that is {:?}",
                self.state
            )));
        }

        let no_frames = self.frames_appended == 0;
        {
            let mut slot = self.shared.lock();
            slot.closed = true;
            if no_frames {
                // Nothing to finalize; have the writer discard instead of
                // producing an empty container.
                slot.abort = true;
            }
            self.shared.ready.notify_all();
        }

        let joined = self.join_writer();
        let outcome = if no_frames {
            joined.and(Err(LapseError::encode(
                "no frames were appended; refusing to write an empty video",
            )))
        } else {
            joined.map(|()| EncodeStats {
                frames_appended: self.frames_appended,
            })
        };

        match &outcome {
            Ok(stats) => {
                self.state = SessionState::Completed;
                tracing::debug!(
                    frames = stats.frames_appended,
                    destination = %self.destination.display(),
                    "encode session completed"
                );
            }
            Err(e) => {
                self.state = SessionState::Failed;
                remove_output(&self.destination);
                tracing::warn!(error = %e, "encode session failed");
            }
        }
        outcome
    }

    /// Stops the writer, discards the sink's output, and removes any partial
    /// file. Safe to call in any state.
    pub fn abort(&mut self) {
        if self.state != SessionState::Writing {
            return;
        }
        let had_error = {
            let mut slot = self.shared.lock();
            slot.closed = true;
            slot.abort = true;
            slot.queued = None;
            self.shared.ready.notify_all();
            slot.error.is_some()
        };
        let joined = self.join_writer();
        remove_output(&self.destination);
        self.state = if had_error || joined.is_err() {
            SessionState::Failed
        } else {
            SessionState::Cancelled
        };
        tracing::debug!(
            state = ?self.state,
            destination = %self.destination.display(),
            "encode session aborted"
        );
    }

    fn join_writer(&mut self) -> LapseResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        match writer.join() {
            Ok(result) => result,
            Err(_) => Err(LapseError::encode("encode writer thread panicked")),
        }
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if self.state == SessionState::Writing {
            self.abort();
        }
    }
}

/// Writer thread: drain the slot in order, then finalize or discard.
fn writer_loop(shared: &Shared, sink: &mut dyn FrameSink) -> LapseResult<()> {
    let mut write_error: Option<LapseError> = None;
    loop {
        let next = {
            let mut slot = shared.lock();
            loop {
                if let Some(frame) = slot.queued.take() {
                    slot.writing = true;
                    break Some(frame);
                }
                if slot.closed {
                    break None;
                }
                slot = shared
                    .ready
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(frame) = next else {
            break;
        };

        let result = sink.write_frame(frame.pts, frame.buffer.as_slice());
        // Release the buffer back to its pool before signaling readiness.
        drop(frame);

        let mut slot = shared.lock();
        slot.writing = false;
        if let Err(e) = result {
            slot.error = Some(e.to_string());
            shared.ready.notify_all();
            write_error = Some(e);
            break;
        }
        shared.ready.notify_all();
    }

    let abort = {
        let slot = shared.lock();
        slot.abort
    };
    if write_error.is_some() || abort {
        sink.discard();
        match write_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    } else {
        sink.finish()
    }
}

fn remove_output(path: &Path) {
    if path.exists() && std::fs::remove_file(path).is_err() {
        tracing::warn!(path = %path.display(), "could not remove partial output file");
    }
}
