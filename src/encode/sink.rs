use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::core::{CanvasSpec, FrameRate};
use crate::error::{LapseError, LapseResult};

/// Configuration handed to a [`FrameSink`] when an encode session starts.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Canvas geometry and pixel format of every incoming frame.
    pub canvas: CanvasSpec,
    /// Playback rate of the output.
    pub frame_rate: FrameRate,
    /// Container file the sink writes.
    pub destination: PathBuf,
}

/// Sink contract for consuming composited frames in presentation order.
///
/// Ordering contract: `write_frame` is called with strictly increasing
/// presentation times within one session, and only between a successful
/// `begin` and a single terminal `finish` or `discard`.
pub trait FrameSink: Send {
    /// Called once before any frames are written.
    fn begin(&mut self, cfg: SinkConfig) -> LapseResult<()>;
    /// Consume one frame of exactly `cfg.canvas.frame_bytes()` bytes.
    fn write_frame(&mut self, pts: Duration, frame: &[u8]) -> LapseResult<()>;
    /// Flush and close the container.
    fn finish(&mut self) -> LapseResult<()>;
    /// Drop all partial output; must not leave a usable artifact behind.
    fn discard(&mut self);
}

#[derive(Debug, Default)]
struct MemoryState {
    cfg: Option<SinkConfig>,
    frames: Vec<(Duration, Vec<u8>)>,
    finished: bool,
    discarded: bool,
}

/// In-memory sink for tests and debugging.
///
/// Records every frame plus the terminal call. A [`MemoryTap`] taken before
/// the sink moves into a session allows inspection afterwards.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    fail_after_frames: Option<usize>,
}

impl MemorySink {
    /// Create a sink that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink whose `write_frame` fails once `frames` frames were
    /// accepted, to exercise encoder-failure paths.
    pub fn failing_after(frames: usize) -> Self {
        Self {
            state: Arc::default(),
            fail_after_frames: Some(frames),
        }
    }

    /// Handle for inspecting recorded state after the sink moved away.
    pub fn tap(&self) -> MemoryTap {
        MemoryTap {
            state: Arc::clone(&self.state),
        }
    }
}

impl FrameSink for MemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> LapseResult<()> {
        let mut state = lock(&self.state);
        state.cfg = Some(cfg);
        state.frames.clear();
        state.finished = false;
        state.discarded = false;
        Ok(())
    }

    fn write_frame(&mut self, pts: Duration, frame: &[u8]) -> LapseResult<()> {
        let mut state = lock(&self.state);
        if let Some(limit) = self.fail_after_frames
            && state.frames.len() >= limit
        {
            return Err(LapseError::encode("memory sink write limit reached"));
        }
        state.frames.push((pts, frame.to_vec()));
        Ok(())
    }

    fn finish(&mut self) -> LapseResult<()> {
        lock(&self.state).finished = true;
        Ok(())
    }

    fn discard(&mut self) {
        lock(&self.state).discarded = true;
    }
}

/// Read-only view into a [`MemorySink`]'s recorded state.
#[derive(Debug, Clone)]
pub struct MemoryTap {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTap {
    /// Configuration captured by `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        lock(&self.state).cfg.clone()
    }

    /// Number of frames written so far.
    pub fn frame_count(&self) -> usize {
        lock(&self.state).frames.len()
    }

    /// Presentation times in write order.
    pub fn presentation_times(&self) -> Vec<Duration> {
        lock(&self.state).frames.iter().map(|(pts, _)| *pts).collect()
    }

    /// Copies of the recorded frames in write order.
    pub fn frames(&self) -> Vec<(Duration, Vec<u8>)> {
        lock(&self.state).frames.clone()
    }

    /// Return `true` once `finish` ran.
    pub fn finished(&self) -> bool {
        lock(&self.state).finished
    }

    /// Return `true` once `discard` ran.
    pub fn discarded(&self) -> bool {
        lock(&self.state).discarded
    }
}

fn lock(state: &Mutex<MemoryState>) -> std::sync::MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
