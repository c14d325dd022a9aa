//! Export orchestration: one frame group in, one MP4 (or one error) out.
//!
//! `export` wires the compositor, buffer pool, feeder, and encode session
//! together and maps every run to exactly one terminal [`ExportOutcome`].

use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::FrameGroup;
use crate::compose::Compositor;
use crate::core::{CancelToken, CanvasSpec};
use crate::encode::{EncodeSession, FfmpegSink, FrameSink};
use crate::error::{LapseError, LapseResult};
use crate::feed::{FeedInterrupt, FrameErrorPolicy, FrameFeeder, InflightGate};
use crate::overlay::TimestampStyle;
use crate::pool::{FrameBufferPool, FramePoolStats};

/// One export job: which stills, where to, and at what cadence.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Stills to render, in any order; the feeder sorts by timestamp.
    pub frames: FrameGroup,
    /// Output file path. An existing file there is replaced.
    pub destination: PathBuf,
    /// Burn the capture timestamp into the top-right corner.
    pub show_timestamp: bool,
    /// How long each still is shown.
    pub frame_duration: Duration,
}

/// Tunables that rarely change between jobs.
#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    /// Output canvas; defaults to 1920x1080 RGBA.
    pub canvas: CanvasSpec,
    /// What to do when a single still fails to compose.
    pub on_frame_error: FrameErrorPolicy,
    /// Appearance of the burned-in timestamp.
    pub timestamp: TimestampStyle,
}

/// Advisory progress, reported after each processed still.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportProgress {
    /// Stills processed so far (appended or skipped).
    pub frames_done: u64,
    /// Stills in the job.
    pub frames_total: u64,
}

/// What a completed export produced.
#[derive(Clone, Debug)]
pub struct ExportReport {
    /// Path of the written file.
    pub destination: PathBuf,
    /// Frames in the video track.
    pub frames_appended: u64,
    /// Stills dropped under [`FrameErrorPolicy::Skip`].
    pub frames_skipped: u64,
    /// Track length: appended frames times the frame duration.
    pub video_duration: Duration,
    /// High-water mark of composed frames in flight.
    pub max_frames_in_flight: usize,
    /// Buffer pool counters for the run.
    pub pool: FramePoolStats,
}

/// Terminal state of an export. Every call to [`export`] returns exactly one.
#[derive(Debug)]
pub enum ExportOutcome {
    /// The destination holds a complete video.
    Completed(ExportReport),
    /// The export stopped on an error; no output file remains.
    Failed(LapseError),
    /// The export was cancelled; no output file remains.
    Cancelled,
}

impl ExportOutcome {
    /// Convert to a `Result`, treating cancellation as success without a
    /// report.
    pub fn into_result(self) -> LapseResult<Option<ExportReport>> {
        match self {
            ExportOutcome::Completed(report) => Ok(Some(report)),
            ExportOutcome::Failed(e) => Err(e),
            ExportOutcome::Cancelled => Ok(None),
        }
    }
}

/// Runs an export against the system `ffmpeg`.
pub fn export(
    request: &ExportRequest,
    options: &ExportOptions,
    cancel: &CancelToken,
    on_progress: impl FnMut(ExportProgress),
) -> ExportOutcome {
    export_with_sink(
        Box::new(FfmpegSink::default()),
        request,
        options,
        cancel,
        on_progress,
    )
}

/// Runs an export against a caller-provided sink.
pub fn export_with_sink(
    sink: Box<dyn FrameSink>,
    request: &ExportRequest,
    options: &ExportOptions,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(ExportProgress),
) -> ExportOutcome {
    if let Err(e) = validate(request, options) {
        return ExportOutcome::Failed(e);
    }

    let compositor = if request.show_timestamp {
        match Compositor::with_timestamp(options.canvas, options.timestamp.clone()) {
            Ok(c) => c,
            Err(e) => return ExportOutcome::Failed(e),
        }
    } else {
        Compositor::new(options.canvas)
    };
    let pool = FrameBufferPool::new(options.canvas);
    let gate = InflightGate::new(1);

    let mut session = match EncodeSession::start(
        sink,
        &request.destination,
        options.canvas,
        request.frame_duration,
    ) {
        Ok(session) => session,
        Err(e) => return ExportOutcome::Failed(e),
    };

    tracing::info!(
        stills = request.frames.len(),
        destination = %request.destination.display(),
        timestamp = request.show_timestamp,
        "export started"
    );

    let feeder = FrameFeeder::new(&compositor, &pool, &gate, request.frame_duration)
        .with_policy(options.on_frame_error);
    let fed = feeder.feed(&request.frames, &mut session, cancel, |done, total| {
        on_progress(ExportProgress {
            frames_done: done,
            frames_total: total,
        })
    });

    match fed {
        Ok(stats) => match session.finish() {
            Ok(_) => {
                let report = ExportReport {
                    destination: request.destination.clone(),
                    frames_appended: stats.frames_appended,
                    frames_skipped: stats.frames_skipped,
                    video_duration: request.frame_duration * stats.frames_appended as u32,
                    max_frames_in_flight: gate.max_held(),
                    pool: pool.stats(),
                };
                tracing::info!(
                    frames = report.frames_appended,
                    skipped = report.frames_skipped,
                    duration_ms = report.video_duration.as_millis() as u64,
                    "export completed"
                );
                ExportOutcome::Completed(report)
            }
            Err(e) => ExportOutcome::Failed(e),
        },
        Err(FeedInterrupt::Cancelled) => {
            session.abort();
            ExportOutcome::Cancelled
        }
        Err(FeedInterrupt::Fatal(e)) => {
            session.abort();
            tracing::warn!(error = %e, "export failed");
            ExportOutcome::Failed(e)
        }
    }
}

fn validate(request: &ExportRequest, options: &ExportOptions) -> LapseResult<()> {
    if request.frames.is_empty() {
        return Err(LapseError::invalid_request(
            "the frame group holds no stills",
        ));
    }
    if request.frame_duration.is_zero() {
        return Err(LapseError::invalid_request(
            "per-frame duration must be positive",
        ));
    }
    options.canvas.validate()?;
    if request.destination.as_os_str().is_empty() {
        return Err(LapseError::invalid_request("destination path is empty"));
    }
    if request.destination.is_dir() {
        return Err(LapseError::invalid_request(format!(
            "destination '{}' is a directory",
            request.destination.display()
        )));
    }
    Ok(())
}
