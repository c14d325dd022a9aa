//! Lapse turns a folder of timestamped stills into a timelapse MP4.
//!
//! The pipeline is session-oriented and runs on the CPU, streaming frames to
//! the system `ffmpeg` binary:
//!
//! - Collect stills into a [`FrameGroup`] (from a directory or a manifest)
//! - Describe the job as an [`ExportRequest`]
//! - Run [`export`] and receive exactly one terminal [`ExportOutcome`]
//!
//! Each still is letterboxed onto a fixed canvas (aspect preserved, never
//! cropped), optionally stamped with its capture time, and appended at a
//! fixed per-frame duration. Memory stays flat regardless of input size: a
//! buffer pool recycles frame memory and an in-flight gate bounds how many
//! composed frames exist at once.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Still images, groups, and catalog loading (directories, manifests).
pub mod catalog;
/// Letterbox composition of stills onto the output canvas.
pub mod compose;
/// Canvas/pixel-format primitives, frame timing, cancellation.
pub mod core;
/// Encoding sessions and sinks.
pub mod encode;
/// Error and result types.
pub mod error;
/// Export orchestration: group in, MP4 out.
pub mod export;
/// Paced feeding of composited frames into an encode session.
pub mod feed;
/// Burned-in timestamp overlay.
pub mod overlay;
/// Reusable frame buffer pool.
pub mod pool;

pub use crate::core::{CancelToken, CanvasSpec, FrameRate, PixelFormat};
pub use crate::error::{LapseError, LapseResult};

pub use crate::catalog::{FrameGroup, ManifestEntry, StillId, StillImage, StillSource};
pub use crate::compose::{Compositor, LetterboxRect, letterbox_rect};
pub use crate::encode::{
    CompositedFrame, EncodeSession, EncodeStats, FfmpegSink, FfmpegSinkOpts, FrameSink, MemorySink,
    MemoryTap, SessionState, SinkConfig, is_ffmpeg_on_path,
};
pub use crate::export::{
    ExportOptions, ExportOutcome, ExportProgress, ExportReport, ExportRequest, export,
    export_with_sink,
};
pub use crate::feed::{
    FeedInterrupt, FeedStats, FrameErrorPolicy, FrameFeeder, InflightGate, InflightPermit,
};
pub use crate::overlay::{FontChoice, TimestampOverlay, TimestampStyle, discover_system_font};
pub use crate::pool::{FrameBuffer, FrameBufferPool, FramePoolOpts, FramePoolStats};
