//! Encoding sessions and sinks.
//!
//! Sinks consume composited frames in presentation order; [`session::EncodeSession`]
//! drives one sink from start to a single terminal state.

/// `ffmpeg`-based sink (MP4 output via system `ffmpeg`).
pub mod ffmpeg;
/// Session state machine over a frame sink.
pub mod session;
/// Generic frame sink trait and the in-memory test sink.
pub mod sink;

pub use ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use session::{CompositedFrame, EncodeSession, EncodeStats, SessionState};
pub use sink::{FrameSink, MemorySink, MemoryTap, SinkConfig};
