use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{LapseError, LapseResult};

/// Pixel layout of a composited frame, 4 bytes per pixel with tight stride.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA, the default interchange format.
    #[default]
    Rgba8,
    /// 8-bit BGRA, for capture stacks that hand over BGRA natively.
    Bgra8,
}

impl PixelFormat {
    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Matching ffmpeg rawvideo `-pix_fmt` name.
    pub fn ffmpeg_pix_fmt(self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba",
            Self::Bgra8 => "bgra",
        }
    }
}

/// Output canvas geometry and pixel format, fixed for one export session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CanvasSpec {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel layout of every buffer produced for this canvas.
    pub pixel_format: PixelFormat,
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::default(),
        }
    }
}

impl CanvasSpec {
    /// Create a spec with the default pixel format.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::default(),
        }
    }

    /// Validate encoder-facing constraints.
    ///
    /// Dimensions must be non-zero and even; yuv420p output subsamples
    /// chroma 2x2 and rejects odd sizes.
    pub fn validate(&self) -> LapseResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(LapseError::invalid_request(
                "canvas width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(LapseError::invalid_request(
                "canvas width/height must be even (required for yuv420p output)",
            ));
        }
        Ok(())
    }

    /// Byte length of one frame at this spec.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// Frames-per-second as a rational `num/den`, derived from a frame duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRate {
    /// Numerator (frames).
    pub num: u64,
    /// Denominator (seconds), always non-zero.
    pub den: u64,
}

impl FrameRate {
    /// Derive the playback rate from the per-frame duration.
    ///
    /// A frame shown for 250ms plays back at 4/1 fps.
    pub fn from_frame_duration(frame_duration: Duration) -> LapseResult<Self> {
        let nanos = frame_duration.as_nanos();
        if nanos == 0 {
            return Err(LapseError::invalid_request(
                "frame duration must be positive",
            ));
        }
        let Ok(den) = u64::try_from(nanos) else {
            return Err(LapseError::invalid_request("frame duration is too large"));
        };
        let num = 1_000_000_000u64;
        let g = gcd(num, den);
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Cooperative cancellation flag shared between an export and its caller.
///
/// Clones observe the same flag. The pipeline checks it between frames and
/// never mid-composition or mid-append.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next frame boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Return `true` once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
