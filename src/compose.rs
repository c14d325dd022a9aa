use image::RgbaImage;
use image::imageops::FilterType;

use crate::catalog::{StillImage, StillSource};
use crate::core::{CanvasSpec, PixelFormat};
use crate::error::{LapseError, LapseResult};
use crate::overlay::{TimestampOverlay, TimestampStyle, mul_div255};
use crate::pool::FrameBuffer;

/// Placement of the scaled source within the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LetterboxRect {
    /// Left edge in canvas pixels.
    pub x: u32,
    /// Top edge in canvas pixels.
    pub y: u32,
    /// Scaled source width.
    pub width: u32,
    /// Scaled source height.
    pub height: u32,
}

/// Compute where a `src_w` x `src_h` source lands on a `canvas_w` x
/// `canvas_h` canvas.
///
/// The source is scaled to fit entirely inside the canvas (never cropped):
/// it fills the canvas exactly on one axis and is centered on the other,
/// with the leftover area as padding. A source with a zero dimension has no
/// aspect ratio; it maps to the full canvas rather than panicking.
pub fn letterbox_rect(src_w: u32, src_h: u32, canvas_w: u32, canvas_h: u32) -> LetterboxRect {
    if src_w == 0 || src_h == 0 {
        return LetterboxRect {
            x: 0,
            y: 0,
            width: canvas_w,
            height: canvas_h,
        };
    }

    // Source relatively wider than the canvas when srcW/srcH >= canvasW/canvasH,
    // compared in integers to avoid float drift.
    let wider = u64::from(src_w) * u64::from(canvas_h) >= u64::from(canvas_w) * u64::from(src_h);
    if wider {
        let height = round_div(u64::from(src_h) * u64::from(canvas_w), u64::from(src_w)) as u32;
        let height = height.clamp(1, canvas_h);
        LetterboxRect {
            x: 0,
            y: (canvas_h - height) / 2,
            width: canvas_w,
            height,
        }
    } else {
        let width = round_div(u64::from(src_w) * u64::from(canvas_h), u64::from(src_h)) as u32;
        let width = width.clamp(1, canvas_w);
        LetterboxRect {
            x: (canvas_w - width) / 2,
            y: 0,
            width,
            height: canvas_h,
        }
    }
}

fn round_div(num: u64, den: u64) -> u64 {
    (num + den / 2) / den
}

/// Turns one still into one canvas-sized frame: decode, scale (Lanczos),
/// center over black padding, optionally burn in the capture timestamp.
///
/// Pure with respect to its inputs; the source is never mutated and the
/// output buffer is either fully composed or the call fails.
pub struct Compositor {
    canvas: CanvasSpec,
    overlay: Option<TimestampOverlay>,
}

impl Compositor {
    /// Compositor without a timestamp overlay.
    pub fn new(canvas: CanvasSpec) -> Self {
        Self {
            canvas,
            overlay: None,
        }
    }

    /// Compositor that burns the capture timestamp into every frame.
    ///
    /// Loads the overlay font up front; font problems fail here instead of
    /// on the first frame.
    pub fn with_timestamp(canvas: CanvasSpec, style: TimestampStyle) -> LapseResult<Self> {
        Ok(Self {
            canvas,
            overlay: Some(TimestampOverlay::new(style)?),
        })
    }

    /// Canvas spec this compositor produces.
    pub fn canvas(&self) -> CanvasSpec {
        self.canvas
    }

    /// Timestamp overlay, when enabled.
    pub fn overlay(&self) -> Option<&TimestampOverlay> {
        self.overlay.as_ref()
    }

    /// Compose `still` into `buf`.
    ///
    /// `buf` must come from a pool built for the same canvas spec.
    pub fn compose(&self, still: &StillImage, buf: &mut FrameBuffer) -> LapseResult<()> {
        if buf.spec() != self.canvas {
            return Err(LapseError::composition(format!(
                "frame buffer spec {:?} does not match compositor canvas {:?}",
                buf.spec(),
                self.canvas
            )));
        }

        let src = decode_still(&still.source)?;
        let rect = letterbox_rect(src.width(), src.height(), self.canvas.width, self.canvas.height);
        let scaled = if (src.width(), src.height()) == (rect.width, rect.height) {
            src
        } else {
            image::imageops::resize(&src, rect.width, rect.height, FilterType::Lanczos3)
        };

        let out = buf.as_mut_slice();
        fill_opaque_black(out);
        paste_over_black(out, self.canvas, &scaled, rect);

        if let Some(overlay) = &self.overlay {
            overlay.burn_into(out, self.canvas, still.timestamp);
        }
        if self.canvas.pixel_format == PixelFormat::Bgra8 {
            swizzle_rgba_to_bgra(out);
        }
        Ok(())
    }
}

fn decode_still(source: &StillSource) -> LapseResult<RgbaImage> {
    match source {
        StillSource::Path(path) => {
            let img = image::open(path).map_err(|e| {
                LapseError::composition(format!("failed to decode '{}': {e}", path.display()))
            })?;
            check_nonzero(img.width(), img.height())?;
            Ok(img.to_rgba8())
        }
        StillSource::Encoded(bytes) => {
            let img = image::load_from_memory(bytes)
                .map_err(|e| LapseError::composition(format!("failed to decode image bytes: {e}")))?;
            check_nonzero(img.width(), img.height())?;
            Ok(img.to_rgba8())
        }
        StillSource::Raw {
            width,
            height,
            rgba,
        } => {
            check_nonzero(*width, *height)?;
            RgbaImage::from_raw(*width, *height, rgba.to_vec()).ok_or_else(|| {
                LapseError::composition(format!(
                    "raw source claims {width}x{height} but holds {} bytes",
                    rgba.len()
                ))
            })
        }
    }
}

fn check_nonzero(width: u32, height: u32) -> LapseResult<()> {
    if width == 0 || height == 0 {
        return Err(LapseError::composition(
            "source image has a zero dimension",
        ));
    }
    Ok(())
}

fn fill_opaque_black(out: &mut [u8]) {
    for px in out.chunks_exact_mut(4) {
        px.copy_from_slice(&[0, 0, 0, 255]);
    }
}

/// Copy the scaled source into the canvas at `rect`, flattening any source
/// alpha over the black background so the output stays fully opaque.
fn paste_over_black(out: &mut [u8], spec: CanvasSpec, scaled: &RgbaImage, rect: LetterboxRect) {
    let stride = spec.width as usize * 4;
    let row_bytes = rect.width as usize * 4;
    let src_data = scaled.as_raw();

    for row in 0..rect.height as usize {
        let src_at = row * row_bytes;
        let dst_at = (rect.y as usize + row) * stride + rect.x as usize * 4;
        let src_row = &src_data[src_at..src_at + row_bytes];
        let dst_row = &mut out[dst_at..dst_at + row_bytes];

        for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            let a = u16::from(s[3]);
            if a == 255 {
                d.copy_from_slice(s);
            } else {
                d[0] = mul_div255(u16::from(s[0]), a) as u8;
                d[1] = mul_div255(u16::from(s[1]), a) as u8;
                d[2] = mul_div255(u16::from(s[2]), a) as u8;
                d[3] = 255;
            }
        }
    }
}

fn swizzle_rgba_to_bgra(out: &mut [u8]) {
    for px in out.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FrameGroup;
    use crate::pool::FrameBufferPool;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn solid_raw(width: u32, height: u32, rgba: [u8; 4]) -> StillSource {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgba);
        }
        StillSource::Raw {
            width,
            height,
            rgba: Arc::from(data),
        }
    }

    fn still(source: StillSource) -> StillImage {
        let mut group = FrameGroup::new("t");
        group.push(
            chrono::Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            source,
        );
        group.stills()[0].clone()
    }

    fn pixel(buf: &[u8], spec: CanvasSpec, x: u32, y: u32) -> [u8; 4] {
        let at = ((y * spec.width + x) * 4) as usize;
        [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
    }

    #[test]
    fn wide_source_fills_width_and_centers_vertically() {
        let r = letterbox_rect(4000, 1000, 1920, 1080);
        assert_eq!(
            r,
            LetterboxRect {
                x: 0,
                y: 300,
                width: 1920,
                height: 480
            }
        );
    }

    #[test]
    fn tall_source_fills_height_and_centers_horizontally() {
        let r = letterbox_rect(1000, 4000, 1920, 1080);
        assert_eq!(
            r,
            LetterboxRect {
                x: 825,
                y: 0,
                width: 270,
                height: 1080
            }
        );
    }

    #[test]
    fn exact_fit_source_covers_the_canvas() {
        let r = letterbox_rect(1920, 1080, 1920, 1080);
        assert_eq!(
            r,
            LetterboxRect {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn extreme_aspect_never_collapses_to_zero() {
        let r = letterbox_rect(10000, 1, 100, 100);
        assert_eq!(r.width, 100);
        assert_eq!(r.height, 1);
    }

    #[test]
    fn zero_source_dimension_maps_to_the_full_canvas() {
        for (sw, sh) in [(0, 0), (0, 10), (10, 0)] {
            let r = letterbox_rect(sw, sh, 1920, 1080);
            assert_eq!(
                r,
                LetterboxRect {
                    x: 0,
                    y: 0,
                    width: 1920,
                    height: 1080
                }
            );
        }
    }

    #[test]
    fn compose_centers_square_source_with_black_pillars() {
        let spec = CanvasSpec::new(8, 4);
        let pool = FrameBufferPool::new(spec);
        let mut buf = pool.allocate().unwrap();
        let comp = Compositor::new(spec);

        comp.compose(&still(solid_raw(2, 2, [255, 0, 0, 255])), &mut buf)
            .unwrap();

        let out = buf.as_slice();
        // Square source on a 2:1 canvas: 4x4 centered, columns 0-1 and 6-7 padded.
        assert_eq!(pixel(out, spec, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(out, spec, 7, 3), [0, 0, 0, 255]);
        assert_eq!(pixel(out, spec, 3, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(out, spec, 4, 2), [255, 0, 0, 255]);
    }

    #[test]
    fn compose_flattens_source_alpha_over_black() {
        let spec = CanvasSpec::new(2, 2);
        let pool = FrameBufferPool::new(spec);
        let mut buf = pool.allocate().unwrap();
        let comp = Compositor::new(spec);

        comp.compose(&still(solid_raw(1, 1, [255, 0, 0, 128])), &mut buf)
            .unwrap();

        let px = pixel(buf.as_slice(), spec, 0, 0);
        assert_eq!(px, [128, 0, 0, 255]);
    }

    #[test]
    fn compose_swizzles_for_bgra_canvases() {
        let spec = CanvasSpec {
            pixel_format: PixelFormat::Bgra8,
            ..CanvasSpec::new(2, 2)
        };
        let pool = FrameBufferPool::new(spec);
        let mut buf = pool.allocate().unwrap();
        let comp = Compositor::new(spec);

        comp.compose(&still(solid_raw(2, 2, [255, 0, 0, 255])), &mut buf)
            .unwrap();

        assert_eq!(pixel(buf.as_slice(), spec, 0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn undecodable_bytes_are_a_composition_error() {
        let spec = CanvasSpec::new(2, 2);
        let pool = FrameBufferPool::new(spec);
        let mut buf = pool.allocate().unwrap();
        let comp = Compositor::new(spec);

        let bad = still(StillSource::Encoded(Arc::from(
            b"definitely not an image".as_slice(),
        )));
        let err = comp.compose(&bad, &mut buf).unwrap_err();
        assert!(err.to_string().contains("composition failed:"));
    }

    #[test]
    fn zero_dimension_raw_source_is_rejected() {
        let spec = CanvasSpec::new(2, 2);
        let pool = FrameBufferPool::new(spec);
        let mut buf = pool.allocate().unwrap();
        let comp = Compositor::new(spec);

        let bad = still(StillSource::Raw {
            width: 0,
            height: 0,
            rgba: Arc::from(Vec::new()),
        });
        assert!(comp.compose(&bad, &mut buf).is_err());
    }

    #[test]
    fn mismatched_buffer_spec_is_rejected() {
        let comp = Compositor::new(CanvasSpec::new(4, 4));
        let other_pool = FrameBufferPool::new(CanvasSpec::new(8, 8));
        let mut buf = other_pool.allocate().unwrap();

        let err = comp
            .compose(&still(solid_raw(1, 1, [0, 0, 0, 255])), &mut buf)
            .unwrap_err();
        assert!(err.to_string().contains("composition failed:"));
    }
}
