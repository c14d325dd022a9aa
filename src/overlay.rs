use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use chrono::{DateTime, Local};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::core::CanvasSpec;
use crate::error::{LapseError, LapseResult};

/// Where the overlay font comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FontChoice {
    /// Probe well-known system font directories for a usable face.
    #[default]
    System,
    /// Load this font file (`.ttf`/`.otf`).
    File(PathBuf),
}

/// Appearance of the burned-in capture timestamp.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TimestampStyle {
    /// Font source.
    pub font: FontChoice,
    /// Glyph size in pixels.
    pub size_px: f32,
    /// Distance from the canvas's top and right edges.
    pub margin_px: u32,
    /// Padding between the text bounds and the backing plate edge.
    pub pad_px: u32,
    /// Text color, straight-alpha RGBA.
    pub text_rgba: [u8; 4],
    /// Backing plate color, straight-alpha RGBA.
    ///
    /// Kept dark grey rather than pure black so the plate stays visible
    /// over black letterbox padding.
    pub plate_rgba: [u8; 4],
}

impl Default for TimestampStyle {
    fn default() -> Self {
        Self {
            font: FontChoice::System,
            size_px: 64.0,
            margin_px: 48,
            pad_px: 16,
            text_rgba: [255, 255, 255, 255],
            plate_rgba: [16, 16, 16, 180],
        }
    }
}

/// Region of the canvas covered by the overlay plate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayRect {
    /// Left edge in canvas pixels.
    pub x: u32,
    /// Top edge in canvas pixels.
    pub y: u32,
    /// Plate width, clipped to the canvas.
    pub width: u32,
    /// Plate height, clipped to the canvas.
    pub height: u32,
}

/// Renders `YYYY-MM-DD HH:MM:SS` over a measured, padded backing plate
/// anchored to the canvas's top-right corner.
#[derive(Debug)]
pub struct TimestampOverlay {
    font: FontArc,
    style: TimestampStyle,
}

impl TimestampOverlay {
    /// Load the style's font and build the overlay renderer.
    ///
    /// Font problems surface here, once per export, rather than per frame.
    pub fn new(style: TimestampStyle) -> LapseResult<Self> {
        let font = match &style.font {
            FontChoice::File(path) => load_font(path)?,
            FontChoice::System => {
                let Some(path) = discover_system_font() else {
                    return Err(LapseError::composition(
                        "no usable system font found for the timestamp overlay; \
                         set an explicit font file",
                    ));
                };
                load_font(&path)?
            }
        };
        Ok(Self { font, style })
    }

    /// Format a capture instant the way the overlay draws it.
    pub fn format_timestamp(ts: DateTime<Local>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Canvas region the plate for `ts` will cover.
    pub fn plate_rect(&self, spec: CanvasSpec, ts: DateTime<Local>) -> OverlayRect {
        let text = Self::format_timestamp(ts);
        let (text_w, text_h) = text_size(PxScale::from(self.style.size_px), &self.font, &text);
        anchored_rect(
            spec,
            text_w + 2 * self.style.pad_px,
            text_h + 2 * self.style.pad_px,
            self.style.margin_px,
        )
    }

    /// Burn the timestamp into an RGBA8 canvas buffer.
    ///
    /// The canvas stays fully opaque; the plate and glyph edges blend over
    /// whatever is underneath.
    pub fn burn_into(&self, canvas: &mut [u8], spec: CanvasSpec, ts: DateTime<Local>) {
        debug_assert_eq!(canvas.len(), spec.frame_bytes());

        let text = Self::format_timestamp(ts);
        let scale = PxScale::from(self.style.size_px);
        let (text_w, text_h) = text_size(scale, &self.font, &text);
        let plate_w = text_w + 2 * self.style.pad_px;
        let plate_h = text_h + 2 * self.style.pad_px;
        let rect = anchored_rect(spec, plate_w, plate_h, self.style.margin_px);
        if rect.width == 0 || rect.height == 0 {
            return;
        }

        let mut plate = RgbaImage::from_pixel(plate_w, plate_h, Rgba(self.style.plate_rgba));
        draw_text_mut(
            &mut plate,
            Rgba(self.style.text_rgba),
            self.style.pad_px as i32,
            self.style.pad_px as i32,
            scale,
            &self.font,
            &text,
        );

        blend_region(canvas, spec, &plate, rect);
    }
}

/// Anchor a `plate_w` x `plate_h` plate to the top-right corner with the
/// given margin, clipping to the canvas when it does not fit.
pub(crate) fn anchored_rect(
    spec: CanvasSpec,
    plate_w: u32,
    plate_h: u32,
    margin: u32,
) -> OverlayRect {
    let x = spec.width.saturating_sub(margin).saturating_sub(plate_w);
    let y = margin.min(spec.height);
    OverlayRect {
        x,
        y,
        width: plate_w.min(spec.width - x),
        height: plate_h.min(spec.height - y),
    }
}

fn blend_region(canvas: &mut [u8], spec: CanvasSpec, plate: &RgbaImage, rect: OverlayRect) {
    let stride = spec.width as usize * 4;
    for py in 0..rect.height {
        let row = (rect.y + py) as usize * stride;
        for px in 0..rect.width {
            let p = plate.get_pixel(px, py).0;
            let a = u16::from(p[3]);
            if a == 0 {
                continue;
            }
            let at = row + (rect.x + px) as usize * 4;
            let dst = &mut canvas[at..at + 4];
            if a == 255 {
                dst[0] = p[0];
                dst[1] = p[1];
                dst[2] = p[2];
            } else {
                let inv = 255 - a;
                dst[0] = (mul_div255(u16::from(p[0]), a) + mul_div255(u16::from(dst[0]), inv))
                    .min(255) as u8;
                dst[1] = (mul_div255(u16::from(p[1]), a) + mul_div255(u16::from(dst[1]), inv))
                    .min(255) as u8;
                dst[2] = (mul_div255(u16::from(p[2]), a) + mul_div255(u16::from(dst[2]), inv))
                    .min(255) as u8;
            }
            dst[3] = 255;
        }
    }
}

pub(crate) fn mul_div255(x: u16, y: u16) -> u16 {
    (x * y + 127) / 255
}

fn load_font(path: &Path) -> LapseResult<FontArc> {
    use anyhow::Context as _;
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read font file '{}'", path.display()))
        .map_err(|e| LapseError::composition(format!("{e:#}")))?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| LapseError::composition(format!("failed to parse font '{}': {e}", path.display())))
}

/// Probe well-known font directories for the first parseable `.ttf`/`.otf`.
///
/// Preferred faces are tried by exact path first so the overlay looks the
/// same across machines that have them.
pub fn discover_system_font() -> Option<PathBuf> {
    const PREFERRED: &[&str] = &[
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/Library/Fonts/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];
    const SCAN_DIRS: &[&str] = &[
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/System/Library/Fonts/Supplemental",
        "C:\\Windows\\Fonts",
    ];

    for candidate in PREFERRED {
        let path = Path::new(candidate);
        if font_parses(path) {
            return Some(path.to_path_buf());
        }
    }
    for dir in SCAN_DIRS {
        if let Some(found) = scan_for_font(Path::new(dir), 3) {
            return Some(found);
        }
    }
    None
}

fn scan_for_font(dir: &Path, depth: usize) -> Option<PathBuf> {
    if depth == 0 {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("ttf") | Some("otf")) && font_parses(&path) {
            return Some(path);
        }
    }
    subdirs.sort();
    for sub in subdirs {
        if let Some(found) = scan_for_font(&sub, depth - 1) {
            return Some(found);
        }
    }
    None
}

fn font_parses(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => FontArc::try_from_vec(bytes).is_ok(),
        Err(_) => false,
    }
}
