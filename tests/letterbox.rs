use std::sync::Arc;

use chrono::{Local, TimeZone};
use proptest::prelude::*;
use lapse::{
    CanvasSpec, Compositor, FrameBufferPool, StillId, StillImage, StillSource, TimestampStyle,
    letterbox_rect,
};

fn raw_still(width: u32, height: u32, rgba: [u8; 4]) -> StillSource {
    StillSource::Raw {
        width,
        height,
        rgba: Arc::from(rgba.repeat((width * height) as usize)),
    }
}

fn still_at_epoch(source: StillSource) -> StillImage {
    StillImage {
        id: StillId(0),
        timestamp: Local.timestamp_opt(1_700_000_000, 0).unwrap(),
        source,
    }
}

#[test]
fn wide_source_fills_width_and_centers_vertically() {
    let rect = letterbox_rect(4000, 1000, 1920, 1080);
    assert_eq!(rect.width, 1920);
    assert_eq!(rect.height, 480);
    assert_eq!(rect.x, 0);
    assert_eq!(rect.y, 300);
}

#[test]
fn tall_source_fills_height_and_centers_horizontally() {
    let rect = letterbox_rect(1000, 4000, 1920, 1080);
    assert_eq!(rect.width, 270);
    assert_eq!(rect.height, 1080);
    assert_eq!(rect.x, 825);
    assert_eq!(rect.y, 0);
}

#[test]
fn matching_aspect_fills_the_canvas() {
    let rect = letterbox_rect(960, 540, 1920, 1080);
    assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 1920, 1080));
}

#[test]
fn small_sources_are_scaled_up() {
    let rect = letterbox_rect(192, 108, 1920, 1080);
    assert_eq!((rect.width, rect.height), (1920, 1080));
}

#[test]
fn extreme_aspect_never_collapses_to_zero() {
    let rect = letterbox_rect(10_000, 1, 1920, 1080);
    assert_eq!(rect.width, 1920);
    assert_eq!(rect.height, 1);

    let rect = letterbox_rect(1, 10_000, 1920, 1080);
    assert_eq!(rect.width, 1);
    assert_eq!(rect.height, 1080);
}

/// Sweep a grid of source and canvas sizes and check the fit invariants:
/// the scaled rect stays inside the canvas, fills at least one axis, and is
/// centered on the other.
#[test]
fn every_fit_stays_inside_and_fills_one_axis() {
    let sources = [
        (1, 1),
        (7, 13),
        (640, 480),
        (1920, 1080),
        (1080, 1920),
        (4032, 3024),
        (9999, 2),
        (2, 9999),
    ];
    let canvases = [(1920, 1080), (1280, 720), (640, 640), (100, 100)];

    for &(sw, sh) in &sources {
        for &(cw, ch) in &canvases {
            let rect = letterbox_rect(sw, sh, cw, ch);
            assert!(rect.width >= 1 && rect.height >= 1, "{sw}x{sh} on {cw}x{ch}");
            assert!(
                rect.x + rect.width <= cw && rect.y + rect.height <= ch,
                "{sw}x{sh} on {cw}x{ch} escapes the canvas: {rect:?}"
            );
            assert!(
                rect.width == cw || rect.height == ch,
                "{sw}x{sh} on {cw}x{ch} fills neither axis: {rect:?}"
            );
            assert_eq!(rect.x, (cw - rect.width) / 2, "{sw}x{sh} on {cw}x{ch}");
            assert_eq!(rect.y, (ch - rect.height) / 2, "{sw}x{sh} on {cw}x{ch}");
        }
    }
}

proptest! {
    /// The fit invariants hold for arbitrary source and canvas sizes, not
    /// just the hand-picked grid above: the scaled rect never escapes the
    /// canvas, fills at least one axis, and is centered on the other.
    #[test]
    fn random_fits_stay_inside_fill_one_axis_and_center(
        src_w in 1u32..=8192,
        src_h in 1u32..=8192,
        canvas_w in 1u32..=4096,
        canvas_h in 1u32..=4096,
    ) {
        let rect = letterbox_rect(src_w, src_h, canvas_w, canvas_h);
        prop_assert!(rect.width >= 1 && rect.height >= 1);
        prop_assert!(rect.x + rect.width <= canvas_w);
        prop_assert!(rect.y + rect.height <= canvas_h);
        prop_assert!(rect.width == canvas_w || rect.height == canvas_h);
        prop_assert_eq!(rect.x, (canvas_w - rect.width) / 2);
        prop_assert_eq!(rect.y, (canvas_h - rect.height) / 2);
    }
}

#[test]
fn pillarbox_bars_are_black_and_content_survives() {
    let canvas = CanvasSpec::new(100, 100);
    let compositor = Compositor::new(canvas);
    let pool = FrameBufferPool::new(canvas);

    // A 100x50 white source letterboxes with 25-pixel bars above and below.
    let still = still_at_epoch(raw_still(100, 50, [255, 255, 255, 255]));
    let mut buffer = pool.allocate().unwrap();
    compositor.compose(&still, &mut buffer).unwrap();

    let px = |x: u32, y: u32| {
        let i = ((y * 100 + x) * 4) as usize;
        let d = buffer.as_slice();
        [d[i], d[i + 1], d[i + 2], d[i + 3]]
    };
    assert_eq!(px(50, 0), [0, 0, 0, 255]);
    assert_eq!(px(50, 24), [0, 0, 0, 255]);
    assert_eq!(px(50, 25), [255, 255, 255, 255]);
    assert_eq!(px(50, 74), [255, 255, 255, 255]);
    assert_eq!(px(50, 75), [0, 0, 0, 255]);
    assert_eq!(px(50, 99), [0, 0, 0, 255]);
}

fn system_font_available() -> bool {
    lapse::discover_system_font().is_some()
}

#[test]
fn timestamp_overlay_changes_only_its_plate_region() {
    if !system_font_available() {
        return;
    }

    let canvas = CanvasSpec::new(320, 180);
    let style = TimestampStyle {
        size_px: 16.0,
        ..TimestampStyle::default()
    };
    let ts = Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap();
    let still = StillImage {
        id: StillId(0),
        timestamp: ts,
        source: raw_still(320, 180, [128, 128, 128, 255]),
    };

    let plain = Compositor::new(canvas);
    let stamped = Compositor::with_timestamp(canvas, style).unwrap();
    let pool = FrameBufferPool::new(canvas);

    let mut base = pool.allocate().unwrap();
    plain.compose(&still, &mut base).unwrap();
    let mut overlaid = pool.allocate().unwrap();
    stamped.compose(&still, &mut overlaid).unwrap();

    let rect = stamped.overlay().unwrap().plate_rect(canvas, ts);
    assert!(rect.width > 0 && rect.height > 0);

    let mut inside_changed = false;
    for y in 0..180u32 {
        for x in 0..320u32 {
            let i = ((y * 320 + x) * 4) as usize;
            let a = &base.as_slice()[i..i + 4];
            let b = &overlaid.as_slice()[i..i + 4];
            let in_plate = x >= rect.x
                && x < rect.x + rect.width
                && y >= rect.y
                && y < rect.y + rect.height;
            if in_plate {
                if a != b {
                    inside_changed = true;
                }
            } else {
                assert_eq!(a, b, "pixel outside the plate changed at ({x},{y})");
            }
        }
    }
    assert!(inside_changed, "the plate region was not drawn");
}
