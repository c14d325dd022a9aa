use std::path::PathBuf;

fn lapse_exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_lapse")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) { "lapse.exe" } else { "lapse" });
            p
        })
}

#[test]
fn cli_frame_writes_png() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    let in_path = dir.join("still.png");
    let out_path = dir.join("frame.png");
    let _ = std::fs::remove_file(&out_path);

    // A small red still; the canvas is larger so the frame gets padding.
    let still = image::RgbaImage::from_pixel(16, 16, image::Rgba([200, 30, 30, 255]));
    still.save(&in_path).unwrap();

    let in_arg = in_path.to_string_lossy().to_string();
    let out_arg = out_path.to_string_lossy().to_string();

    let status = std::process::Command::new(lapse_exe())
        .args(["frame", "--in", in_arg.as_str(), "--out"])
        .arg(out_arg.as_str())
        .args(["--width", "64", "--height", "64"])
        .status()
        .unwrap();

    assert!(status.success());
    let out = image::open(&out_path).unwrap().to_rgba8();
    assert_eq!((out.width(), out.height()), (64, 64));
    // Square source on a square canvas: the center carries the source color.
    assert_eq!(out.get_pixel(32, 32).0, [200, 30, 30, 255]);
}

#[test]
fn cli_export_rejects_conflicting_inputs() {
    let status = std::process::Command::new(lapse_exe())
        .args([
            "export",
            "--frames",
            "a",
            "--manifest",
            "b",
            "--out",
            "out.mp4",
        ])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
}
