use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::error::{LapseError, LapseResult};

/// Options for [`FfmpegSink`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// x264 constant rate factor (lower is higher quality).
    pub crf: u8,
    /// x264 preset name.
    pub preset: String,
}

impl Default for FfmpegSinkOpts {
    fn default() -> Self {
        Self {
            crf: 18,
            preset: "medium".to_string(),
        }
    }
}

/// Production sink: spawns the system `ffmpeg` and streams raw frames to its
/// stdin, producing one H.264 MP4 with a single video track and no audio.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    cfg: Option<SinkConfig>,
    last_pts: Option<Duration>,
    frame_len: usize,
}

impl FfmpegSink {
    /// Create a sink with the given encoder options.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            cfg: None,
            last_pts: None,
            frame_len: 0,
        }
    }
}

impl FfmpegSink {
    /// Turn a failed stdin write into an encode error carrying ffmpeg's own
    /// diagnostic.
    ///
    /// A broken pipe almost always means ffmpeg already exited (bad encoder
    /// options, unwritable destination), so the interesting message is on its
    /// stderr, not in the I/O error. Reaps the child; the sink is terminal
    /// afterwards.
    fn write_failure(&mut self, err: std::io::Error) -> LapseError {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
        }
        let stderr_bytes = self
            .stderr_drain
            .take()
            .and_then(|handle| handle.join().ok())
            .and_then(|read| read.ok())
            .unwrap_or_default();
        self.cfg = None;

        let stderr = String::from_utf8_lossy(&stderr_bytes);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            LapseError::encode(format!("failed to write frame to ffmpeg stdin: {err}"))
        } else {
            LapseError::encode(format!(
                "failed to write frame to ffmpeg stdin: {err}; ffmpeg reported: {stderr}"
            ))
        }
    }
}

impl Default for FfmpegSink {
    fn default() -> Self {
        Self::new(FfmpegSinkOpts::default())
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> LapseResult<()> {
        cfg.canvas.validate()?;
        ensure_parent_dir(&cfg.destination)?;

        if !is_ffmpeg_on_path() {
            return Err(LapseError::writer_start(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args(rawvideo_args(&cfg, &self.opts));

        tracing::debug!(
            destination = %cfg.destination.display(),
            width = cfg.canvas.width,
            height = cfg.canvas.height,
            "spawning ffmpeg"
        );
        let mut child = cmd.spawn().map_err(|e| {
            LapseError::writer_start(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LapseError::writer_start("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| LapseError::writer_start("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        self.frame_len = cfg.canvas.frame_bytes();
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_pts = None;
        Ok(())
    }

    fn write_frame(&mut self, pts: Duration, frame: &[u8]) -> LapseResult<()> {
        if self.cfg.is_none() {
            return Err(LapseError::encode("ffmpeg sink not started"));
        }
        if let Some(last) = self.last_pts
            && pts <= last
        {
            return Err(LapseError::append_order(
                "ffmpeg sink received a non-increasing presentation time",
            ));
        }
        self.last_pts = Some(pts);

        if frame.len() != self.frame_len {
            return Err(LapseError::encode(format!(
                "frame is {} bytes, expected {}",
                frame.len(),
                self.frame_len
            )));
        }

        let written = {
            let Some(stdin) = self.stdin.as_mut() else {
                return Err(LapseError::encode("ffmpeg sink is already finalized"));
            };
            use std::io::Write as _;
            stdin.write_all(frame)
        };
        if let Err(e) = written {
            return Err(self.write_failure(e));
        }
        Ok(())
    }

    fn finish(&mut self) -> LapseResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| LapseError::encode("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| LapseError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| LapseError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| LapseError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        self.cfg = None;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(LapseError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn discard(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
        }
        if let Some(handle) = self.stderr_drain.take() {
            handle.join().ok();
        }
        self.cfg = None;
    }
}

/// Full ffmpeg argument list for one rawvideo-to-MP4 session.
///
/// Kept separate from the spawn so the command line is unit-testable.
fn rawvideo_args(cfg: &SinkConfig, opts: &FfmpegSinkOpts) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    // The session already removed any pre-existing file; -y keeps ffmpeg
    // from prompting if one reappears.
    args.push("-y".into());
    args.extend(["-loglevel".into(), "error".into()]);
    args.extend(["-f".into(), "rawvideo".into()]);
    args.extend([
        "-pix_fmt".into(),
        cfg.canvas.pixel_format.ffmpeg_pix_fmt().into(),
    ]);
    args.extend([
        "-s".into(),
        format!("{}x{}", cfg.canvas.width, cfg.canvas.height),
    ]);
    // Rational input rate for the rawvideo demuxer, before -i.
    args.extend([
        "-r".into(),
        format!("{}/{}", cfg.frame_rate.num, cfg.frame_rate.den),
    ]);
    args.extend(["-i".into(), "pipe:0".into()]);
    args.push("-an".into());
    args.extend(["-c:v".into(), "libx264".into()]);
    args.extend(["-crf".into(), opts.crf.to_string()]);
    args.extend(["-preset".into(), opts.preset.clone()]);
    args.extend(["-pix_fmt".into(), "yuv420p".into()]);
    args.extend(["-movflags".into(), "+faststart".into()]);
    args.push(cfg.destination.display().to_string());
    args
}

/// Ensure the parent directory of `path` exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> LapseResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
