use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lapse", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose a single still onto the canvas and write it as a PNG.
    Frame(FrameArgs),
    /// Export a directory or manifest of stills to an MP4 (requires `ffmpeg` on PATH).
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input image file.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Burn the capture time (file modification time) into the frame.
    #[arg(long, default_value_t = false)]
    timestamp: bool,

    /// Canvas width in pixels.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Canvas height in pixels.
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Timestamp font file (TTF/OTF); system fonts are searched when omitted.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Directory of image files to export.
    #[arg(long, conflicts_with = "manifest")]
    frames: Option<PathBuf>,

    /// JSON manifest of `{path, timestamp}` entries.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Seconds each still is shown.
    #[arg(long, default_value_t = 0.25)]
    frame_secs: f64,

    /// Burn capture timestamps into the frames.
    #[arg(long, default_value_t = false)]
    timestamp: bool,

    /// Canvas width in pixels.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Canvas height in pixels.
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Export only stills captured on this day (YYYY-MM-DD).
    #[arg(long)]
    day: Option<String>,

    /// Skip stills that fail to compose instead of aborting.
    #[arg(long, default_value_t = false)]
    skip_errors: bool,

    /// Timestamp font file (TTF/OTF); system fonts are searched when omitted.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Export(args) => cmd_export(args),
    }
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let canvas = lapse::CanvasSpec::new(args.width, args.height);
    let compositor = if args.timestamp {
        lapse::Compositor::with_timestamp(canvas, timestamp_style(args.font))?
    } else {
        lapse::Compositor::new(canvas)
    };

    let modified = std::fs::metadata(&args.in_path)
        .and_then(|m| m.modified())
        .with_context(|| format!("read modification time of '{}'", args.in_path.display()))?;
    let still = lapse::StillImage {
        id: lapse::StillId(0),
        timestamp: modified.into(),
        source: lapse::StillSource::Path(args.in_path.clone()),
    };

    let pool = lapse::FrameBufferPool::new(canvas);
    let mut buffer = pool.allocate()?;
    compositor.compose(&still, &mut buffer)?;

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        buffer.as_slice(),
        canvas.width,
        canvas.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let group = match (&args.frames, &args.manifest) {
        (Some(dir), None) => lapse::FrameGroup::from_dir(dir)?,
        (None, Some(path)) => lapse::FrameGroup::from_manifest(path)?,
        _ => anyhow::bail!("exactly one of --frames or --manifest is required"),
    };

    let group = match &args.day {
        Some(day) => {
            let mut groups = group.split_by_day();
            let Some(i) = groups.iter().position(|g| g.key() == day) else {
                let days: Vec<&str> = groups.iter().map(|g| g.key()).collect();
                anyhow::bail!("no stills captured on {day}; available: {}", days.join(", "));
            };
            groups.swap_remove(i)
        }
        None => group,
    };

    if !lapse::is_ffmpeg_on_path() {
        anyhow::bail!("ffmpeg was not found on PATH; install it to export video");
    }
    let frame_duration = Duration::try_from_secs_f64(args.frame_secs)
        .map_err(|_| anyhow::anyhow!("--frame-secs must be a positive number"))?;

    let cancel = lapse::CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("cancelling after the current frame...");
        handler_token.cancel();
    })
    .context("install Ctrl-C handler")?;

    let request = lapse::ExportRequest {
        frames: group,
        destination: args.out.clone(),
        show_timestamp: args.timestamp,
        frame_duration,
    };
    let options = lapse::ExportOptions {
        canvas: lapse::CanvasSpec::new(args.width, args.height),
        on_frame_error: if args.skip_errors {
            lapse::FrameErrorPolicy::Skip
        } else {
            lapse::FrameErrorPolicy::Abort
        },
        timestamp: timestamp_style(args.font.clone()),
    };

    let outcome = lapse::export(&request, &options, &cancel, |p| {
        eprint!("\rcomposing frame {}/{}", p.frames_done, p.frames_total);
    });
    eprintln!();

    match outcome {
        lapse::ExportOutcome::Completed(report) => {
            eprintln!(
                "wrote {} ({} frames, {:.1}s)",
                report.destination.display(),
                report.frames_appended,
                report.video_duration.as_secs_f64()
            );
            if report.frames_skipped > 0 {
                eprintln!(
                    "skipped {} stills that failed to compose",
                    report.frames_skipped
                );
            }
            Ok(())
        }
        lapse::ExportOutcome::Cancelled => {
            eprintln!("export cancelled; no file was written");
            std::process::exit(130);
        }
        lapse::ExportOutcome::Failed(e) => Err(e.into()),
    }
}

fn timestamp_style(font: Option<PathBuf>) -> lapse::TimestampStyle {
    let mut style = lapse::TimestampStyle::default();
    if let Some(path) = font {
        style.font = lapse::FontChoice::File(path);
    }
    style
}
