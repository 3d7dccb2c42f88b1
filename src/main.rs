use anyhow::{Context, Result};
use backdrop::background::{parse_hex_color, Background};
use backdrop::capture::{FrameSource, TestPatternSource, WebcamCapture};
use backdrop::output::V4L2Output;
use backdrop::scheduler::{self, SchedulerConfig};
use backdrop::segmentation::{
    ModelSlot, SegmentationConfig, SegmentationProvider, SpeedAccuracyTradeoff,
};
use backdrop::session::{Session, SessionConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Canvas width; frames, masks and output all use it
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Canvas height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Maximum composited frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Repaint clock rate driving the scheduler
    #[arg(long, default_value_t = 60)]
    repaint_hz: u32,

    /// Path to segmentation model (ONNX file)
    #[arg(long)]
    model: PathBuf,

    /// Model input resolution: faster or more accurate
    #[arg(long, value_enum, default_value_t = SpeedAccuracyTradeoff::Balanced)]
    tradeoff: SpeedAccuracyTradeoff,

    /// Matte value above which a pixel counts as person
    #[arg(long, default_value_t = 0.5)]
    confidence: f32,

    /// Mirror the picture horizontally
    #[arg(long)]
    mirror: bool,

    /// Background image file
    #[arg(long)]
    background: Option<PathBuf>,

    /// Solid background color (RRGGBB), used until an image is loaded
    #[arg(long, default_value = "00ff00")]
    background_color: String,

    /// Use a synthetic test pattern instead of the webcam
    #[arg(long)]
    test_pattern: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    tracing::info!("Canvas: {}x{}", args.width, args.height);
    tracing::info!("Target FPS: {}", args.fps);

    let segmentation = SegmentationConfig::new(args.tradeoff, args.confidence, args.mirror)
        .context("Invalid segmentation settings")?;
    let scheduler_config =
        SchedulerConfig::new(args.fps, args.repaint_hz).context("Invalid frame rate settings")?;
    let fill = parse_hex_color(&args.background_color).context("Invalid background color")?;

    let source: Box<dyn FrameSource> = if args.test_pattern {
        Box::new(TestPatternSource::new(args.width, args.height))
    } else {
        Box::new(
            WebcamCapture::new(args.input_device, args.width, args.height)
                .context("Failed to initialize webcam capture")?,
        )
    };

    let output = V4L2Output::new(&args.output_device, args.width, args.height)
        .context("Failed to initialize v4l2loopback output")?;

    let model = ModelSlot::new();
    let mut session = Session::new(
        SessionConfig {
            width: args.width,
            height: args.height,
            target_fps: args.fps,
            initial_background: Some(Background::Solid(fill)),
        },
        source,
        output,
        model.clone(),
    )
    .context("Failed to create session")?;

    // Cycles no-op until the model lands in the slot
    tracing::info!("Loading segmentation model from {}", args.model.display());
    model.spawn_load(
        SegmentationProvider::load(args.model.clone(), segmentation),
        session.liveness(),
    );

    if let Some(path) = args.background.clone() {
        let store = session.backgrounds();
        tokio::spawn(async move {
            if let Err(e) = store.load_file(&path).await {
                tracing::warn!("Keeping current background: {}", e);
            }
        });
    }

    let liveness = session.liveness();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            liveness.teardown();
        }
    });
    tracing::info!("Press Ctrl+C to stop");

    let result = scheduler::run(&mut session, &scheduler_config).await;
    session.teardown();
    session.stats().log_averages();

    result.context("Pipeline stopped")
}
