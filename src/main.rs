//! `artrack` command line: compile target containers and run tracking
//! sessions over image sequences.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rust_artrack::compiler::{compile_targets, container, CompileConfig};
use rust_artrack::image::GreyImage;
use rust_artrack::io::ImageSequenceSource;
use rust_artrack::tracking::TrackingEvent;
use rust_artrack::{Session, SessionConfig};

#[derive(Parser)]
#[command(name = "artrack")]
#[command(about = "Planar image-target compiler and tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile target images into a container file.
    Compile {
        /// Target images, one target per image.
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Output container path.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Track compiled targets through a directory of frames.
    Track {
        /// Compiled target container.
        #[arg(long)]
        targets: PathBuf,

        /// Directory of frame images, processed in name order.
        #[arg(long)]
        frames: PathBuf,

        /// Session configuration (JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Frame rate used to stamp the sequence.
        #[arg(long, default_value = "30.0")]
        fps: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile { images, out } => run_compile(&images, &out),
        Commands::Track {
            targets,
            frames,
            config,
            fps,
        } => run_track(&targets, &frames, config.as_deref(), fps),
    }
}

fn run_compile(images: &[PathBuf], out: &Path) -> Result<()> {
    let greys = images
        .iter()
        .map(GreyImage::open)
        .collect::<Result<Vec<_>>>()?;

    let targets = compile_targets(&greys, &CompileConfig::default());
    container::write_file(out, &targets).with_context(|| format!("failed to write {}", out.display()))?;

    for (path, target) in images.iter().zip(&targets) {
        let (w, h) = target.dimensions();
        println!("{}: {}x{}", path.display(), w, h);
    }
    info!(targets = targets.len(), out = %out.display(), "container written");
    Ok(())
}

fn run_track(targets: &Path, frames: &Path, config: Option<&Path>, fps: f64) -> Result<()> {
    if fps <= 0.0 {
        bail!("fps must be positive, got {fps}");
    }
    let config = match config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    let source = ImageSequenceSource::open(frames, fps)
        .with_context(|| format!("failed to open frame directory {}", frames.display()))?;
    info!(frames = source.len(), "frame sequence opened");

    let mut session = Session::new(config);
    for (i, (w, h)) in session.add_targets_from_file(targets)?.into_iter().enumerate() {
        info!(target = i, width = w, height = h, "target");
    }

    let frame_count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&frame_count);
    session.on_update(move |event| match event {
        TrackingEvent::PoseUpdated {
            target_index,
            pose: Some(pose),
        } => {
            let t = pose.translation();
            info!(
                frame = counter.load(Ordering::Relaxed),
                target = target_index,
                "pose t=[{:.1}, {:.1}, {:.1}]",
                t.x,
                t.y,
                t.z
            );
        }
        TrackingEvent::PoseUpdated { target_index, pose: None } => {
            info!(frame = counter.load(Ordering::Relaxed), target = target_index, "target lost");
        }
        TrackingEvent::FrameDone { debug } => {
            if let Some(snapshot) = debug {
                match serde_json::to_string(snapshot) {
                    Ok(json) => debug!("{json}"),
                    Err(e) => debug!("debug snapshot not serializable: {e}"),
                }
            }
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    session.start_tracking(source)?;
    session.wait()?;

    let status = session.status();
    info!(frames = frame_count.load(Ordering::Relaxed), "sequence finished");
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
