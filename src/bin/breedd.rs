//! breedd - breed tracker daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by `--config`/`BREED_CONFIG`, then env)
//! 2. Ingests frames from the configured local source
//! 3. Hands each frame to the worker thread unless one is still in flight
//! 4. Every N tracked frames, renders that frame's tracked objects and saves it
//! 5. Logs pipeline health until the source ends or Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ab_glyph::FontArc;
use breed_tracker::overlay::{display_image, load_font};
use breed_tracker::{
    available_backends, FileConfig, FileSource, Frame, FrameHook, FrameOutcome, FramePipeline,
    FrameWorker, ImageCanvas, LabelTables, ObjectTracker, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML by extension).
    #[arg(long, env = "BREED_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many frames from the source.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Seed for the synthetic source.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = PipelineConfig::load_from(args.config.as_deref())?;
    log::info!(
        "backends available: {}",
        available_backends()
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let labels = Arc::new(LabelTables::load_lenient(&cfg.labels));
    let pipeline = Arc::new(FramePipeline::from_config(&cfg, labels)?);
    let tracker = pipeline.tracker();

    let font = match &cfg.overlay.font_path {
        Some(path) => Some(load_font(path)?),
        None => None,
    };
    let worker = match &cfg.overlay.output_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow!("failed to create overlay dir {}: {}", dir.display(), e))?;
            let hook = overlay_hook(dir.clone(), cfg.overlay.every_n_frames as u64, font);
            FrameWorker::spawn_with_hook(pipeline.clone(), hook)?
        }
        None => FrameWorker::spawn(pipeline.clone())?,
    };

    let mut source = FileSource::new(FileConfig {
        path: cfg.source.url.clone(),
        width: cfg.source.width,
        height: cfg.source.height,
        sensor_orientation: cfg.source.sensor_orientation,
        seed: args.seed,
    })?;
    source.connect()?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let frame_interval = Duration::from_secs_f64(1.0 / cfg.source.target_fps as f64);
    let mut last_health_log = Instant::now();
    let mut frames_read = 0u64;

    log::info!(
        "breedd running. source={} fps={} orientation={}",
        cfg.source.url,
        cfg.source.target_fps,
        cfg.source.sensor_orientation
    );

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let Some(frame) = source.next_frame()? else {
            log::info!("source exhausted after {} frames", frames_read);
            break;
        };
        frames_read += 1;
        worker.submit(frame);

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let source_stats = source.stats();
            let stats = pipeline.stats();
            log::info!(
                "source health={} frames={} path={} | processed={} dropped={} failed={} tracked={}",
                source.is_healthy(),
                source_stats.frames_captured,
                source_stats.path,
                stats.processed,
                stats.dropped,
                stats.failed,
                tracker.snapshot().map(|objs| objs.len()).unwrap_or(0)
            );
            last_health_log = Instant::now();
        }

        if args.max_frames.is_some_and(|max| frames_read >= max) {
            break;
        }
        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    worker.shutdown()?;
    let stats = pipeline.stats();
    log::info!(
        "breedd stopped: read={} processed={} dropped={} failed={}",
        frames_read,
        stats.processed,
        stats.dropped,
        stats.failed
    );
    Ok(())
}

/// Renders every `every_n`-th tracked frame with the tracker state it produced.
fn overlay_hook(dir: PathBuf, every_n: u64, font: Option<FontArc>) -> FrameHook {
    let mut tracked = 0u64;
    Box::new(
        move |frame: &Frame, outcome: FrameOutcome, tracker: &ObjectTracker| {
            if !matches!(outcome, FrameOutcome::Tracked { .. }) {
                return;
            }
            tracked += 1;
            if tracked % every_n != 0 {
                return;
            }
            let path = dir.join(format!("overlay_{:06}.png", frame.sequence));
            if let Err(e) = write_overlay(tracker, frame, font.clone(), &path) {
                log::warn!("overlay {} failed: {:#}", path.display(), e);
            }
        },
    )
}

fn write_overlay(
    tracker: &ObjectTracker,
    frame: &Frame,
    font: Option<FontArc>,
    path: &Path,
) -> Result<()> {
    let mut canvas = ImageCanvas::new(display_image(frame)?);
    if let Some(font) = font {
        canvas = canvas.with_font(font);
    }
    tracker.draw(&mut canvas)?;
    canvas.save(path)?;
    log::debug!("overlay written to {}", path.display());
    Ok(())
}
