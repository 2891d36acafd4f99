//! demo - end-to-end synthetic run of the breed tracker

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use breed_tracker::overlay::{display_image, load_font};
use breed_tracker::{
    BreedClassifier, BreedRecognizer, BreedVocabulary, CpuBlobDetector, DrawList, FileConfig,
    FileSource, FrameOutcome, FramePipeline, ImageCanvas, LabelTables, ObjectTracker,
    RecognizerSettings, StubClassifier, TrackedObject, TrackerConfig,
};

#[path = "../ui.rs"]
mod ui;

const DEFAULT_SOURCE: &str = "stub://demo";
const DOG_CLASS: usize = 16;
/// Classifier outputs are 1-based against the code table; 2 is beagle.
const DEMO_BREED_INDEX: usize = 2;

const COARSE_LABELS: &str = "person\nbicycle\ncar\nmotorcycle\nairplane\nbus\ntrain\ntruck\n\
boat\ntraffic light\nfire hydrant\nstop sign\nparking meter\nbench\nbird\ncat\ndog\n";
const BREED_CODES: &str = "n02085620\nn02088364\nn02099601\nn02110958\n";
const BREED_NAMES: &str = "n02085620\tChihuahua\nn02088364\tbeagle\n\
n02099601\tgolden retriever\nn02110958\tpug\n";
const BREED_WHITELIST: &str = "n02085620\nn02088364\nn02099601\nn02110958\n";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic frames.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Synthetic frames per second of run time.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Output directory for overlays and the summary.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Write an overlay PNG every N frames.
    #[arg(long, default_value_t = 10)]
    overlay_every: u64,
    /// Font for overlay labels; without one only the label plates are drawn.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Optional deterministic seed for the synthetic scene.
    #[arg(long)]
    seed: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct DemoSummary {
    frames: u64,
    processed: u64,
    dropped: u64,
    failed: u64,
    distinct_tracks: usize,
    overlays_written: usize,
    tracked: Vec<TrackedObject>,
    overlay: DrawList,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.overlay_every == 0 {
        return Err(anyhow!("overlay-every must be >= 1"));
    }
    let ui = ui::Ui::from_flag(&args.ui, std::io::stderr().is_terminal());

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let (pipeline, font) = {
        let _stage = ui.stage("Build pipeline");
        let labels = Arc::new(LabelTables::new(
            LabelTables::parse_coarse(COARSE_LABELS),
            BreedVocabulary::parse(BREED_CODES, BREED_NAMES, BREED_WHITELIST),
        ));
        let detector = CpuBlobDetector::new(DOG_CLASS, labels.coarse().len());
        let classifier = BreedClassifier::new(
            Box::new(StubClassifier::one_hot(
                labels.breeds().max_index() + 1,
                DEMO_BREED_INDEX,
                0.93,
            )),
            labels.clone(),
            breed_tracker::classify::DEFAULT_CLASSIFIER_INPUT_SIZE,
        );
        let recognizer = BreedRecognizer::new(
            Box::new(detector),
            classifier,
            labels,
            RecognizerSettings::default(),
        );
        let tracker = Arc::new(ObjectTracker::new(TrackerConfig::default()));
        let font = args.font.as_deref().map(load_font).transpose()?;
        (FramePipeline::new(Box::new(recognizer), tracker), font)
    };

    let mut source = FileSource::new(FileConfig {
        path: DEFAULT_SOURCE.to_string(),
        seed: args.seed.unwrap_or_default(),
        ..FileConfig::default()
    })?;
    source.connect()?;

    let total_frames = args.seconds.saturating_mul(args.fps as u64);
    let mut track_ids = BTreeSet::new();
    let mut overlays_written = 0usize;
    let mut last_geometry = None;

    {
        let _stage = ui.stage("Track synthetic frames");
        let bar = ui.frames(total_frames);
        for _ in 0..total_frames {
            let Some(frame) = source.next_frame()? else {
                break;
            };
            if let FrameOutcome::Tracked { detections } = pipeline.offer(&frame) {
                bar.set_message(format!("{detections} detections"));
            }
            let tracked = pipeline.tracker().snapshot()?;
            track_ids.extend(tracked.iter().map(|obj| obj.track_id));

            if frame.sequence % args.overlay_every == 0 {
                let path = out_dir.join(format!("overlay_{:04}.png", frame.sequence));
                write_overlay(&pipeline, &frame, font.clone(), &path)?;
                overlays_written += 1;
            }
            last_geometry = Some(display_image(&frame)?.dimensions());
            bar.inc(1);
        }
        bar.finish_and_clear();
    }

    let summary_path = out_dir.join("summary.json");
    let stats = pipeline.stats();
    {
        let _stage = ui.stage("Write summary");
        let (width, height) = last_geometry.unwrap_or((0, 0));
        let mut overlay = DrawList::new(width, height);
        pipeline.tracker().draw(&mut overlay)?;
        let summary = DemoSummary {
            frames: total_frames,
            processed: stats.processed,
            dropped: stats.dropped,
            failed: stats.failed,
            distinct_tracks: track_ids.len(),
            overlays_written,
            tracked: pipeline.tracker().snapshot()?,
            overlay,
        };
        let json = serde_json::to_vec_pretty(&summary)?;
        fs::write(&summary_path, json)
            .with_context(|| format!("writing summary to {}", summary_path.display()))?;
    }

    println!("demo summary:");
    println!("  frames processed: {}", stats.processed);
    println!("  frames dropped: {}", stats.dropped);
    println!("  frames failed: {}", stats.failed);
    println!("  distinct tracks: {}", track_ids.len());
    println!("  overlays written: {}", overlays_written);
    println!("  summary: {}", summary_path.display());
    println!("next steps:");
    println!("  ls -la {}", out_dir.display());

    if stats.failed > 0 {
        return Err(anyhow!("{} frames failed", stats.failed));
    }
    Ok(())
}

fn write_overlay(
    pipeline: &FramePipeline,
    frame: &breed_tracker::Frame,
    font: Option<ab_glyph::FontArc>,
    path: &Path,
) -> Result<()> {
    let mut canvas = ImageCanvas::new(display_image(frame)?);
    if let Some(font) = font {
        canvas = canvas.with_font(font);
    }
    pipeline.tracker().draw(&mut canvas)?;
    canvas.save(path)
}
