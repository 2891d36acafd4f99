//! Local frame source.
//!
//! `FileSource` yields frames from either:
//! - `stub://<name>`: a synthetic scene with a bright square drifting over a
//!   dark background, for tests and demos
//! - a local image file, or a directory of images played back in name order
//!
//! Remote URLs are rejected.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Configuration for a local frame source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// `stub://<name>`, an image file, or a directory of images.
    pub path: String,
    /// Synthetic frame size (ignored for image files).
    pub width: u32,
    pub height: u32,
    /// Orientation reported with every frame.
    pub sensor_orientation: u32,
    /// Seed for the synthetic scene's jitter.
    pub seed: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: 640,
            height: 480,
            sensor_orientation: 0,
            seed: 0,
        }
    }
}

/// Local frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Images(ImageSequenceSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticSource::new(config))
        } else {
            FileBackend::Images(ImageSequenceSource::new(config))
        };
        Ok(Self { backend })
    }

    /// Open the source.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            FileBackend::Images(source) => source.connect(),
        }
    }

    /// Next frame, or `None` once a finite source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame().map(Some),
            FileBackend::Images(source) => source.next_frame(),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(source) => source.connected,
            FileBackend::Images(source) => source.connected,
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => FileStats {
                frames_captured: source.frame_count,
                path: source.config.path.clone(),
            },
            FileBackend::Images(source) => FileStats {
                frames_captured: source.frame_count,
                path: source.config.path.clone(),
            },
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: FileConfig,
    frame_count: u64,
    rng: StdRng,
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
    connected: bool,
}

impl SyntheticSource {
    const SUBJECT_SIDE: u32 = 96;

    fn new(config: FileConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            x: config.width as f32 / 4.0,
            y: config.height as f32 / 4.0,
            dx: 6.0,
            dy: 4.0,
            config,
            frame_count: 0,
            rng,
            connected: false,
        }
    }

    fn connect(&mut self) -> Result<()> {
        if self.config.width <= Self::SUBJECT_SIDE || self.config.height <= Self::SUBJECT_SIDE {
            return Err(anyhow!(
                "synthetic frames must be larger than {}px",
                Self::SUBJECT_SIDE
            ));
        }
        self.connected = true;
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("source not connected"));
        }
        self.frame_count += 1;
        self.advance();

        let (width, height) = (self.config.width, self.config.height);
        let mut image = RgbImage::from_pixel(width, height, Rgb([24, 24, 32]));
        let side = Self::SUBJECT_SIDE;
        let (x0, y0) = (self.x as u32, self.y as u32);
        for y in y0..(y0 + side).min(height) {
            for x in x0..(x0 + side).min(width) {
                image.put_pixel(x, y, Rgb([250, 245, 235]));
            }
        }

        let frame = Frame::from_image(image, self.config.sensor_orientation)?;
        Ok(frame.with_sequence(self.frame_count))
    }

    /// Drift with a little jitter, bouncing off the frame edges.
    fn advance(&mut self) {
        let max_x = self.config.width.saturating_sub(Self::SUBJECT_SIDE) as f32;
        let max_y = self.config.height.saturating_sub(Self::SUBJECT_SIDE) as f32;
        self.x += self.dx + self.rng.gen_range(-1.0..1.0);
        self.y += self.dy + self.rng.gen_range(-1.0..1.0);
        if self.x <= 0.0 || self.x >= max_x {
            self.dx = -self.dx;
        }
        if self.y <= 0.0 || self.y >= max_y {
            self.dy = -self.dy;
        }
        self.x = self.x.clamp(0.0, max_x);
        self.y = self.y.clamp(0.0, max_y);
    }
}

// ----------------------------------------------------------------------------
// Still images
// ----------------------------------------------------------------------------

struct ImageSequenceSource {
    config: FileConfig,
    files: Vec<PathBuf>,
    next: usize,
    frame_count: u64,
    connected: bool,
}

impl ImageSequenceSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            next: 0,
            frame_count: 0,
            connected: false,
        }
    }

    fn connect(&mut self) -> Result<()> {
        let path = Path::new(&self.config.path);
        self.files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to list {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(anyhow!("{} does not exist", path.display()));
        };
        if self.files.is_empty() {
            return Err(anyhow!("no images found in {}", path.display()));
        }
        self.connected = true;
        log::info!(
            "FileSource: connected to {} ({} images)",
            self.config.path,
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("source not connected"));
        }
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        self.frame_count += 1;
        let frame = Frame::from_image(image, self.config.sensor_orientation)?
            .with_sequence(self.frame_count);
        Ok(Some(frame))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
