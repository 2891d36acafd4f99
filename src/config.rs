use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::classify::DEFAULT_CLASSIFIER_INPUT_SIZE;
use crate::detect::{filter, nms, BackendKind, TensorLayout};
use crate::labels::LabelPaths;
use crate::recognizer::RecognizerSettings;
use crate::tracker::{TrackerConfig, DEFAULT_MIN_SIZE, DEFAULT_TOLERANCE};

const DEFAULT_SOURCE_URL: &str = "stub://backyard";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 416;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_BREED_THRESHOLD: f32 = 0.5;
/// Coarse "dog" class of the 80-class vocabulary.
const DEFAULT_BLOB_CLASS_INDEX: usize = 16;
const DEFAULT_STUB_BREED_INDEX: usize = 1;
const DEFAULT_OVERLAY_EVERY: u32 = 10;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    source: Option<SourceConfigFile>,
    models: Option<ModelConfigFile>,
    labels: Option<LabelConfigFile>,
    thresholds: Option<ThresholdConfigFile>,
    allowed_classes: Option<Vec<usize>>,
    tracker: Option<TrackerConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    sensor_orientation: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    detector_backend: Option<BackendKind>,
    classifier_backend: Option<BackendKind>,
    detector_model: Option<PathBuf>,
    classifier_model: Option<PathBuf>,
    detector_input_size: Option<u32>,
    classifier_input_size: Option<u32>,
    layout: Option<TensorLayout>,
}

#[derive(Debug, Deserialize, Default)]
struct LabelConfigFile {
    coarse: Option<PathBuf>,
    codes: Option<PathBuf>,
    code_names: Option<PathBuf>,
    whitelist: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdConfigFile {
    score: Option<f32>,
    iou: Option<f32>,
    breed: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    min_size: Option<f32>,
    tolerance_x: Option<f32>,
    tolerance_y: Option<f32>,
    mirror: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    output_dir: Option<PathBuf>,
    font_path: Option<PathBuf>,
    every_n_frames: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceSettings,
    pub models: ModelSettings,
    pub labels: LabelPaths,
    pub thresholds: ThresholdSettings,
    pub allowed_classes: BTreeSet<usize>,
    pub tracker: TrackerConfig,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub sensor_orientation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub detector_backend: BackendKind,
    pub classifier_backend: BackendKind,
    pub detector_model: Option<PathBuf>,
    pub classifier_model: Option<PathBuf>,
    pub detector_input_size: u32,
    pub classifier_input_size: u32,
    pub layout: TensorLayout,
    /// Class reported by the CPU blob detector.
    pub blob_class_index: usize,
    /// Score index the stub classifier marks as certain.
    pub stub_breed_index: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            detector_backend: BackendKind::Cpu,
            classifier_backend: BackendKind::Stub,
            detector_model: None,
            classifier_model: None,
            detector_input_size: DEFAULT_DETECTOR_INPUT_SIZE,
            classifier_input_size: DEFAULT_CLASSIFIER_INPUT_SIZE,
            layout: TensorLayout::default(),
            blob_class_index: DEFAULT_BLOB_CLASS_INDEX,
            stub_breed_index: DEFAULT_STUB_BREED_INDEX,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSettings {
    pub score: f32,
    pub iou: f32,
    pub breed: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySettings {
    /// Where rendered overlays are written; none disables rendering to disk.
    pub output_dir: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub every_n_frames: u32,
}

impl PipelineConfig {
    /// Load from the file named by `BREED_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BREED_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file path (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let models = file.models.unwrap_or_default();
        let labels = file.labels.unwrap_or_default();
        let thresholds = file.thresholds.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let model_defaults = ModelSettings::default();

        Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
                sensor_orientation: source.sensor_orientation.unwrap_or(0),
            },
            models: ModelSettings {
                detector_backend: models
                    .detector_backend
                    .unwrap_or(model_defaults.detector_backend),
                classifier_backend: models
                    .classifier_backend
                    .unwrap_or(model_defaults.classifier_backend),
                detector_model: models.detector_model,
                classifier_model: models.classifier_model,
                detector_input_size: models
                    .detector_input_size
                    .unwrap_or(model_defaults.detector_input_size),
                classifier_input_size: models
                    .classifier_input_size
                    .unwrap_or(model_defaults.classifier_input_size),
                layout: models.layout.unwrap_or_default(),
                ..model_defaults
            },
            labels: LabelPaths {
                coarse: labels.coarse,
                codes: labels.codes,
                code_names: labels.code_names,
                whitelist: labels.whitelist,
            },
            thresholds: ThresholdSettings {
                score: thresholds.score.unwrap_or(DEFAULT_SCORE_THRESHOLD),
                iou: thresholds.iou.unwrap_or(nms::DEFAULT_IOU_THRESHOLD),
                breed: thresholds.breed.unwrap_or(DEFAULT_BREED_THRESHOLD),
            },
            allowed_classes: file
                .allowed_classes
                .map(|classes| classes.into_iter().collect())
                .unwrap_or_else(filter::default_allowed_classes),
            tracker: TrackerConfig {
                min_size: tracker.min_size.unwrap_or(DEFAULT_MIN_SIZE),
                tolerance_x: tracker.tolerance_x.unwrap_or(DEFAULT_TOLERANCE),
                tolerance_y: tracker.tolerance_y.unwrap_or(DEFAULT_TOLERANCE),
                mirror: tracker.mirror.unwrap_or(false),
            },
            overlay: OverlaySettings {
                output_dir: overlay.output_dir,
                font_path: overlay.font_path,
                every_n_frames: overlay.every_n_frames.unwrap_or(DEFAULT_OVERLAY_EVERY),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("BREED_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fps) = env_value("BREED_TARGET_FPS") {
            self.source.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("BREED_TARGET_FPS must be an integer"))?;
        }
        if let Some(orientation) = env_value("BREED_SENSOR_ORIENTATION") {
            self.source.sensor_orientation = orientation
                .parse()
                .map_err(|_| anyhow!("BREED_SENSOR_ORIENTATION must be an integer"))?;
        }
        if let Some(kind) = env_value("BREED_DETECTOR_BACKEND") {
            self.models.detector_backend = kind.parse()?;
        }
        if let Some(kind) = env_value("BREED_CLASSIFIER_BACKEND") {
            self.models.classifier_backend = kind.parse()?;
        }
        if let Some(path) = env_value("BREED_DETECTOR_MODEL") {
            self.models.detector_model = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value("BREED_CLASSIFIER_MODEL") {
            self.models.classifier_model = Some(PathBuf::from(path));
        }
        if let Some(value) = env_value("BREED_SCORE_THRESHOLD") {
            self.thresholds.score = parse_threshold("BREED_SCORE_THRESHOLD", &value)?;
        }
        if let Some(value) = env_value("BREED_IOU_THRESHOLD") {
            self.thresholds.iou = parse_threshold("BREED_IOU_THRESHOLD", &value)?;
        }
        if let Some(value) = env_value("BREED_BREED_THRESHOLD") {
            self.thresholds.breed = parse_threshold("BREED_BREED_THRESHOLD", &value)?;
        }
        if let Some(classes) = env_value("BREED_ALLOWED_CLASSES") {
            let parsed = split_csv(&classes)
                .into_iter()
                .map(|entry| {
                    entry.parse::<usize>().map_err(|_| {
                        anyhow!("BREED_ALLOWED_CLASSES entry '{}' is not a class index", entry)
                    })
                })
                .collect::<Result<BTreeSet<usize>>>()?;
            if !parsed.is_empty() {
                self.allowed_classes = parsed;
            }
        }
        if let Some(dir) = env_value("BREED_OVERLAY_DIR") {
            self.overlay.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = env_value("BREED_FONT_PATH") {
            self.overlay.font_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be >= 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if self.source.sensor_orientation % 90 != 0 {
            return Err(anyhow!(
                "sensor_orientation must be a multiple of 90, got {}",
                self.source.sensor_orientation
            ));
        }
        self.source.sensor_orientation %= 360;
        if self.models.detector_input_size == 0 || self.models.classifier_input_size == 0 {
            return Err(anyhow!("model input sizes must be non-zero"));
        }
        for (name, value) in [
            ("score", self.thresholds.score),
            ("iou", self.thresholds.iou),
            ("breed", self.thresholds.breed),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} threshold must be within [0, 1], got {}", name, value));
            }
        }
        if self.allowed_classes.is_empty() {
            return Err(anyhow!("allowed_classes must not be empty"));
        }
        if self.tracker.min_size.is_nan() || self.tracker.min_size < 0.0 {
            return Err(anyhow!("tracker min_size must be >= 0"));
        }
        if self.tracker.tolerance_x.is_nan()
            || self.tracker.tolerance_y.is_nan()
            || self.tracker.tolerance_x <= 0.0
            || self.tracker.tolerance_y <= 0.0
        {
            return Err(anyhow!("tracker tolerances must be > 0"));
        }
        if self.overlay.every_n_frames == 0 {
            return Err(anyhow!("overlay every_n_frames must be >= 1"));
        }
        Ok(())
    }

    /// Settings for `BreedRecognizer`.
    pub fn recognizer_settings(&self) -> RecognizerSettings {
        RecognizerSettings {
            input_size: self.models.detector_input_size,
            score_threshold: self.thresholds.score,
            iou_threshold: self.thresholds.iou,
            breed_threshold: self.thresholds.breed,
            allowed_classes: self.allowed_classes.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_threshold(key: &str, value: &str) -> Result<f32> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number", key))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
