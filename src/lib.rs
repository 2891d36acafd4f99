//! Breed Tracker
//!
//! Real-time dog detection, breed classification and frame-to-frame tracking.
//!
//! # Architecture
//!
//! Each admitted frame runs through two model stages and a tracker:
//!
//! 1. **Detect**: a grid detector scores every cell against a coarse label set;
//!    `decode` turns cells into boxes, `filter` keeps the dog classes and
//!    `nms` removes duplicates.
//! 2. **Classify**: each surviving box is cropped and scored by a breed
//!    classifier. A box fans out into one detection per breed above threshold.
//! 3. **Track**: `ObjectTracker` carries identity and colour across frames by
//!    center proximity and renders overlays through the `Canvas` trait.
//!
//! At most one frame is in flight (`FramePipeline`); frames arriving while
//! another is processed are dropped.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames and sensor orientation
//! - `ingest`: frame sources (synthetic scene, local images)
//! - `detect`: model backends, decoding, class filter, NMS
//! - `classify`: second-stage breed labelling
//! - `recognizer`: the two stages behind one trait
//! - `tracker`, `overlay`: identity across frames, drawing
//! - `pipeline`: admission control and the worker thread
//! - `config`, `labels`: runtime configuration and label tables

pub mod classify;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod labels;
pub mod overlay;
pub mod pipeline;
pub mod recognizer;
pub mod tracker;

pub use classify::BreedClassifier;
pub use config::{
    ModelSettings, OverlaySettings, PipelineConfig, SourceSettings, ThresholdSettings,
};
pub use detect::{
    available_backends, build_classifier, build_detector, BackendKind, ClassifierBackend,
    CpuBlobDetector, Detection, DetectorBackend, ModelInput, RawGrid, StubClassifier,
    StubDetector,
};
pub use frame::Frame;
pub use geometry::Rect;
pub use ingest::{FileConfig, FileSource, FileStats, PixelFormat};
pub use labels::{BreedVocabulary, LabelPaths, LabelTables};
pub use overlay::{Canvas, DrawList, ImageCanvas, PALETTE};
pub use pipeline::{FrameHook, FrameOutcome, FramePipeline, FrameWorker, PipelineStats};
pub use recognizer::{BreedRecognizer, Recognizer, RecognizerSettings};
pub use tracker::{ObjectTracker, TrackedObject, TrackerConfig};
