//! Frame admission and processing.
//!
//! At most one frame is in flight. A frame offered while another is being
//! processed is dropped, never queued. The in-flight flag is released by an
//! RAII guard, so a frame that fails part-way still frees the pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::classify::BreedClassifier;
use crate::config::PipelineConfig;
use crate::detect::{build_classifier, build_detector};
use crate::frame::Frame;
use crate::labels::LabelTables;
use crate::recognizer::{BreedRecognizer, Recognizer};
use crate::tracker::ObjectTracker;

/// What happened to an offered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// All stages ran; `detections` were handed to the tracker.
    Tracked { detections: usize },
    /// Another frame was in flight.
    Dropped,
    /// A stage failed; the frame was abandoned.
    Failed,
}

/// Counters since startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub processed: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Proof that the caller owns the single in-flight slot.
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct FramePipeline {
    recognizer: Mutex<Box<dyn Recognizer>>,
    tracker: Arc<ObjectTracker>,
    in_flight: Arc<AtomicBool>,
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl FramePipeline {
    pub fn new(recognizer: Box<dyn Recognizer>, tracker: Arc<ObjectTracker>) -> Self {
        Self {
            recognizer: Mutex::new(recognizer),
            tracker,
            in_flight: Arc::new(AtomicBool::new(false)),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Assemble backends, recognizer and tracker from configuration.
    pub fn from_config(config: &PipelineConfig, labels: Arc<LabelTables>) -> Result<Self> {
        let detector = build_detector(&config.models, labels.coarse().len())?;
        let classifier = BreedClassifier::new(
            build_classifier(&config.models, labels.breeds().max_index() + 1)?,
            labels.clone(),
            config.models.classifier_input_size,
        );
        let recognizer =
            BreedRecognizer::new(detector, classifier, labels, config.recognizer_settings());
        let tracker = Arc::new(ObjectTracker::new(config.tracker.clone()));
        Ok(Self::new(Box::new(recognizer), tracker))
    }

    /// Shared handle to the tracker, for rendering from another thread.
    pub fn tracker(&self) -> Arc<ObjectTracker> {
        self.tracker.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the in-flight slot, or count a dropped frame.
    pub fn try_admit(&self) -> Option<InFlightGuard> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(InFlightGuard {
                flag: self.in_flight.clone(),
            })
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Admit and process a frame on the calling thread.
    pub fn offer(&self, frame: &Frame) -> FrameOutcome {
        match self.try_admit() {
            Some(guard) => self.process_admitted(guard, frame),
            None => {
                log::debug!("frame {} dropped: pipeline busy", frame.sequence);
                FrameOutcome::Dropped
            }
        }
    }

    /// Process a frame whose admission is held by `guard`.
    pub fn process_admitted(&self, guard: InFlightGuard, frame: &Frame) -> FrameOutcome {
        let outcome = self.process(frame);
        drop(guard);
        outcome
    }

    /// Run every stage and count the outcome. The caller holds the slot.
    fn process(&self, frame: &Frame) -> FrameOutcome {
        match self.run(frame) {
            Ok(detections) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Tracked { detections }
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("frame {} aborted: {:#}", frame.sequence, e);
                FrameOutcome::Failed
            }
        }
    }

    fn run(&self, frame: &Frame) -> Result<usize> {
        self.tracker
            .set_frame_configuration(frame.width, frame.height, frame.sensor_orientation)?;
        let detections = {
            let mut recognizer = self
                .recognizer
                .lock()
                .map_err(|_| anyhow!("recognizer lock poisoned"))?;
            recognizer.recognize(frame)?
        };
        self.tracker.track_results(&detections)?;
        Ok(detections.len())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Called on the worker thread after each frame, before its slot is
/// released, so the tracker still holds that frame's results.
pub type FrameHook = Box<dyn FnMut(&Frame, FrameOutcome, &ObjectTracker) + Send>;

/// Runs frame processing on a dedicated thread.
pub struct FrameWorker {
    pipeline: Arc<FramePipeline>,
    sender: Option<Sender<(InFlightGuard, Frame)>>,
    handle: Option<JoinHandle<()>>,
}

impl FrameWorker {
    pub fn spawn(pipeline: Arc<FramePipeline>) -> Result<Self> {
        Self::spawn_with_hook(
            pipeline,
            Box::new(|_: &Frame, _: FrameOutcome, _: &ObjectTracker| {}),
        )
    }

    /// Spawn a worker that runs `hook` after every processed frame.
    pub fn spawn_with_hook(pipeline: Arc<FramePipeline>, mut hook: FrameHook) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<(InFlightGuard, Frame)>();
        let worker_pipeline = pipeline.clone();
        let handle = std::thread::Builder::new()
            .name("frame-worker".to_string())
            .spawn(move || {
                for (guard, frame) in receiver {
                    let outcome = worker_pipeline.process(&frame);
                    hook(&frame, outcome, worker_pipeline.tracker.as_ref());
                    drop(guard);
                }
            })
            .map_err(|e| anyhow!("failed to spawn frame worker: {}", e))?;
        Ok(Self {
            pipeline,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Hand a frame to the worker unless one is already in flight.
    ///
    /// Returns false when the frame was dropped.
    pub fn submit(&self, frame: Frame) -> bool {
        let Some(guard) = self.pipeline.try_admit() else {
            log::debug!("frame {} dropped: worker busy", frame.sequence);
            return false;
        };
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.send((guard, frame)) {
            Ok(()) => true,
            Err(mpsc::SendError((_guard, frame))) => {
                self.pipeline.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("frame {} lost: frame worker has stopped", frame.sequence);
                false
            }
        }
    }

    /// Finish the in-flight frame, if any, and stop the thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("frame worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{}", e);
        }
    }
}
