use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::{
    ClassifierBackend, DetectorBackend, ModelCapability, ModelInput, RawGrid,
};

/// Scripted detector for tests and demos.
///
/// Returns queued grids in order, then repeats the fallback grid.
pub struct StubDetector {
    queued: VecDeque<Result<RawGrid, String>>,
    fallback: RawGrid,
    calls: u64,
}

impl StubDetector {
    pub fn new(fallback: RawGrid) -> Self {
        Self {
            queued: VecDeque::new(),
            fallback,
            calls: 0,
        }
    }

    /// Queue a grid to be returned by the next unanswered `detect` call.
    pub fn push(&mut self, grid: RawGrid) {
        self.queued.push_back(Ok(grid));
    }

    /// Queue an inference failure.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.queued.push_back(Err(message.into()));
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new(RawGrid::default())
    }
}

impl DetectorBackend for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: ModelCapability) -> bool {
        matches!(capability, ModelCapability::GridDetection)
    }

    fn detect(&mut self, _input: &ModelInput) -> Result<RawGrid> {
        self.calls += 1;
        match self.queued.pop_front() {
            Some(Ok(grid)) => Ok(grid),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Classifier that always answers with the same score vector.
pub struct StubClassifier {
    scores: Vec<f32>,
}

impl StubClassifier {
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }

    /// `len` scores, all zero except `hot_index` which gets `score`.
    pub fn one_hot(len: usize, hot_index: usize, score: f32) -> Self {
        let mut scores = vec![0.0; len];
        if let Some(slot) = scores.get_mut(hot_index) {
            *slot = score;
        }
        Self::new(scores)
    }
}

impl ClassifierBackend for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: ModelCapability) -> bool {
        matches!(capability, ModelCapability::Classification)
    }

    fn classify(&mut self, _input: &ModelInput) -> Result<Vec<f32>> {
        Ok(self.scores.clone())
    }
}
