use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::config::ModelSettings;

use super::backend::{ClassifierBackend, DetectorBackend, ModelCapability};
use super::backends::{CpuBlobDetector, StubClassifier, StubDetector};

/// Model backend implementations, selected once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Scripted outputs; empty grids / fixed scores.
    Stub,
    /// Bright-region detector, no model file.
    Cpu,
    /// ONNX via tract (feature `backend-tract`).
    Tract,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Stub => "stub",
            BackendKind::Cpu => "cpu",
            BackendKind::Tract => "tract",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "cpu" => Ok(BackendKind::Cpu),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown backend '{}'", other)),
        }
    }
}

/// Backend kinds compiled into this build.
pub fn available_backends() -> Vec<BackendKind> {
    let mut kinds = vec![BackendKind::Stub, BackendKind::Cpu];
    if cfg!(feature = "backend-tract") {
        kinds.push(BackendKind::Tract);
    }
    kinds
}

/// Build the first-stage detector.
///
/// `num_classes` sizes the score rows of backends that synthesize grids.
pub fn build_detector(
    settings: &ModelSettings,
    num_classes: usize,
) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.detector_backend {
        BackendKind::Stub => Box::new(StubDetector::default()),
        BackendKind::Cpu => Box::new(CpuBlobDetector::new(settings.blob_class_index, num_classes)),
        BackendKind::Tract => build_tract_detector(settings)?,
    };
    if !backend.supports(ModelCapability::GridDetection) {
        return Err(anyhow!(
            "backend '{}' cannot run grid detection",
            backend.name()
        ));
    }
    backend.warm_up()?;
    log::info!("detector backend: {}", backend.name());
    Ok(backend)
}

/// Build the second-stage classifier.
///
/// `num_scores` sizes the stub classifier's score vector.
pub fn build_classifier(
    settings: &ModelSettings,
    num_scores: usize,
) -> Result<Box<dyn ClassifierBackend>> {
    let mut backend: Box<dyn ClassifierBackend> = match settings.classifier_backend {
        BackendKind::Stub => Box::new(StubClassifier::one_hot(
            num_scores,
            settings.stub_breed_index,
            1.0,
        )),
        BackendKind::Cpu => {
            return Err(anyhow!("backend 'cpu' has no classifier; use 'stub' or 'tract'"))
        }
        BackendKind::Tract => build_tract_classifier(settings)?,
    };
    if !backend.supports(ModelCapability::Classification) {
        return Err(anyhow!(
            "backend '{}' cannot run classification",
            backend.name()
        ));
    }
    backend.warm_up()?;
    log::info!("classifier backend: {}", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract_detector(settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = settings
        .detector_model
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires a detector model path"))?;
    Ok(Box::new(super::backends::TractDetector::new(
        path,
        settings.detector_input_size,
        settings.layout,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_detector(_settings: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}

#[cfg(feature = "backend-tract")]
fn build_tract_classifier(settings: &ModelSettings) -> Result<Box<dyn ClassifierBackend>> {
    let path = settings
        .classifier_model
        .as_ref()
        .ok_or_else(|| anyhow!("tract classifier requires a classifier model path"))?;
    Ok(Box::new(super::backends::TractClassifier::new(
        path,
        settings.classifier_input_size,
        settings.layout,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_classifier(_settings: &ModelSettings) -> Result<Box<dyn ClassifierBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() -> Result<()> {
        assert_eq!("CPU".parse::<BackendKind>()?, BackendKind::Cpu);
        assert_eq!(" stub ".parse::<BackendKind>()?, BackendKind::Stub);
        assert!("cuda".parse::<BackendKind>().is_err());
        Ok(())
    }

    #[test]
    fn builds_default_backends() -> Result<()> {
        let settings = ModelSettings::default();
        let detector = build_detector(&settings, 80)?;
        assert_eq!(detector.name(), "cpu");
        let classifier = build_classifier(&settings, 4)?;
        assert_eq!(classifier.name(), "stub");
        assert!(classifier.supports(ModelCapability::Classification));
        Ok(())
    }

    #[test]
    fn cpu_classifier_is_rejected() {
        let settings = ModelSettings {
            classifier_backend: BackendKind::Cpu,
            ..ModelSettings::default()
        };
        assert!(build_classifier(&settings, 4).is_err());
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_requires_feature() {
        let settings = ModelSettings {
            detector_backend: BackendKind::Tract,
            ..ModelSettings::default()
        };
        assert!(build_detector(&settings, 80).is_err());
    }
}
