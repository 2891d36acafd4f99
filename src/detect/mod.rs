//! First-stage detection: model backends, grid decoding, class filtering and NMS.

mod backend;
pub mod backends;
pub mod decode;
pub mod filter;
pub mod nms;
mod registry;
mod result;

pub use backend::{
    ClassifierBackend, DetectorBackend, ModelCapability, ModelInput, RawGrid, TensorLayout,
};
pub use backends::{CpuBlobDetector, StubClassifier, StubDetector};
pub use registry::{available_backends, build_classifier, build_detector, BackendKind};
pub use result::Detection;
