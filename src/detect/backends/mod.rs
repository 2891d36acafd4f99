pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::CpuBlobDetector;
pub use stub::{StubClassifier, StubDetector};

#[cfg(feature = "backend-tract")]
pub use tract::{TractClassifier, TractDetector};
