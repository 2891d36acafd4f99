//! Frame ingestion sources.
//!
//! - Synthetic scene (`stub://`), for tests and demos
//! - Local still images (single file or directory)
//!
//! Sources produce `Frame` values in RGB24; raw sensor buffers (NV12/NV21) are
//! converted by `normalize` when the frame is built.

pub mod file;
pub mod normalize;

pub use file::{FileConfig, FileSource, FileStats};
pub use normalize::PixelFormat;
