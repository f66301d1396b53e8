//! sentinel-core — Face recognition primitives for the monitoring pipeline.
//!
//! Detection and descriptor extraction run via ONNX Runtime for CPU
//! inference; matching, gallery loading, and sighting deduplication are
//! pure logic on top.

pub mod dedup;
pub mod detector;
pub mod embedder;
pub mod encoder;
pub mod gallery;
pub mod matcher;
pub mod types;

pub use dedup::SightingGuard;
pub use detector::{FaceDetector, DEFAULT_DOWNSAMPLE};
pub use embedder::FaceEmbedder;
pub use encoder::{FaceEncoder, OnnxFaceEncoder};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
pub use types::{BoundingBox, Detection, FaceDescriptor, GalleryEntry, Identity, UNKNOWN_LABEL};
