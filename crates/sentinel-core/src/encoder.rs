//! The detection + description seam.
//!
//! [`FaceEncoder`] is what the gallery loader and the monitoring pipeline
//! actually depend on: give it raw RGB pixels, get back located faces with
//! descriptors. The production implementation composes the ONNX detector
//! and embedder; tests substitute deterministic stubs.

use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::Detection;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("{0}")]
    Other(String),
}

/// Locates faces in a packed RGB24 buffer and describes each one.
pub trait FaceEncoder {
    fn encode_faces(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, EncodeError>;
}

/// Production encoder: ONNX detector followed by ONNX embedder.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxFaceEncoder {
    pub fn new(detector: FaceDetector, embedder: FaceEmbedder) -> Self {
        Self { detector, embedder }
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode_faces(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, EncodeError> {
        let boxes = self.detector.detect(rgb, width, height)?;
        let mut detections = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            // A single bad crop must not discard the other faces in the frame.
            match self.embedder.embed(rgb, width, height, &bbox) {
                Ok(descriptor) => detections.push(Detection { bbox, descriptor }),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping face: descriptor extraction failed")
                }
            }
        }

        Ok(detections)
    }
}
