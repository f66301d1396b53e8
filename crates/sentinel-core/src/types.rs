use serde::{Deserialize, Serialize};

/// Label assigned to faces that match no gallery entry within tolerance.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, in full-frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Fixed-length face descriptor vector, compared by Euclidean distance.
///
/// Immutable once computed; two descriptors within [`crate::matcher::DEFAULT_TOLERANCE`]
/// of each other are considered the same person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor. Lower = more similar.
    pub fn distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One known identity: the file stem of a reference image plus the
/// descriptor computed from that image's first detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub descriptor: FaceDescriptor,
}

/// One face found in a frame: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub descriptor: FaceDescriptor,
}

/// Outcome of matching a probe descriptor against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    /// Label as persisted in the detection log.
    pub fn label(&self) -> &str {
        match self {
            Identity::Known(name) => name,
            Identity::Unknown => UNKNOWN_LABEL,
        }
    }

    /// Unknown faces are intrusions and trigger an alert.
    pub fn is_alert(&self) -> bool {
        matches!(self, Identity::Unknown)
    }
}
