//! Face descriptor extraction via ONNX Runtime.
//!
//! Crops a detected face from the full frame, resizes the crop to the
//! model input square, and runs a recognition network producing the
//! 128-dimensional descriptor used for gallery matching.

use crate::types::{BoundingBox, FaceDescriptor};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMB_INPUT_SIZE: u32 = 112;
const EMB_MEAN: f32 = 127.5;
const EMB_STD: f32 = 127.5;
const DESCRIPTOR_DIM: usize = 128;

/// Margin added around the detection box before cropping, as a fraction of
/// box size. Recognition models expect some forehead/chin context.
const CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    BoxOutOfFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX-backed descriptor extractor.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the recognition model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face recognition model"
        );

        Ok(Self { session })
    }

    /// Compute the descriptor for one detected face in an RGB24 frame.
    pub fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<FaceDescriptor, EmbedderError> {
        let crop = crop_face(rgb, width, height, face).ok_or(EmbedderError::BoxOutOfFrame)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(FaceDescriptor::new(raw.to_vec()))
    }
}

/// Crop the face region (with margin) and resize to the model input square.
///
/// Returns None when the box has no overlap with the frame at all.
fn crop_face(rgb: &[u8], width: u32, height: u32, face: &BoundingBox) -> Option<RgbImage> {
    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;

    let x0 = (face.x - margin_x).max(0.0) as u32;
    let y0 = (face.y - margin_y).max(0.0) as u32;
    let x1 = ((face.x + face.width + margin_x) as u32).min(width);
    let y1 = ((face.y + face.height + margin_y) as u32).min(height);

    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let img = RgbImage::from_raw(width, height, rgb[..(width * height * 3) as usize].to_vec())?;
    let crop = image::imageops::crop_imm(&img, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(image::imageops::resize(
        &crop,
        EMB_INPUT_SIZE,
        EMB_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

/// Build the NCHW float tensor from a 112x112 RGB crop.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = EMB_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - EMB_MEAN) / EMB_STD;
        }
    }

    tensor
}
