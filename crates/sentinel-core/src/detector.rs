//! ONNX face detector with frame downsampling.
//!
//! To bound per-frame cost the input frame is downsampled by an integer
//! factor before inference and the resulting boxes are scaled back up, so
//! callers always see full-frame coordinates. The model contract is a
//! detection network exporting per-candidate scores `[1, N]` and normalized
//! corner boxes `[1, N, 4]` (decode and priors baked into the graph).

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 320;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;

/// Default frame downsample factor (half resolution).
pub const DEFAULT_DOWNSAMPLE: u32 = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: expected {expected} RGB bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for mapping model-input coordinates back to frame coordinates.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// ONNX-backed face detector.
pub struct FaceDetector {
    session: Session,
    downsample: u32,
}

impl FaceDetector {
    /// Load the detection model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        Self::load_with_downsample(model_path, DEFAULT_DOWNSAMPLE)
    }

    /// Load with an explicit downsample factor (>= 1).
    ///
    /// Larger factors are cheaper but miss small faces; the factor only
    /// affects cost/accuracy, never the coordinate system of the output.
    pub fn load_with_downsample(model_path: &str, downsample: u32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            downsample,
            "loaded face detection model"
        );

        Ok(Self {
            session,
            downsample: downsample.max(1),
        })
    }

    /// Detect faces in a packed RGB24 frame.
    ///
    /// Returns boxes in full-frame pixel coordinates, sorted by confidence.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(DetectorError::InvalidFrame {
                expected,
                actual: rgb.len(),
            });
        }

        let (small, sw, sh) = downsample_rgb(rgb, width, height, self.downsample);
        let (input, letterbox) = preprocess(&small, sw, sh);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        if outputs.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model must export scores and boxes, got {} outputs",
                outputs.len()
            )));
        }

        let (_, a) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output 0: {e}")))?;
        let (_, b) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output 1: {e}")))?;

        let (scores, boxes) = split_outputs(a, b).ok_or_else(|| {
            DetectorError::InferenceFailed(format!(
                "cannot pair outputs as scores/boxes (lengths {} and {})",
                a.len(),
                b.len()
            ))
        })?;

        let mut detections = Vec::new();
        for (i, &score) in scores.iter().enumerate() {
            if score < DET_CONFIDENCE_THRESHOLD {
                continue;
            }
            let bx = &boxes[i * 4..i * 4 + 4];
            let bbox = unmap_box(bx[0], bx[1], bx[2], bx[3], score, letterbox, self.downsample);
            if bbox.width > 0.0 && bbox.height > 0.0 {
                detections.push(bbox);
            }
        }

        detections.sort_by(|l, r| r.confidence.total_cmp(&l.confidence));
        let kept = nms(detections, DET_NMS_THRESHOLD);

        tracing::debug!(faces = kept.len(), "detection pass complete");
        Ok(kept)
    }
}

/// Average-pool an RGB24 buffer by an integer factor.
fn downsample_rgb(rgb: &[u8], width: u32, height: u32, factor: u32) -> (Vec<u8>, u32, u32) {
    if factor <= 1 {
        return (rgb.to_vec(), width, height);
    }
    let f = factor as usize;
    let sw = (width as usize / f).max(1);
    let sh = (height as usize / f).max(1);
    let w = width as usize;
    let mut out = Vec::with_capacity(sw * sh * 3);

    for oy in 0..sh {
        for ox in 0..sw {
            let mut acc = [0u32; 3];
            for dy in 0..f {
                for dx in 0..f {
                    let idx = ((oy * f + dy) * w + ox * f + dx) * 3;
                    acc[0] += rgb[idx] as u32;
                    acc[1] += rgb[idx + 1] as u32;
                    acc[2] += rgb[idx + 2] as u32;
                }
            }
            let n = (f * f) as u32;
            out.push((acc[0] / n) as u8);
            out.push((acc[1] / n) as u8);
            out.push((acc[2] / n) as u8);
        }
    }
    (out, sw as u32, sh as u32)
}

/// Letterbox-resize into the model input square and build the NCHW tensor.
fn preprocess(rgb: &[u8], width: u32, height: u32) -> (Array4<f32>, LetterboxInfo) {
    let size = DET_INPUT_SIZE;
    let letterbox = compute_letterbox(width, height, size);

    let scaled_w = ((width as f32 * letterbox.scale) as u32).max(1);
    let scaled_h = ((height as f32 * letterbox.scale) as u32).max(1);

    let img = RgbImage::from_raw(width, height, rgb[..(width * height * 3) as usize].to_vec())
        .unwrap_or_else(|| RgbImage::new(width, height));
    let resized = image::imageops::resize(&img, scaled_w, scaled_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..scaled_h.min(size as u32) {
        for x in 0..scaled_w.min(size as u32) {
            let px = resized.get_pixel(x, y);
            let ty = y as usize + letterbox.pad_y as usize;
            let tx = x as usize + letterbox.pad_x as usize;
            if ty >= size || tx >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (px[c] as f32 - DET_MEAN) / DET_STD;
            }
        }
    }
    (tensor, letterbox)
}

/// Scale and centering pads for fitting `src` into an `input`-sized square.
fn compute_letterbox(src_w: u32, src_h: u32, input: usize) -> LetterboxInfo {
    let scale = (input as f32 / src_w as f32).min(input as f32 / src_h as f32);
    let pad_x = (input as f32 - src_w as f32 * scale) / 2.0;
    let pad_y = (input as f32 - src_h as f32 * scale) / 2.0;
    LetterboxInfo {
        scale,
        pad_x,
        pad_y,
    }
}

/// Map normalized model-space corners back to full-frame pixel coordinates.
///
/// Reverses the letterbox, then multiplies by the downsample factor so that
/// detection output and display share one coordinate system.
fn unmap_box(
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    lb: LetterboxInfo,
    downsample: u32,
) -> BoundingBox {
    let input = DET_INPUT_SIZE as f32;
    let up = downsample as f32;
    let fx1 = ((x1 * input - lb.pad_x) / lb.scale).max(0.0) * up;
    let fy1 = ((y1 * input - lb.pad_y) / lb.scale).max(0.0) * up;
    let fx2 = ((x2 * input - lb.pad_x) / lb.scale).max(0.0) * up;
    let fy2 = ((y2 * input - lb.pad_y) / lb.scale).max(0.0) * up;
    BoundingBox {
        x: fx1,
        y: fy1,
        width: (fx2 - fx1).max(0.0),
        height: (fy2 - fy1).max(0.0),
        confidence,
    }
}

/// Pair the two raw output tensors as (scores, boxes) by length.
fn split_outputs<'a>(a: &'a [f32], b: &'a [f32]) -> Option<(&'a [f32], &'a [f32])> {
    if !a.is_empty() && b.len() == a.len() * 4 {
        Some((a, b))
    } else if !b.is_empty() && a.len() == b.len() * 4 {
        Some((b, a))
    } else {
        None
    }
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression over confidence-sorted boxes.
fn nms(sorted: Vec<BoundingBox>, threshold: f32) -> Vec<BoundingBox> {
    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in sorted {
        if kept.iter().all(|k| iou(k, &candidate) < threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_averages_blocks() {
        // 2x2 RGB frame, each pixel a different gray level; factor 2 -> 1 pixel.
        let rgb = vec![
            10, 10, 10, 20, 20, 20, //
            30, 30, 30, 40, 40, 40,
        ];
        let (out, w, h) = downsample_rgb(&rgb, 2, 2, 2);
        assert_eq!((w, h), (1, 1));
        assert_eq!(out, vec![25, 25, 25]);
    }

    #[test]
    fn test_downsample_factor_one_is_identity() {
        let rgb = vec![1, 2, 3, 4, 5, 6];
        let (out, w, h) = downsample_rgb(&rgb, 2, 1, 1);
        assert_eq!((w, h), (2, 1));
        assert_eq!(out, rgb);
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = compute_letterbox(320, 160, DET_INPUT_SIZE);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert!((lb.pad_x - 0.0).abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_unmap_box_round_trip() {
        // A face filling the central half of a 320x160 frame at downsample 2:
        // model space sees corners (0.25, 0.375)..(0.75, 0.625) after padding.
        let lb = compute_letterbox(320, 160, DET_INPUT_SIZE);
        let bbox = unmap_box(0.25, 0.375, 0.75, 0.625, 0.9, lb, 2);
        assert!((bbox.x - 160.0).abs() < 1.0);
        assert!((bbox.y - 80.0).abs() < 1.0);
        assert!((bbox.width - 320.0).abs() < 1.0);
        assert!((bbox.height - 160.0).abs() < 1.0);
    }

    #[test]
    fn test_split_outputs_either_order() {
        let scores = vec![0.9f32, 0.8];
        let boxes = vec![0.0f32; 8];
        let (s, b) = split_outputs(&scores, &boxes).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(b.len(), 8);
        let (s, b) = split_outputs(&boxes, &scores).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(b.len(), 8);
    }

    #[test]
    fn test_split_outputs_rejects_mismatch() {
        let a = vec![0.9f32, 0.8];
        let b = vec![0.0f32; 7];
        assert!(split_outputs(&a, &b).is_none());
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32, c: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: c,
        }
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let sorted = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(1.0, 1.0, 10.0, 10.0, 0.8), // heavy overlap with first
            bbox(50.0, 50.0, 10.0, 10.0, 0.7),
        ];
        let kept = nms(sorted, DET_NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_tensor_shape() {
        let rgb = vec![128u8; 64 * 32 * 3];
        let (tensor, lb) = preprocess(&rgb, 64, 32);
        assert_eq!(tensor.shape(), &[1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE]);
        assert!(lb.pad_y > 0.0);
        assert!((lb.pad_x - 0.0).abs() < 1e-6);
    }
}
