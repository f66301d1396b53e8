//! Frame type and pixel-format conversion.
//!
//! All frames leave this crate as packed RGB24 regardless of what the
//! device negotiated, so downstream stages never branch on pixel format.

/// A captured RGB24 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Average luma brightness (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .data
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .sum();
        sum / (self.data.len() / 3) as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to RGB24 using BT.601 integer math.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; U and V are shared
/// by the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as i32 - 128;
        let v = quad[3] as i32 - 128;
        for &y in &[quad[0], quad[2]] {
            let c = 298 * (y as i32 - 16);
            rgb.push(clamp_u8((c + 409 * v + 128) >> 8));
            rgb.push(clamp_u8((c - 100 * u - 208 * v + 128) >> 8));
            rgb.push(clamp_u8((c + 516 * u + 128) >> 8));
        }
    }
    Ok(rgb)
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}
