//! One-shot snapshot capture to a timestamped JPEG.

use crate::frame::Frame;
use chrono::Local;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("frame buffer does not match its declared dimensions")]
    MalformedFrame,
}

/// Write `frame` as `dir/snapshot_YYYYMMDD_HHMMSS.jpg`, creating `dir` on
/// demand, and return the written path.
pub fn write_snapshot(frame: &Frame, dir: &Path) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(dir)?;
    let name = format!("snapshot_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(name);

    let img = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or(SnapshotError::MalformedFrame)?;
    img.save(&path)?;

    tracing::info!(path = %path.display(), "snapshot written");
    Ok(path)
}
