//! Reference gallery loading.
//!
//! One image file per known identity; the file stem is the identity label.
//! Loading runs face detection on each image and keeps the descriptor of
//! the first detected face (multi-face reference images use the first —
//! known policy, not a bug). The listing is filename-sorted so gallery
//! order, and therefore match tie-breaking, is deterministic.

use std::path::Path;

use thiserror::Error;

use crate::encoder::FaceEncoder;
use crate::types::GalleryEntry;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory unreadable: {path}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },
    #[error("no usable reference images in {0}")]
    Empty(String),
}

/// The loaded name → descriptor gallery, read-only during matching.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Load every reference image under `dir`.
    ///
    /// Images that fail to decode or contain no detectable face are skipped
    /// with a warning; an entirely empty result is a configuration error
    /// because the pipeline cannot identify anyone without references.
    pub fn load<E: FaceEncoder>(encoder: &mut E, dir: &Path) -> Result<Self, GalleryError> {
        let read = std::fs::read_dir(dir).map_err(|source| GalleryError::Unreadable {
            path: dir.display().to_string(),
            source,
        })?;

        let mut files: Vec<_> = read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        // Directory listings are not guaranteed sorted; sort so entry order
        // (and with it first-match tie-breaking) is stable across hosts.
        files.sort();

        let mut entries = Vec::new();
        for path in files {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping reference image: bad file name");
                continue;
            };

            let img = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference image");
                    continue;
                }
            };

            let (width, height) = img.dimensions();
            match encoder.encode_faces(img.as_raw(), width, height) {
                Ok(detections) => match detections.into_iter().next() {
                    Some(det) => {
                        tracing::debug!(name, "gallery entry loaded");
                        entries.push(GalleryEntry {
                            name: name.to_string(),
                            descriptor: det.descriptor,
                        });
                    }
                    None => {
                        tracing::warn!(path = %path.display(), "no face found in reference image, skipping");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "encoding reference image failed, skipping");
                }
            }
        }

        if entries.is_empty() {
            return Err(GalleryError::Empty(dir.display().to_string()));
        }

        tracing::info!(entries = entries.len(), dir = %dir.display(), "gallery loaded");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Build a gallery from precomputed descriptors (e.g., tests or an
    /// export produced by an earlier load).
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodeError;
    use crate::types::{BoundingBox, Detection, FaceDescriptor};
    use std::path::PathBuf;

    /// Encoder that "finds" a face only in images whose average pixel value
    /// is even, with a descriptor derived from that value.
    struct StubEncoder;

    impl FaceEncoder for StubEncoder {
        fn encode_faces(
            &mut self,
            rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Detection>, EncodeError> {
            let avg = rgb.iter().map(|&b| b as u32).sum::<u32>() / rgb.len() as u32;
            if avg % 2 != 0 {
                return Ok(vec![]);
            }
            Ok(vec![Detection {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: 1.0,
                },
                descriptor: FaceDescriptor::new(vec![avg as f32]),
            }])
        }
    }

    fn write_png(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([value, value, value]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_sorted_with_face_per_image() {
        let dir = tempfile::tempdir().unwrap();
        // Written out of order on purpose; load must sort by filename.
        write_png(dir.path(), "bob.png", 10);
        write_png(dir.path(), "alice.png", 20);

        let gallery = Gallery::load(&mut StubEncoder, dir.path()).unwrap();
        let names: Vec<_> = gallery.names().collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_faceless_image_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 20);
        write_png(dir.path(), "empty_wall.png", 21); // odd avg: no face

        let gallery = Gallery::load(&mut StubEncoder, dir.path()).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.names().next(), Some("alice"));
    }

    #[test]
    fn test_undecodable_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 20);
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();

        let gallery = Gallery::load(&mut StubEncoder, dir.path()).unwrap();
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_empty_gallery_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "empty_wall.png", 21);

        let err = Gallery::load(&mut StubEncoder, dir.path()).unwrap_err();
        assert!(matches!(err, GalleryError::Empty(_)));
    }

    #[test]
    fn test_missing_directory_is_unreadable() {
        let err =
            Gallery::load(&mut StubEncoder, Path::new("/nonexistent/known_faces")).unwrap_err();
        assert!(matches!(err, GalleryError::Unreadable { .. }));
    }
}
