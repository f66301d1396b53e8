//! Gallery matching under a Euclidean distance tolerance.

use crate::types::{FaceDescriptor, GalleryEntry, Identity};

/// Default maximum descriptor distance for a positive identification.
///
/// Distances are in descriptor space; 0.6 is the conventional operating
/// point for 128-dimensional face descriptors.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for resolving a probe descriptor to an identity.
pub trait Matcher {
    fn identify(&self, probe: &FaceDescriptor, gallery: &[GalleryEntry], tolerance: f32)
        -> Identity;
}

/// Nearest-neighbour matcher over Euclidean descriptor distance.
///
/// The whole gallery is scanned and the minimum distance wins. When two
/// entries are equidistant below tolerance, the first entry in gallery
/// load order wins; the loader sorts reference images by filename, so this
/// tie-break is deterministic across runs and hosts.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn identify(
        &self,
        probe: &FaceDescriptor,
        gallery: &[GalleryEntry],
        tolerance: f32,
    ) -> Identity {
        let mut best_dist = f32::INFINITY;
        let mut best_name: Option<&str> = None;

        for entry in gallery {
            let dist = probe.distance(&entry.descriptor);
            // Strict < keeps the earliest entry on exact ties.
            if dist < best_dist {
                best_dist = dist;
                best_name = Some(&entry.name);
            }
        }

        match best_name {
            Some(name) if best_dist < tolerance => Identity::Known(name.to_string()),
            _ => Identity::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            name: name.to_string(),
            descriptor: FaceDescriptor::new(values),
        }
    }

    #[test]
    fn test_within_tolerance_matches() {
        let gallery = vec![entry("alice", vec![0.0, 0.0]), entry("bob", vec![5.0, 0.0])];
        let probe = FaceDescriptor::new(vec![0.3, 0.0]);
        let id = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        assert_eq!(id, Identity::Known("alice".into()));
    }

    #[test]
    fn test_beyond_tolerance_is_unknown() {
        let gallery = vec![entry("alice", vec![0.0, 0.0])];
        let probe = FaceDescriptor::new(vec![0.9, 0.0]);
        let id = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        assert_eq!(id, Identity::Unknown);
    }

    #[test]
    fn test_exact_tolerance_is_unknown() {
        // The boundary itself does not match: distance must be strictly below.
        let gallery = vec![entry("alice", vec![0.0])];
        let probe = FaceDescriptor::new(vec![DEFAULT_TOLERANCE]);
        let id = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        assert_eq!(id, Identity::Unknown);
    }

    #[test]
    fn test_nearest_entry_wins() {
        let gallery = vec![entry("alice", vec![0.5, 0.0]), entry("bob", vec![0.1, 0.0])];
        let probe = FaceDescriptor::new(vec![0.0, 0.0]);
        let id = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        assert_eq!(id, Identity::Known("bob".into()));
    }

    #[test]
    fn test_tie_break_first_in_load_order() {
        // Two entries at identical distance: the earlier one must win.
        let gallery = vec![
            entry("alice", vec![0.2, 0.0]),
            entry("bob", vec![-0.2, 0.0]),
        ];
        let probe = FaceDescriptor::new(vec![0.0, 0.0]);
        let id = EuclideanMatcher.identify(&probe, &gallery, DEFAULT_TOLERANCE);
        assert_eq!(id, Identity::Known("alice".into()));
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let probe = FaceDescriptor::new(vec![0.0]);
        let id = EuclideanMatcher.identify(&probe, &[], DEFAULT_TOLERANCE);
        assert_eq!(id, Identity::Unknown);
    }
}
