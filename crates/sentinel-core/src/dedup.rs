//! Per-session sighting deduplication.
//!
//! A sighting is keyed by `(label, descriptor fingerprint)`. Known
//! identities produce stable descriptors across frames, so repeats are
//! suppressed well. Unknown faces have no stable per-person identifier, so
//! two sightings of the same stranger at different angles may hash apart
//! and both be logged — accepted policy, since over-logging strangers is
//! safer than under-logging them.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::types::FaceDescriptor;

/// Deterministic fingerprint of a descriptor's exact bit pattern.
pub fn descriptor_fingerprint(descriptor: &FaceDescriptor) -> String {
    let mut hasher = Sha256::new();
    for v in &descriptor.values {
        hasher.update(v.to_le_bytes());
    }
    let digest = hasher.finalize();
    // 8 bytes is plenty for a per-session set.
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes[..n.min(bytes.len())]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Tracks which sightings have already been emitted this monitoring session.
///
/// The set only grows while a session is active and is cleared in full by
/// [`reset`](SightingGuard::reset) when monitoring stops, so every new
/// session re-logs each person once.
#[derive(Debug, Default)]
pub struct SightingGuard {
    seen: HashSet<(String, String)>,
}

impl SightingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once per (label, descriptor) pair per session,
    /// recording the pair as seen.
    pub fn should_emit(&mut self, label: &str, descriptor: &FaceDescriptor) -> bool {
        let key = (label.to_string(), descriptor_fingerprint(descriptor));
        self.seen.insert(key)
    }

    /// Forget all sightings. Called on monitoring stop, never mid-session.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: &[f32]) -> FaceDescriptor {
        FaceDescriptor::new(values.to_vec())
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let d = desc(&[0.1, -0.5, 3.25]);
        assert_eq!(descriptor_fingerprint(&d), descriptor_fingerprint(&d));
        assert_eq!(descriptor_fingerprint(&d).len(), 16);
    }

    #[test]
    fn test_fingerprint_sensitive_to_values() {
        assert_ne!(
            descriptor_fingerprint(&desc(&[0.1, 0.2])),
            descriptor_fingerprint(&desc(&[0.1, 0.20001]))
        );
    }

    #[test]
    fn test_emits_once_per_pair() {
        let mut guard = SightingGuard::new();
        let d = desc(&[1.0, 2.0]);
        assert!(guard.should_emit("alice", &d));
        assert!(!guard.should_emit("alice", &d));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_same_label_different_descriptor_emits_again() {
        // The unknown-dedup policy: descriptor drift re-logs the same label.
        let mut guard = SightingGuard::new();
        assert!(guard.should_emit("Unknown", &desc(&[1.0])));
        assert!(guard.should_emit("Unknown", &desc(&[1.1])));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_different_labels_same_descriptor() {
        let mut guard = SightingGuard::new();
        let d = desc(&[1.0]);
        assert!(guard.should_emit("alice", &d));
        assert!(guard.should_emit("bob", &d));
    }

    #[test]
    fn test_reset_clears_window() {
        let mut guard = SightingGuard::new();
        let d = desc(&[1.0]);
        assert!(guard.should_emit("alice", &d));
        guard.reset();
        assert!(guard.is_empty());
        assert!(guard.should_emit("alice", &d));
    }
}
