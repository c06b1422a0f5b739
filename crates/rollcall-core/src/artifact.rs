//! Versioned model artifact.
//!
//! An artifact bundles a fitted classifier state with the label mapping
//! that produced its labels, a monotonic version and a digest of the
//! training set. Consumers hold an [`ModelHandle`] for the duration of a
//! request instead of reading shared global state.

use crate::labels::LabelMapping;
use crate::types::{Identity, Label, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// On-disk layout revision of [`ModelArtifact`].
pub const ARTIFACT_FORMAT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact<M> {
    pub format: u32,
    /// Publish counter: previous version + 1, starting at 1.
    pub version: u64,
    /// SHA-256 over the training set (see [`training_digest`]).
    pub digest: String,
    pub classifier: String,
    pub face_size: u32,
    pub trained_at: DateTime<Utc>,
    pub image_count: usize,
    pub mapping: LabelMapping,
    pub model: M,
}

impl<M> ModelArtifact<M> {
    pub fn identity_count(&self) -> usize {
        self.mapping.len()
    }

    /// Map a label produced by this artifact's model back to an identity.
    pub fn resolve(&self, label: Label) -> Option<&Identity> {
        self.mapping.identity_of(label)
    }
}

/// Lightweight view of an artifact, without the fitted state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactHeader {
    pub version: u64,
    pub digest: String,
    pub classifier: String,
    pub trained_at: DateTime<Utc>,
    pub image_count: usize,
}

/// Shared handle to a published artifact.
pub type ModelHandle<M> = Arc<ModelArtifact<M>>;

/// Digest a training set: mapping, then every sample's label, size and pixels in order.
///
/// Equal galleries normalize to equal samples, so the digest identifies a
/// training run's input independent of when it ran.
pub fn training_digest(mapping: &LabelMapping, samples: &[Sample]) -> String {
    let mut hasher = Sha256::new();
    for (label, identity) in mapping.iter() {
        hasher.update(label.0.to_le_bytes());
        hasher.update(identity.as_str().as_bytes());
        hasher.update([0u8]);
    }
    for sample in samples {
        hasher.update(sample.label.0.to_le_bytes());
        hasher.update(sample.face.size().to_le_bytes());
        hasher.update(sample.face.as_slice());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
