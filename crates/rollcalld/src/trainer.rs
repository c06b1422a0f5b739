//! Model training from the enrollment gallery.

use chrono::Utc;
use rollcall_core::{
    normalize_face, training_digest, Classifier, ClassifierError, LabelMapping, ModelArtifact,
    Sample, ARTIFACT_FORMAT,
};
use rollcall_store::{GalleryError, GalleryStore, ModelStore, ModelStoreError};
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no faces to train")]
    NoTrainableData { skipped: usize },
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("model store: {0}")]
    ModelStore(#[from] ModelStoreError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("training lock poisoned")]
    LockPoisoned,
}

/// Summary of a successful training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    /// Version of the artifact now current.
    pub version: u64,
    pub digest: String,
    pub image_count: usize,
    pub identity_count: usize,
    /// Images that failed to decode and were left out.
    pub skipped: usize,
    /// The gallery matched the current artifact; nothing was republished.
    pub unchanged: bool,
    pub message: String,
}

/// Fits the classifier over the gallery and publishes the result.
///
/// Training and publishing happen under one lock, so concurrent runs are
/// serialized and each publish reflects a complete gallery snapshot.
pub struct Trainer<C: Classifier> {
    gallery: GalleryStore,
    models: ModelStore<C::Model>,
    classifier: C,
    face_size: u32,
    lock: Mutex<()>,
}

impl<C: Classifier> Trainer<C> {
    pub fn new(
        gallery: GalleryStore,
        models: ModelStore<C::Model>,
        classifier: C,
        face_size: u32,
    ) -> Self {
        Self {
            gallery,
            models,
            classifier,
            face_size,
            lock: Mutex::new(()),
        }
    }

    pub fn models(&self) -> &ModelStore<C::Model> {
        &self.models
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn face_size(&self) -> u32 {
        self.face_size
    }

    /// Retrain from the current gallery contents.
    ///
    /// Undecodable images are logged and skipped. If nothing usable remains
    /// the current artifact is left untouched.
    pub fn train(&self) -> Result<TrainReport, TrainError> {
        let _guard = self.lock.lock().map_err(|_| TrainError::LockPoisoned)?;

        let mapping = LabelMapping::compute(self.gallery.list_identities()?);
        let mut samples = Vec::new();
        let mut skipped = 0usize;

        for (label, identity) in mapping.iter() {
            for image in self.gallery.list_images(identity)? {
                let bytes = self.gallery.read_image(&image)?;
                match normalize_face(&bytes, self.face_size) {
                    Ok(face) => samples.push(Sample { label, face }),
                    Err(e) => {
                        tracing::warn!(
                            identity = %identity,
                            file = %image.filename,
                            error = %e,
                            "skipping enrollment image"
                        );
                        skipped += 1;
                    }
                }
            }
        }

        if samples.is_empty() {
            tracing::info!(
                identities = mapping.len(),
                skipped,
                "no trainable faces; keeping current model"
            );
            return Err(TrainError::NoTrainableData { skipped });
        }

        let image_count = samples.len();
        let identity_count = mapping.len();
        let message = format!("trained {image_count} faces for {identity_count} students");
        let digest = training_digest(&mapping, &samples);

        // An unreadable artifact is rebuilt from the gallery.
        let current = match self.models.header() {
            Ok(header) => header,
            Err(ModelStoreError::Serde { path, source }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "current model artifact is unreadable; replacing it"
                );
                None
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(header) = current.as_ref().filter(|h| h.digest == digest) {
            tracing::info!(version = header.version, "gallery unchanged since last training");
            return Ok(TrainReport {
                version: header.version,
                digest,
                image_count,
                identity_count,
                skipped,
                unchanged: true,
                message,
            });
        }

        let model = self.classifier.fit(&samples)?;
        let version = current.map_or(1, |h| h.version + 1);
        let artifact = ModelArtifact {
            format: ARTIFACT_FORMAT,
            version,
            digest: digest.clone(),
            classifier: self.classifier.name().to_string(),
            face_size: self.face_size,
            trained_at: Utc::now(),
            image_count,
            mapping,
            model,
        };
        self.models.save(&artifact)?;

        tracing::info!(version, image_count, identity_count, skipped, "training complete");

        Ok(TrainReport {
            version,
            digest,
            image_count,
            identity_count,
            skipped,
            unchanged: false,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_png, id, StubClassifier};
    use rollcall_core::{Identity, Label};

    fn trainer(dir: &std::path::Path) -> (GalleryStore, Trainer<StubClassifier>) {
        let gallery = GalleryStore::open(dir.join("gallery")).unwrap();
        let trainer = Trainer::new(
            gallery.clone(),
            ModelStore::new(dir.join("model.json")),
            StubClassifier::default(),
            16,
        );
        (gallery, trainer)
    }

    #[test]
    fn test_train_empty_gallery_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_, trainer) = trainer(dir.path());
        let err = trainer.train().unwrap_err();
        assert!(matches!(err, TrainError::NoTrainableData { skipped: 0 }));
        assert_eq!(err.to_string(), "no faces to train");
        assert!(trainer.models().header().unwrap().is_none());
    }

    #[test]
    fn test_train_counts_images_and_identities() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        for shade in [10, 20, 30] {
            gallery.add_image(&id("alice"), &face_png(shade), "x").unwrap();
        }

        let report = trainer.train().unwrap();
        assert_eq!(report.image_count, 3);
        assert_eq!(report.identity_count, 1);
        assert_eq!(report.version, 1);
        assert_eq!(report.message, "trained 3 faces for 1 students");
    }

    #[test]
    fn test_undecodable_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        gallery.add_image(&id("alice"), &face_png(40), "x").unwrap();
        gallery.add_image(&id("alice"), b"corrupt upload", "x").unwrap();

        let report = trainer.train().unwrap();
        assert_eq!(report.image_count, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_only_undecodable_images_keeps_prior_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        gallery.add_image(&id("alice"), &face_png(40), "x").unwrap();
        trainer.train().unwrap();

        gallery.remove_identity(&id("alice")).unwrap();
        gallery.add_image(&id("bob"), b"garbage", "x").unwrap();
        let err = trainer.train().unwrap_err();
        assert!(matches!(err, TrainError::NoTrainableData { skipped: 1 }));

        let current = trainer.models().load_current().unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.resolve(Label(1)).map(Identity::as_str), Some("alice"));
    }

    #[test]
    fn test_retrain_unchanged_gallery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        gallery.add_image(&id("alice"), &face_png(50), "x").unwrap();

        let first = trainer.train().unwrap();
        let second = trainer.train().unwrap();
        assert!(!first.unchanged);
        assert!(second.unchanged);
        assert_eq!(first.digest, second.digest);
        assert_eq!(second.version, 1);
    }

    #[test]
    fn test_version_increments_and_mapping_tracks_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        gallery.add_image(&id("bob"), &face_png(50), "x").unwrap();
        trainer.train().unwrap();
        let v1 = trainer.models().load_current().unwrap();
        assert_eq!(v1.mapping.label_of(&id("bob")), Some(Label(1)));

        gallery.add_image(&id("aaron"), &face_png(90), "x").unwrap();
        let report = trainer.train().unwrap();
        assert_eq!(report.version, 2);

        let v2 = trainer.models().load_current().unwrap();
        assert_eq!(v2.mapping.label_of(&id("bob")), Some(Label(2)));
        // The old handle still resolves its own labels.
        assert_eq!(v1.resolve(Label(1)), Some(&id("bob")));
    }

    #[test]
    fn test_unreadable_artifact_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        std::fs::write(dir.path().join("model.json"), b"{ truncated").unwrap();
        gallery.add_image(&id("alice"), &face_png(70), "x").unwrap();

        let report = trainer.train().unwrap();
        assert_eq!(report.version, 1);
        assert!(!report.unchanged);

        let current = trainer.models().load_current().unwrap();
        assert_eq!(current.resolve(Label(1)), Some(&id("alice")));
    }

    #[test]
    fn test_concurrent_training_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, trainer) = trainer(dir.path());
        gallery.add_image(&id("alice"), &face_png(60), "x").unwrap();
        gallery.add_image(&id("bob"), &face_png(120), "x").unwrap();

        let trainer = std::sync::Arc::new(trainer);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let trainer = trainer.clone();
                std::thread::spawn(move || trainer.train().map(|r| r.version))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), 1);
        }
        let current = trainer.models().load_current().unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.image_count, 2);
    }
}
