//! Enrollment and recognition use cases.
//!
//! `enroll` writes to the gallery and always attempts a retrain, reporting
//! both. `mark_attendance` checks the gallery and model preconditions,
//! classifies the probe for diagnostics, then hands the claimed identity to
//! the recorder.

use crate::recorder::{MarkDecision, Recorder};
use crate::trainer::{TrainError, TrainReport, Trainer};
use chrono::{Local, NaiveDate};
use rollcall_core::{
    normalize_face, Classifier, ClassifierError, Identity, IdentityError, NormalizeError,
};
use rollcall_store::{
    AttendanceRecord, GalleryError, GalleryStore, ModelStoreError, Role, Roster, StoreError,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown user: {0}")]
    UnknownIdentity(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
    #[error("{actor} is not allowed to {action}")]
    Forbidden { actor: String, action: &'static str },
    #[error("no image {filename} for {identity}")]
    ImageNotFound { identity: Identity, filename: String },
    #[error("no face enrolled for {0}")]
    FaceIdNotEnrolled(Identity),
    #[error("model not trained yet; add students first")]
    NotTrained,
    #[error("invalid image: {0}")]
    InvalidImage(#[source] NormalizeError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("model store: {0}")]
    ModelStore(ModelStoreError),
    #[error("{0}")]
    Train(#[from] TrainError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("attendance store: {0}")]
    Store(#[from] StoreError),
}

impl From<ModelStoreError> for PipelineError {
    fn from(e: ModelStoreError) -> Self {
        match e {
            ModelStoreError::NotTrained => Self::NotTrained,
            other => Self::ModelStore(other),
        }
    }
}

impl PipelineError {
    /// Machine-readable status code.
    pub fn status(&self) -> &'static str {
        match self {
            Self::UnknownIdentity(_) => "unknown_identity",
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::Forbidden { .. } => "forbidden",
            Self::ImageNotFound { .. } => "image_not_found",
            Self::FaceIdNotEnrolled(_) => "face_id_not_enrolled",
            Self::NotTrained => "not_trained",
            Self::InvalidImage(_) => "invalid_image",
            Self::Train(TrainError::NoTrainableData { .. }) => "no_trainable_data",
            Self::Gallery(_) | Self::ModelStore(_) | Self::Train(_) | Self::Store(_) => {
                "storage_error"
            }
            Self::Classifier(_) => "classifier_error",
        }
    }
}

/// Whether a classification must agree with the claimed identity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchPolicy {
    /// Decline when the predicted identity differs from the claimed one.
    pub require_match: bool,
    /// With `require_match`, also decline when the distance exceeds this.
    pub max_distance: Option<f64>,
}

/// Operations subject to role checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    Enroll,
    Train,
    RemoveIdentity,
    MarkManual,
    /// Face marking for `subject`; students may only mark themselves.
    MarkFace { subject: &'a str },
    /// Fetching an enrollment image of `subject`.
    ViewImage { subject: &'a str },
}

impl Action<'_> {
    fn describe(&self) -> &'static str {
        match self {
            Self::Enroll => "enroll faces",
            Self::Train => "retrain the model",
            Self::RemoveIdentity => "remove galleries",
            Self::MarkManual => "mark attendance manually",
            Self::MarkFace { .. } => "mark attendance for this user",
            Self::ViewImage { .. } => "view this user's images",
        }
    }

    fn permits(&self, actor: &Identity, role: Role) -> bool {
        match (self, role) {
            (_, Role::Admin | Role::Teacher) => true,
            (Self::MarkFace { subject } | Self::ViewImage { subject }, Role::Student) => {
                actor.as_str() == *subject
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub identity: Identity,
    pub filename: String,
    pub trained: bool,
    pub train: Option<TrainReport>,
    /// Status code of the retrain attempt ("trained" or an error status).
    pub train_status: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Marked,
    AlreadyMarked,
    NotRecognized,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkOutcome {
    /// True only when this call recorded the attendance.
    pub ok: bool,
    pub identity: Identity,
    pub date: NaiveDate,
    pub status: MarkStatus,
    pub marked: bool,
    /// Classifier distance for the probe (lower = better); absent for manual marks.
    pub confidence: Option<f64>,
    /// Identity the classifier predicted, via the artifact's own mapping.
    pub recognized: Option<Identity>,
    pub model_version: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub identity: Identity,
    pub removed: bool,
    pub trained: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub identities: usize,
    pub model_version: Option<u64>,
    pub classifier: &'static str,
    pub face_size: u32,
    pub require_match: bool,
}

/// The enrollment/recognition orchestrator.
pub struct Pipeline<C: Classifier> {
    gallery: GalleryStore,
    trainer: Trainer<C>,
    recorder: Recorder,
    roster: Box<dyn Roster>,
    policy: MatchPolicy,
}

impl<C: Classifier> Pipeline<C> {
    pub fn new(
        gallery: GalleryStore,
        trainer: Trainer<C>,
        recorder: Recorder,
        roster: Box<dyn Roster>,
        policy: MatchPolicy,
    ) -> Self {
        Self {
            gallery,
            trainer,
            recorder,
            roster,
            policy,
        }
    }

    fn resolve(&self, username: &str) -> Result<Identity, PipelineError> {
        self.roster
            .resolve(username)
            .ok_or_else(|| PipelineError::UnknownIdentity(username.to_string()))
    }

    /// Check that the Unix account `caller_uid` may perform `action`.
    ///
    /// The account acts as the roster member carrying its uid; unmapped
    /// accounts may do nothing that needs authorization.
    pub fn authorize(
        &self,
        caller_uid: u32,
        action: Action<'_>,
    ) -> Result<Identity, PipelineError> {
        let Some(identity) = self.roster.identity_for_uid(caller_uid) else {
            tracing::warn!(uid = caller_uid, action = action.describe(), "caller not in roster");
            return Err(PipelineError::Forbidden {
                actor: format!("uid {caller_uid}"),
                action: action.describe(),
            });
        };
        let role = self.roster.role(&identity);
        match role {
            Some(role) if action.permits(&identity, role) => Ok(identity),
            _ => {
                tracing::warn!(
                    uid = caller_uid,
                    actor = %identity,
                    role = ?role,
                    action = action.describe(),
                    "denied"
                );
                Err(PipelineError::Forbidden {
                    actor: identity.to_string(),
                    action: action.describe(),
                })
            }
        }
    }

    /// Store an enrollment image and retrain.
    ///
    /// A failed retrain does not fail the enrollment; it is reported in the outcome.
    pub fn enroll(
        &self,
        username: &str,
        image: &[u8],
        label: &str,
    ) -> Result<EnrollOutcome, PipelineError> {
        let identity = self.resolve(username)?;
        let filename = self.gallery.add_image(&identity, image, label)?;

        let (trained, train, train_status, train_message) = match self.trainer.train() {
            Ok(report) => {
                let message = report.message.clone();
                (true, Some(report), "trained", message)
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "retrain after enrollment failed");
                let status = PipelineError::from(e);
                (false, None, status.status(), status.to_string())
            }
        };

        Ok(EnrollOutcome {
            message: format!("saved {filename}; retrain: {trained} - {train_message}"),
            identity,
            filename,
            trained,
            train,
            train_status,
        })
    }

    pub fn train(&self) -> Result<TrainReport, PipelineError> {
        Ok(self.trainer.train()?)
    }

    /// Mark `username` present on `date` (today if `None`) from a probe frame.
    pub fn mark_attendance(
        &self,
        username: &str,
        probe: &[u8],
        date: Option<NaiveDate>,
    ) -> Result<MarkOutcome, PipelineError> {
        let identity = self.resolve(username)?;
        let date = date.unwrap_or_else(today);

        if !self.gallery.has_gallery(&identity)? {
            return Err(PipelineError::FaceIdNotEnrolled(identity));
        }

        let model = self.trainer.models().load_current()?;
        let face = normalize_face(probe, model.face_size).map_err(PipelineError::InvalidImage)?;
        let prediction = self.trainer.classifier().predict(&model.model, &face)?;
        let recognized = model.resolve(prediction.label).cloned();

        tracing::info!(
            identity = %identity,
            recognized = ?recognized.as_ref().map(Identity::as_str),
            distance = prediction.distance,
            model_version = model.version,
            "probe classified"
        );

        let mut outcome = MarkOutcome {
            ok: false,
            identity: identity.clone(),
            date,
            status: MarkStatus::NotRecognized,
            marked: false,
            confidence: Some(prediction.distance),
            recognized,
            model_version: Some(model.version),
            message: String::new(),
        };

        if self.policy.require_match {
            let same = outcome.recognized.as_ref() == Some(&identity);
            let close = self
                .policy
                .max_distance
                .map_or(true, |max| prediction.distance <= max);
            if !(same && close) {
                outcome.message = format!("face not recognized as {identity}");
                return Ok(outcome);
            }
        }

        self.record(outcome, None, "")
    }

    /// Mark `username` present without a probe frame.
    pub fn mark_manual(
        &self,
        username: &str,
        date: Option<NaiveDate>,
    ) -> Result<MarkOutcome, PipelineError> {
        let identity = self.resolve(username)?;
        let outcome = MarkOutcome {
            ok: false,
            identity,
            date: date.unwrap_or_else(today),
            status: MarkStatus::NotRecognized,
            marked: false,
            confidence: None,
            recognized: None,
            model_version: None,
            message: String::new(),
        };
        self.record(outcome, Some("manual"), " (manual)")
    }

    fn record(
        &self,
        mut outcome: MarkOutcome,
        remarks: Option<&str>,
        suffix: &str,
    ) -> Result<MarkOutcome, PipelineError> {
        match self
            .recorder
            .mark_present(&outcome.identity, outcome.date, remarks)?
        {
            MarkDecision::Recorded(_) => {
                outcome.status = MarkStatus::Marked;
                outcome.ok = true;
                outcome.marked = true;
                outcome.message = format!("Attendance marked for {}{suffix}", outcome.identity);
            }
            MarkDecision::AlreadyMarked => {
                outcome.status = MarkStatus::AlreadyMarked;
                outcome.ok = false;
                outcome.marked = false;
                outcome.message = format!(
                    "attendance already marked for {} on {}",
                    outcome.identity, outcome.date
                );
            }
        }
        Ok(outcome)
    }

    pub fn list_identities(&self) -> Result<Vec<Identity>, PipelineError> {
        Ok(self.gallery.list_identities()?.into_iter().collect())
    }

    pub fn list_images(&self, username: &str) -> Result<Vec<String>, PipelineError> {
        let identity = Identity::new(username)?;
        Ok(self
            .gallery
            .list_images(&identity)?
            .into_iter()
            .map(|image| image.filename)
            .collect())
    }

    /// Bytes of one stored enrollment image.
    pub fn read_image(&self, username: &str, filename: &str) -> Result<Vec<u8>, PipelineError> {
        let identity = Identity::new(username)?;
        let image = self
            .gallery
            .list_images(&identity)?
            .into_iter()
            .find(|image| image.filename == filename)
            .ok_or_else(|| PipelineError::ImageNotFound {
                identity: identity.clone(),
                filename: filename.to_string(),
            })?;
        Ok(self.gallery.read_image(&image)?)
    }

    /// Delete a gallery and retrain. If the gallery is now empty the last
    /// artifact stays in place.
    pub fn remove_identity(&self, username: &str) -> Result<RemoveOutcome, PipelineError> {
        let identity = Identity::new(username)?;
        let removed = self.gallery.remove_identity(&identity)?;
        if !removed {
            return Ok(RemoveOutcome {
                message: format!("no gallery for {identity}"),
                identity,
                removed,
                trained: false,
            });
        }

        let (trained, train_message) = match self.trainer.train() {
            Ok(report) => (true, report.message),
            Err(e) => (false, e.to_string()),
        };
        Ok(RemoveOutcome {
            message: format!(
                "removed gallery for {identity}; retrain: {trained} - {train_message}"
            ),
            identity,
            removed,
            trained,
        })
    }

    pub fn report(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, PipelineError> {
        Ok(self.recorder.records(from, to)?)
    }

    pub fn status(&self) -> Result<PipelineStatus, PipelineError> {
        Ok(PipelineStatus {
            identities: self.gallery.list_identities()?.len(),
            model_version: self.trainer.models().current_version()?,
            classifier: self.trainer.classifier().name(),
            face_size: self.trainer.face_size(),
            require_match: self.policy.require_match,
        })
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
