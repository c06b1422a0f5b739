use crate::types::{FaceImage, Prediction, Sample};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("cannot fit a model on an empty training set")]
    EmptyTrainingSet,
    #[error("model holds no reference faces")]
    EmptyModel,
    #[error("probe is {actual}x{actual} but the model was trained at {expected}x{expected}")]
    SizeMismatch { expected: u32, actual: u32 },
    #[error("classifier failed: {0}")]
    Failed(String),
}

/// A face classifier: fits a serializable model over labeled faces and
/// scores probes against it.
///
/// Scores are distances: lower is a better match. Implementations must not
/// apply a threshold of their own; callers decide what to accept.
pub trait Classifier: Send + Sync {
    /// Fitted state, persisted inside a [`ModelArtifact`](crate::ModelArtifact).
    type Model: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Short identifier recorded in artifacts (e.g., "lbph").
    fn name(&self) -> &'static str;

    fn fit(&self, samples: &[Sample]) -> Result<Self::Model, ClassifierError>;

    fn predict(&self, model: &Self::Model, probe: &FaceImage)
        -> Result<Prediction, ClassifierError>;
}
