//! rollcall-core — Face recognition primitives for attendance.
//!
//! Normalizes enrollment images and probe frames, fits an LBPH texture
//! classifier, and maintains the identity/label index and the versioned
//! model artifact that ties them together.

pub mod artifact;
pub mod classifier;
pub mod labels;
pub mod lbph;
pub mod normalize;
pub mod types;

pub use artifact::{training_digest, ArtifactHeader, ModelArtifact, ModelHandle, ARTIFACT_FORMAT};
pub use classifier::{Classifier, ClassifierError};
pub use labels::LabelMapping;
pub use lbph::{LbphClassifier, LbphModel};
pub use normalize::{normalize_face, NormalizeError, FACE_SIZE};
pub use types::{FaceImage, Identity, IdentityError, Label, Prediction, Sample};
