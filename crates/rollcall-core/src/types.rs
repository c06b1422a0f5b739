use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const IDENTITY_MAX_LEN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity must not be empty")]
    Empty,
    #[error("identity is longer than {IDENTITY_MAX_LEN} characters")]
    TooLong,
    #[error("identity must not start with '.'")]
    LeadingDot,
    #[error("identity contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Stable key for an enrolled person (a username).
///
/// Doubles as a gallery directory name and as the attendance foreign key,
/// so it is restricted to `[A-Za-z0-9._-]` and may not start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentityError::Empty);
        }
        if value.len() > IDENTITY_MAX_LEN {
            return Err(IdentityError::TooLong);
        }
        if value.starts_with('.') {
            return Err(IdentityError::LeadingDot);
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(IdentityError::InvalidChar(bad));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Integer surrogate for an identity, as consumed by a classifier.
///
/// Only meaningful together with the [`LabelMapping`](crate::LabelMapping)
/// that assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized grayscale face: square, row-major, one byte per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    pixels: Array2<u8>,
}

impl FaceImage {
    /// Wrap raw pixels of a `size`×`size` image. Returns `None` if the
    /// buffer length does not match.
    pub fn from_pixels(size: u32, pixels: Vec<u8>) -> Option<Self> {
        let side = size as usize;
        Array2::from_shape_vec((side, side), pixels)
            .ok()
            .map(|pixels| Self { pixels })
    }

    /// Side length in pixels.
    pub fn size(&self) -> u32 {
        self.pixels.nrows() as u32
    }

    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.pixels.view()
    }

    pub fn as_slice(&self) -> &[u8] {
        // Arrays built by `from_shape_vec` are standard-layout.
        self.pixels.as_slice().unwrap_or(&[])
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| p as f64).sum::<f64>() / self.pixels.len() as f64
    }
}

/// One training pair: a normalized face and the label of its owner.
#[derive(Debug, Clone)]
pub struct Sample {
    pub label: Label,
    pub face: FaceImage,
}

/// Classifier output for a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Distance-style score: lower = better match.
    pub distance: f64,
}
