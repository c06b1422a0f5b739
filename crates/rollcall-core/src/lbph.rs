//! Local Binary Patterns Histograms (LBPH) face classifier.
//!
//! Each normalized face is reduced to a grid of per-cell LBP histograms.
//! Prediction is nearest-neighbour over every reference histogram using the
//! symmetric chi-square distance, so 0.0 means an identical texture.

use crate::classifier::{Classifier, ClassifierError};
use crate::types::{FaceImage, Label, Prediction, Sample};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

// --- Named constants ---
const LBPH_GRID: usize = 8;
const LBPH_BINS: usize = 256;
const CHI_SQUARE_EPSILON: f64 = 1e-12;

/// Neighbour offsets (dy, dx) at radius 1, clockwise from the top-left.
/// Bit `i` of a code is set when neighbour `i` is at least as bright as the centre.
const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
];

/// One reference face in a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledHistogram {
    pub label: Label,
    pub values: Vec<f32>,
}

/// Fitted LBPH state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphModel {
    pub grid: usize,
    pub face_size: u32,
    pub histograms: Vec<LabeledHistogram>,
}

/// LBPH classifier with a configurable histogram grid.
#[derive(Debug, Clone)]
pub struct LbphClassifier {
    grid: usize,
}

impl LbphClassifier {
    pub fn new(grid: usize) -> Self {
        Self { grid: grid.max(1) }
    }
}

impl Default for LbphClassifier {
    fn default() -> Self {
        Self::new(LBPH_GRID)
    }
}

impl Classifier for LbphClassifier {
    type Model = LbphModel;

    fn name(&self) -> &'static str {
        "lbph"
    }

    fn fit(&self, samples: &[Sample]) -> Result<LbphModel, ClassifierError> {
        let first = samples.first().ok_or(ClassifierError::EmptyTrainingSet)?;
        let face_size = first.face.size();

        let mut histograms = Vec::with_capacity(samples.len());
        for sample in samples {
            if sample.face.size() != face_size {
                return Err(ClassifierError::SizeMismatch {
                    expected: face_size,
                    actual: sample.face.size(),
                });
            }
            let codes = lbp_codes(sample.face.view());
            histograms.push(LabeledHistogram {
                label: sample.label,
                values: spatial_histogram(&codes, self.grid),
            });
        }

        tracing::debug!(
            samples = histograms.len(),
            grid = self.grid,
            face_size,
            "fitted LBPH model"
        );

        Ok(LbphModel {
            grid: self.grid,
            face_size,
            histograms,
        })
    }

    fn predict(&self, model: &LbphModel, probe: &FaceImage) -> Result<Prediction, ClassifierError> {
        if model.grid == 0 {
            return Err(ClassifierError::Failed("model grid must be non-zero".into()));
        }
        if probe.size() != model.face_size {
            return Err(ClassifierError::SizeMismatch {
                expected: model.face_size,
                actual: probe.size(),
            });
        }

        let query = spatial_histogram(&lbp_codes(probe.view()), model.grid);

        let mut best: Option<Prediction> = None;
        for reference in &model.histograms {
            let distance = chi_square(&query, &reference.values);
            let is_better = match &best {
                None => true,
                Some(prev) => distance < prev.distance,
            };
            if is_better {
                best = Some(Prediction {
                    label: reference.label,
                    distance,
                });
            }
        }

        best.ok_or(ClassifierError::EmptyModel)
    }
}

/// Compute the 8-neighbour LBP code of every interior pixel.
///
/// The output is two pixels smaller than the input in each dimension;
/// inputs smaller than 3×3 produce an empty array.
fn lbp_codes(face: ArrayView2<'_, u8>) -> Array2<u8> {
    let (rows, cols) = face.dim();
    if rows < 3 || cols < 3 {
        return Array2::zeros((0, 0));
    }

    Array2::from_shape_fn((rows - 2, cols - 2), |(y, x)| {
        let cy = y + 1;
        let cx = x + 1;
        let centre = face[[cy, cx]];
        let mut code = 0u8;
        for (bit, (dy, dx)) in NEIGHBOURS.iter().enumerate() {
            let ny = (cy as isize + dy) as usize;
            let nx = (cx as isize + dx) as usize;
            if face[[ny, nx]] >= centre {
                code |= 1 << bit;
            }
        }
        code
    })
}

/// Concatenate normalized 256-bin histograms over a `grid`×`grid` split.
///
/// Each cell histogram sums to 1.0 so faces of any size compare on the same scale.
/// Trailing rows/columns that do not fill a whole cell are ignored.
fn spatial_histogram(codes: &Array2<u8>, grid: usize) -> Vec<f32> {
    let mut out = vec![0f32; grid * grid * LBPH_BINS];
    let (rows, cols) = codes.dim();
    let cell_h = rows / grid;
    let cell_w = cols / grid;
    if cell_h == 0 || cell_w == 0 {
        return out;
    }
    let cell_total = (cell_h * cell_w) as f32;

    for row in 0..grid {
        for col in 0..grid {
            let cell = codes.slice(s![
                row * cell_h..(row + 1) * cell_h,
                col * cell_w..(col + 1) * cell_w
            ]);
            let base = (row * grid + col) * LBPH_BINS;
            for &code in cell.iter() {
                out[base + code as usize] += 1.0;
            }
            for bin in &mut out[base..base + LBPH_BINS] {
                *bin /= cell_total;
            }
        }
    }

    out
}

/// Symmetric chi-square distance: `2 * Σ (a - b)² / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            let denom = x + y;
            if denom > CHI_SQUARE_EPSILON {
                (x - y).powi(2) / denom
            } else {
                0.0
            }
        })
        .sum();
    2.0 * sum
}
