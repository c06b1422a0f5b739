//! Fixtures shared by the daemon's unit tests.

use image::{GrayImage, ImageFormat, Luma};
use rollcall_core::{Classifier, ClassifierError, FaceImage, Identity, Label, Prediction, Sample};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn id(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

fn encode(img: GrayImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// A 32x32 PNG whose brightness is roughly `shade`.
pub fn face_png(shade: u8) -> Vec<u8> {
    encode(GrayImage::from_fn(32, 32, |x, y| {
        Luma([shade.saturating_add(((x * y) % 16) as u8)])
    }))
}

/// A 32x32 checkerboard PNG, texturally unlike [`face_png`].
pub fn checker_png() -> Vec<u8> {
    encode(GrayImage::from_fn(32, 32, |x, y| {
        Luma([if (x / 4 + y / 4) % 2 == 0 { 20 } else { 235 }])
    }))
}

/// Nearest-mean-brightness classifier; counts predictions.
#[derive(Default)]
pub struct StubClassifier {
    pub predictions: Arc<AtomicUsize>,
}

impl Classifier for StubClassifier {
    type Model = Vec<(Label, f64)>;

    fn name(&self) -> &'static str {
        "stub"
    }

    fn fit(&self, samples: &[Sample]) -> Result<Self::Model, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let mut sums: BTreeMap<Label, (f64, usize)> = BTreeMap::new();
        for sample in samples {
            let entry = sums.entry(sample.label).or_default();
            entry.0 += sample.face.avg_brightness();
            entry.1 += 1;
        }
        Ok(sums
            .into_iter()
            .map(|(label, (sum, n))| (label, sum / n as f64))
            .collect())
    }

    fn predict(
        &self,
        model: &Self::Model,
        probe: &FaceImage,
    ) -> Result<Prediction, ClassifierError> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        let brightness = probe.avg_brightness();
        model
            .iter()
            .map(|&(label, mean)| Prediction {
                label,
                distance: (mean - brightness).abs(),
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .ok_or(ClassifierError::EmptyModel)
    }
}
