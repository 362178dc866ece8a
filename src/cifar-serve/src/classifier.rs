use std::io::Read;
use std::path::Path;

use image::DynamicImage;
use log::{debug, info};
use serde::Serialize;

use crate::dataset::LabeledImages;
use crate::error::{Error, Result};
use crate::evaluation::{ConfusionMatrix, Evaluation};
use crate::labels::{CLASS_NAMES, NUM_CLASSES};
use crate::model::{self, Model, ModelSummary};
use crate::preprocess::{self, InputBatch, INPUT_LEN};
use crate::timer::Timer;

/// Allowed distance of a probability vector's sum from 1. Individual
/// entries must lie in [0, 1] exactly.
pub const PROBABILITY_TOLERANCE: f32 = 1e-3;

pub struct ImageClassifier {
    model: Box<dyn Model>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Classification {
    /// Predicted class name
    #[serde(rename = "class")]
    pub label: &'static str,

    /// Index of the predicted class in the label table
    pub index: usize,

    /// Probability assigned to the predicted class
    pub confidence: f32,

    /// Full probability vector, index-aligned with the label table
    pub probabilities: Vec<f32>,

    /// Time spent fetching image from URL
    pub time_url_fetch: i64,

    /// Time spent loading image in memory
    pub time_image_load: i64,

    /// Time resizing image
    pub time_image_resize: i64,

    /// Time spent on running session
    pub time_session_run: i64,
}

/// Index and value of the largest score; the first one wins on ties.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
}

/// Check that `scores` is a probability vector over the label table.
pub fn validate_probabilities(scores: &[f32]) -> Result<()> {
    if scores.len() != NUM_CLASSES {
        return Err(Error::LabelMismatch {
            expected: NUM_CLASSES,
            actual: scores.len(),
        });
    }

    if let Some(bad) = scores
        .iter()
        .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0)
    {
        return Err(Error::invalid_output(format!(
            "score {} is not a probability",
            bad
        )));
    }

    let sum: f32 = scores.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(Error::invalid_output(format!(
            "probabilities sum to {}",
            sum
        )));
    }

    Ok(())
}

impl ImageClassifier {
    /// Wrap a loaded model, checking that its output lines up with the label
    /// table before any request sees it.
    pub fn new(model: Box<dyn Model>) -> Result<Self> {
        let probe = model.predict(&InputBatch::zeros(1))?;

        let width = probe.first().map_or(0, |scores| scores.len());
        if probe.len() != 1 || width != NUM_CLASSES {
            return Err(Error::LabelMismatch {
                expected: NUM_CLASSES,
                actual: width,
            });
        }

        debug!("Model output width {} matches the label table", width);

        Ok(ImageClassifier { model })
    }

    /// Load the exported model at `export_dir`.
    pub fn load(export_dir: &Path) -> Result<Self> {
        Self::new(model::load(export_dir)?)
    }

    pub fn summary(&self) -> ModelSummary {
        self.model.summary()
    }

    /// Run the model and return validated probability vectors.
    pub fn run(&self, batch: &InputBatch) -> Result<Vec<Vec<f32>>> {
        let output = self.model.predict(batch)?;

        if output.len() != batch.len() {
            return Err(Error::invalid_output(format!(
                "{} results for a batch of {}",
                output.len(),
                batch.len()
            )));
        }

        for scores in &output {
            validate_probabilities(scores)?;
        }

        Ok(output)
    }

    fn label(&self, scores: Vec<f32>) -> Result<Classification> {
        let (index, confidence) =
            argmax(&scores).ok_or_else(|| Error::invalid_output("empty score vector"))?;

        Ok(Classification {
            label: CLASS_NAMES[index],
            index,
            confidence,
            probabilities: scores,
            ..Default::default()
        })
    }

    /// Classify a preprocessed 32x32x3 image.
    pub fn classify_input(&self, input: Vec<f32>) -> Result<Classification> {
        let mut t = Timer::new_start("Running inference");

        let batch = InputBatch::single(input)?;
        let scores = self
            .run(&batch)?
            .pop()
            .ok_or_else(|| Error::invalid_output("empty output batch"))?;

        let mut classification = self.label(scores)?;
        classification.time_session_run = t.stop();

        Ok(classification)
    }

    pub fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let mut t = Timer::new_start("Resizing image");
        let input = preprocess::to_input(image);
        t.stop();

        let mut classification = self.classify_input(input)?;
        classification.time_image_resize = t.duration_ms();

        Ok(classification)
    }

    pub fn classify_from_raw(&self, data: &[u8]) -> Result<Classification> {
        let mut t = Timer::new_start("Load image from memory");
        let image = preprocess::decode(data)?;
        t.stop();

        let mut classification = self.classify(&image)?;
        classification.time_image_load = t.duration_ms();

        Ok(classification)
    }

    pub fn classify_from_path(&self, path: &Path) -> Result<Classification> {
        let data = std::fs::read(path)?;
        self.classify_from_raw(&data)
    }

    pub fn classify_from_url(&self, url: &str) -> Result<Classification> {
        let mut t = Timer::new_start(&format!("Fetching image from {}", url));

        let mut resp = reqwest::blocking::get(url)?.error_for_status()?;

        let mut buf: Vec<u8> = vec![];
        resp.read_to_end(&mut buf)?;

        t.stop();

        let mut classification = self.classify_from_raw(&buf)?;
        classification.time_url_fetch = t.duration_ms();

        Ok(classification)
    }

    /// Predict every sample of `data` in chunks of `batch_size` and score the
    /// predictions against the reference labels.
    pub fn evaluate(&self, data: &LabeledImages, batch_size: usize) -> Result<Evaluation> {
        if batch_size == 0 {
            return Err(Error::invalid_input("batch size must be positive"));
        }

        let chunk_len = batch_size
            .checked_mul(INPUT_LEN)
            .ok_or_else(|| Error::invalid_input(format!("batch size {} is too large", batch_size)))?;

        let mut t = Timer::new_start(&format!("Evaluating {} samples", data.len()));
        let mut matrix = ConfusionMatrix::new(NUM_CLASSES);

        for (pixels, labels) in data
            .pixels()
            .chunks(chunk_len)
            .zip(data.labels().chunks(batch_size))
        {
            let batch = InputBatch::new(labels.len(), pixels.to_vec())?;

            for (scores, &truth) in self.run(&batch)?.iter().zip(labels) {
                let (predicted, _) =
                    argmax(scores).ok_or_else(|| Error::invalid_output("empty score vector"))?;
                matrix.record(truth as usize, predicted)?;
            }
        }

        t.stop();

        let evaluation = Evaluation::from_matrix(matrix);
        info!(
            "Accuracy {:.4} over {} samples",
            evaluation.accuracy, evaluation.samples
        );

        Ok(evaluation)
    }
}
