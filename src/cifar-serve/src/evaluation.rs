use serde::Serialize;

use crate::error::{Error, Result};
use crate::labels::class_name;

/// Co-occurrence counts of (true class, predicted class) pairs.
///
/// Rows are true labels, columns are predictions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        ConfusionMatrix {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    pub fn from_labels(classes: usize, truth: &[usize], predicted: &[usize]) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(Error::invalid_input(format!(
                "{} reference labels but {} predictions",
                truth.len(),
                predicted.len()
            )));
        }

        let mut matrix = Self::new(classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            matrix.record(t, p)?;
        }

        Ok(matrix)
    }

    pub fn record(&mut self, truth: usize, predicted: usize) -> Result<()> {
        if truth >= self.classes || predicted >= self.classes {
            return Err(Error::invalid_input(format!(
                "class pair ({}, {}) outside a {}-class table",
                truth, predicted, self.classes
            )));
        }

        self.counts[truth * self.classes + predicted] += 1;
        Ok(())
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn count(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth * self.classes + predicted]
    }

    pub fn row(&self, truth: usize) -> &[u64] {
        &self.counts[truth * self.classes..(truth + 1) * self.classes]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.classes).map(|i| self.count(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Fraction of class `truth` samples predicted correctly, 0 when the
    /// class has no samples.
    pub fn class_accuracy(&self, truth: usize) -> f64 {
        ratio(self.count(truth, truth), self.row(truth).iter().sum())
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassAccuracy {
    pub class: &'static str,
    pub accuracy: f64,
    pub samples: u64,
    pub correct: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Evaluation {
    pub samples: u64,
    pub accuracy: f64,
    pub per_class: Vec<ClassAccuracy>,
    pub confusion: ConfusionMatrix,
}

impl Evaluation {
    pub fn from_matrix(confusion: ConfusionMatrix) -> Self {
        let per_class = (0..confusion.classes())
            .map(|i| ClassAccuracy {
                class: class_name(i).unwrap_or("?"),
                accuracy: confusion.class_accuracy(i),
                samples: confusion.row(i).iter().sum(),
                correct: confusion.count(i, i),
            })
            .collect();

        Evaluation {
            samples: confusion.total(),
            accuracy: confusion.accuracy(),
            per_class,
            confusion,
        }
    }
}
