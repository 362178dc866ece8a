//! Serving core for a CIFAR-10 image classifier.
//!
//! The network itself is an opaque exported artifact; this crate turns image
//! bytes into its input tensor, validates what comes back and maps it onto
//! the class label table.

mod classifier;
pub mod dataset;
mod error;
pub mod evaluation;
pub mod labels;
pub mod model;
pub mod preprocess;
mod timer;

pub use classifier::{argmax, validate_probabilities, Classification, ImageClassifier};
pub use dataset::LabeledImages;
pub use error::{Error, Result};
pub use evaluation::{ConfusionMatrix, Evaluation};
pub use labels::{CLASS_NAMES, NUM_CLASSES};
pub use model::{Model, ModelSummary, DEFAULT_MODEL_DIR};
pub use preprocess::InputBatch;
pub use timer::Timer;
