use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes could not be decoded as an image.
    #[error("{0}")]
    Image(#[from] image::ImageError),

    #[error("Model error: {0}")]
    Model(String),

    #[cfg(feature = "tensorflow")]
    #[error("TensorFlow error: {0}")]
    Tensorflow(#[from] tensorflow::Status),

    /// Model output width disagrees with the class label table.
    #[error("model emits {actual} scores but the label table has {expected} classes")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Model output is not a probability vector.
    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("could not fetch image: {0}")]
    Fetch(#[from] reqwest::Error),
}

impl Error {
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    /// True when the error stems from undecodable image bytes.
    pub fn is_invalid_image(&self) -> bool {
        matches!(self, Error::Image(_))
    }
}
