//! Pixel pipeline shared by the service and the console.
//!
//! Every image, whatever its size or channel layout, is converted to RGB and
//! resized to exactly 32x32. The aspect ratio is not preserved: the network
//! was trained on 32x32 CIFAR-10 crops and the stretched input is what it has
//! always been served.

use image::imageops::{self, FilterType};
use image::DynamicImage;

use crate::error::{Error, Result};

pub const INPUT_HEIGHT: usize = 32;
pub const INPUT_WIDTH: usize = 32;
pub const INPUT_CHANNELS: usize = 3;

/// Number of `f32` values in one preprocessed image.
pub const INPUT_LEN: usize = INPUT_HEIGHT * INPUT_WIDTH * INPUT_CHANNELS;

pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(data)?)
}

/// Force RGB, resize to 32x32 and scale intensities into [0, 1].
///
/// The result is laid out height x width x channel.
pub fn to_input(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();

    let resized = imageops::resize(
        &rgb,
        INPUT_WIDTH as u32,
        INPUT_HEIGHT as u32,
        FilterType::CatmullRom,
    );

    normalize(resized.as_raw())
}

pub fn normalize(pixels: &[u8]) -> Vec<f32> {
    pixels.iter().map(|x| *x as f32 / 255f32).collect()
}

/// A batch of preprocessed images with shape `(len, 32, 32, 3)`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputBatch {
    len: usize,
    data: Vec<f32>,
}

impl InputBatch {
    /// Reshape a flat buffer into a batch of `len` images.
    pub fn new(len: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != len * INPUT_LEN {
            return Err(Error::invalid_input(format!(
                "cannot reshape {} values into shape ({}, {}, {}, {})",
                data.len(),
                len,
                INPUT_HEIGHT,
                INPUT_WIDTH,
                INPUT_CHANNELS
            )));
        }

        Ok(InputBatch { len, data })
    }

    pub fn single(image: Vec<f32>) -> Result<Self> {
        Self::new(1, image)
    }

    /// All-zero batch, used to probe a freshly loaded model.
    pub fn zeros(len: usize) -> Self {
        InputBatch {
            len,
            data: vec![0f32; len * INPUT_LEN],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.len, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Image `i` of the batch.
    pub fn image(&self, i: usize) -> Option<&[f32]> {
        self.data.chunks_exact(INPUT_LEN).nth(i)
    }
}
