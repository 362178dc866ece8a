//! Reader for the CIFAR-10 binary batch format.
//!
//! A batch file is a sequence of 3073-byte records: one label byte followed
//! by a 32x32 image stored plane by plane (1024 red, 1024 green, 1024 blue
//! bytes, each plane row-major).

use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::labels::NUM_CLASSES;
use crate::preprocess::{INPUT_CHANNELS, INPUT_HEIGHT, INPUT_LEN, INPUT_WIDTH};

/// Default location of the reference test batch.
pub const DEFAULT_TEST_BATCH: &str = "data/cifar-10-batches-bin/test_batch.bin";

const RECORD_LEN: usize = 1 + INPUT_LEN;
const PLANE_LEN: usize = INPUT_HEIGHT * INPUT_WIDTH;

/// Normalized HWC images with their reference labels.
#[derive(Clone, Debug, Default)]
pub struct LabeledImages {
    pixels: Vec<f32>,
    labels: Vec<u8>,
}

impl LabeledImages {
    /// Read at most `limit` records from a batch file.
    pub fn load(path: &Path, limit: Option<usize>) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let images = Self::parse(&raw, limit)?;

        info!("Loaded {} samples from {}", images.len(), path.display());

        Ok(images)
    }

    pub fn parse(raw: &[u8], limit: Option<usize>) -> Result<Self> {
        if raw.len() % RECORD_LEN != 0 {
            return Err(Error::dataset(format!(
                "{} bytes is not a whole number of {}-byte records",
                raw.len(),
                RECORD_LEN
            )));
        }

        let count = limit.map_or(raw.len() / RECORD_LEN, |l| l.min(raw.len() / RECORD_LEN));
        let mut images = LabeledImages {
            pixels: Vec::with_capacity(count * INPUT_LEN),
            labels: Vec::with_capacity(count),
        };

        for (n, record) in raw.chunks_exact(RECORD_LEN).take(count).enumerate() {
            let label = record[0];
            if label as usize >= NUM_CLASSES {
                return Err(Error::dataset(format!(
                    "record {} has label {}, expected < {}",
                    n, label, NUM_CLASSES
                )));
            }

            let planes = &record[1..];
            for i in 0..PLANE_LEN {
                for c in 0..INPUT_CHANNELS {
                    images.pixels.push(planes[c * PLANE_LEN + i] as f32 / 255f32);
                }
            }
            images.labels.push(label);
        }

        Ok(images)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Flattened `(len, 32, 32, 3)` pixel buffer.
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(label: u8, rgb: [u8; 3]) -> Vec<u8> {
        let mut r = vec![label];
        for value in &rgb {
            r.extend(std::iter::repeat(*value).take(PLANE_LEN));
        }
        r
    }

    #[test]
    fn transposes_planes_to_interleaved_pixels() {
        let raw = record(6, [255, 0, 51]);
        let images = LabeledImages::parse(&raw, None).unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images.labels(), &[6]);
        assert_eq!(images.pixels().len(), INPUT_LEN);
        assert_eq!(&images.pixels()[..3], &[1.0, 0.0, 0.2]);
        assert_eq!(&images.pixels()[INPUT_LEN - 3..], &[1.0, 0.0, 0.2]);
    }

    #[test]
    fn honours_limit() {
        let mut raw = record(1, [0, 0, 0]);
        raw.extend(record(2, [0, 0, 0]));
        raw.extend(record(3, [0, 0, 0]));

        let images = LabeledImages::parse(&raw, Some(2)).unwrap();
        assert_eq!(images.labels(), &[1, 2]);

        let images = LabeledImages::parse(&raw, Some(50)).unwrap();
        assert_eq!(images.len(), 3);
    }

    #[test]
    fn rejects_truncated_file_and_bad_labels() {
        let mut raw = record(1, [0, 0, 0]);
        raw.pop();
        assert!(matches!(
            LabeledImages::parse(&raw, None),
            Err(Error::Dataset(_))
        ));

        assert!(LabeledImages::parse(&record(10, [0, 0, 0]), None).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&record(9, [10, 20, 30])).unwrap();
        file.write_all(&record(0, [30, 20, 10])).unwrap();

        let images = LabeledImages::load(file.path(), None).unwrap();
        assert_eq!(images.labels(), &[9, 0]);

        let missing = LabeledImages::load(Path::new("/nonexistent/test_batch.bin"), None);
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
