//! Dataset shuffling and splitting
//!
//! The archive lists samples grouped by class, so they are shuffled once
//! (with a fixed seed) before being cut into validation, test and
//! training sets. The shuffle is never repeated: re-shuffling between
//! epochs would leak samples across the splits.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::trajectory::Sample;
use crate::error::{Error, Result};

/// Streaming shuffle with a bounded buffer.
///
/// The buffer is filled with the first `buffer_size` items; each output
/// is drawn uniformly from the buffer and its slot is refilled with the
/// next input item. Once the input is exhausted the buffer drains in
/// random order. A buffer at least as large as the input gives a full
/// uniform shuffle.
pub fn buffered_shuffle<T, R: Rng>(items: Vec<T>, buffer_size: usize, rng: &mut R) -> Vec<T> {
    let buffer_size = buffer_size.max(1);
    let mut output = Vec::with_capacity(items.len());
    let mut input = items.into_iter();
    let mut buffer: Vec<T> = input.by_ref().take(buffer_size).collect();

    while !buffer.is_empty() {
        let slot = rng.gen_range(0..buffer.len());
        match input.next() {
            Some(next) => output.push(std::mem::replace(&mut buffer[slot], next)),
            None => output.push(buffer.swap_remove(slot)),
        }
    }

    output
}

/// Sizes and seed used to split a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub shuffle_buffer: usize,
    pub seed: u64,
    pub val_size: usize,
    pub test_size: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            shuffle_buffer: 1000,
            seed: 0,
            val_size: 100,
            test_size: 100,
        }
    }
}

/// Validation, test and training samples
#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    pub train: Vec<Sample>,
    pub val: Vec<Sample>,
    pub test: Vec<Sample>,
}

impl DatasetSplit {
    /// Take `val_size` samples for validation, the next `test_size` for
    /// testing and keep the rest for training. Order is preserved.
    pub fn split(samples: Vec<Sample>, val_size: usize, test_size: usize) -> Result<Self> {
        if samples.len() <= val_size + test_size {
            return Err(Error::InsufficientData(format!(
                "{} samples leave nothing to train on after {} validation and {} test samples",
                samples.len(),
                val_size,
                test_size
            )));
        }

        let mut rest = samples;
        let mut tail = rest.split_off(val_size);
        let train = tail.split_off(test_size);

        Ok(Self {
            train,
            val: rest,
            test: tail,
        })
    }

    /// Shuffle once with the configured seed, then split
    pub fn shuffle_and_split(samples: Vec<Sample>, config: &SplitConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let shuffled = buffered_shuffle(samples, config.shuffle_buffer, &mut rng);
        let split = Self::split(shuffled, config.val_size, config.test_size)?;

        info!(
            "Dataset split: {} train, {} validation, {} test",
            split.train.len(),
            split.val.len(),
            split.test.len()
        );
        Ok(split)
    }
}
