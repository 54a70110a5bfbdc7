//! Supervised training data split into a training and a test portion.
//!
//! Inputs and targets live in two [`Batched2DBuffer`]s with one row per case.
//! The first `training_set_size` rows are the training set, the rest the test
//! set. Batches are [`Slice2D`] views, so handing one to an evaluator never
//! copies.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::buffer::{Batched2DBuffer, Slice2D};
use crate::{Error, Result};

/// Share of the cases used for training when no fraction is given.
pub const DEFAULT_TRAINING_FRACTION: f32 = 0.7;

#[derive(Debug)]
pub struct TrainingDataset {
    inputs: Batched2DBuffer<f32>,
    targets: Batched2DBuffer<f32>,
    case_count: usize,
    training_set_size: usize,
}

impl TrainingDataset {
    /// Build a dataset from flat row-major buffers.
    ///
    /// `inputs` is `(cases, input_size)` and `targets` is `(cases, result_size)`.
    /// The first `floor(cases * training_fraction)` cases form the training set.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_size: usize,
        result_size: usize,
        training_fraction: f32,
    ) -> Result<Self> {
        if !(training_fraction > 0.0 && training_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "training fraction must be in (0, 1], got {training_fraction}"
            )));
        }
        if input_size == 0 || result_size == 0 {
            return Err(Error::InvalidData(
                "input_size and result_size must be > 0".to_owned(),
            ));
        }
        if inputs.is_empty() {
            return Err(Error::InvalidData("dataset must not be empty".to_owned()));
        }

        let inputs = Batched2DBuffer::from_vec(inputs, input_size)?;
        let case_count = inputs.capacity();
        if targets.len() != case_count * result_size {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match cases * result_size ({case_count} * {result_size})",
                targets.len()
            )));
        }
        let targets = Batched2DBuffer::from_vec(targets, result_size)?;

        let training_set_size = training_rows(case_count, training_fraction);
        if training_set_size == 0 {
            return Err(Error::InvalidData(format!(
                "training fraction {training_fraction} of {case_count} cases leaves no training data"
            )));
        }

        debug!(
            "dataset: {case_count} cases ({training_set_size} training), {input_size} inputs, {result_size} results"
        );

        Ok(Self {
            inputs,
            targets,
            case_count,
            training_set_size,
        })
    }

    /// Build a dataset from per-case rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
        training_fraction: f32,
    ) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            )));
        }
        let input_size = flat_width("input", inputs)?;
        let result_size = flat_width("target", targets)?;

        Self::from_flat(
            inputs.concat(),
            targets.concat(),
            input_size,
            result_size,
            training_fraction,
        )
    }

    #[inline]
    pub fn case_count(&self) -> usize {
        self.case_count
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.inputs.feature_count()
    }

    #[inline]
    pub fn result_size(&self) -> usize {
        self.targets.feature_count()
    }

    #[inline]
    pub fn training_set_size(&self) -> usize {
        self.training_set_size
    }

    #[inline]
    pub fn test_set_size(&self) -> usize {
        self.case_count - self.training_set_size
    }

    /// Reorder the training cases, keeping each input row with its target row.
    /// Test cases are never moved.
    pub fn shuffle_training_data(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let input_size = self.input_size();
        let result_size = self.result_size();
        let mut inputs = self.inputs.storage().write();
        let mut targets = self.targets.storage().write();

        for i in (1..self.training_set_size).rev() {
            let j = rng.gen_range(0..=i);
            swap_rows(&mut inputs, input_size, i, j);
            swap_rows(&mut targets, result_size, i, j);
        }
    }

    /// Rows `start..start + count` of the training set.
    pub fn training_batch(
        &self,
        start: usize,
        count: usize,
    ) -> Result<(Slice2D<f32>, Slice2D<f32>)> {
        self.rows(0, self.training_set_size, start, count)
    }

    /// Rows `start..start + count` of the test set.
    pub fn test_batch(&self, start: usize, count: usize) -> Result<(Slice2D<f32>, Slice2D<f32>)> {
        self.rows(self.training_set_size, self.test_set_size(), start, count)
    }

    pub fn training_case(&self, i: usize) -> Result<(Slice2D<f32>, Slice2D<f32>)> {
        self.training_batch(i, 1)
    }

    pub fn test_case(&self, i: usize) -> Result<(Slice2D<f32>, Slice2D<f32>)> {
        self.test_batch(i, 1)
    }

    /// Every training row.
    pub fn training_set(&self) -> (Slice2D<f32>, Slice2D<f32>) {
        self.split(0, self.training_set_size)
    }

    /// Every test row; zero rows if the whole dataset is used for training.
    pub fn test_set(&self) -> (Slice2D<f32>, Slice2D<f32>) {
        self.split(self.training_set_size, self.test_set_size())
    }

    fn rows(
        &self,
        portion_start: usize,
        portion_len: usize,
        start: usize,
        count: usize,
    ) -> Result<(Slice2D<f32>, Slice2D<f32>)> {
        let (inputs, targets) = self.split(portion_start, portion_len);
        Ok((inputs.slice(start, count)?, targets.slice(start, count)?))
    }

    fn split(&self, start: usize, count: usize) -> (Slice2D<f32>, Slice2D<f32>) {
        (
            self.inputs.as_slice().range(start, count),
            self.targets.as_slice().range(start, count),
        )
    }
}

/// `floor(case_count * fraction)`, computed in `f64` and never above `case_count`.
///
/// The fraction is taken as its shortest decimal form (`0.7f32` is 0.7, not
/// 0.699999988), and products within rounding of an integer snap to it, so 70%
/// of 10 cases is 7.
fn training_rows(case_count: usize, fraction: f32) -> usize {
    let fraction = fraction
        .to_string()
        .parse::<f64>()
        .unwrap_or_else(|_| f64::from(fraction));
    let exact = case_count as f64 * fraction;
    let nearest = exact.round();
    let rows = if (nearest - exact).abs() <= exact * 4.0 * f64::EPSILON {
        nearest
    } else {
        exact.floor()
    };
    (rows as usize).min(case_count)
}

fn flat_width(what: &str, rows: &[Vec<f32>]) -> Result<usize> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Err(Error::InvalidData(format!("{what} rows must not be empty")));
    }
    for (i, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(Error::InvalidData(format!(
                "{what} row {i} has len {}, expected {width}",
                row.len()
            )));
        }
    }
    Ok(width)
}

fn swap_rows(data: &mut [f32], width: usize, a: usize, b: usize) {
    if a == b {
        return;
    }
    let (lo, hi) = (a.min(b), a.max(b));
    let (head, tail) = data.split_at_mut(hi * width);
    head[lo * width..(lo + 1) * width].swap_with_slice(&mut tail[..width]);
}
