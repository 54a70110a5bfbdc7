//! Epoch driver built on [`NetworkEvaluator::train_step`] and
//! [`NetworkEvaluator::evaluate`].

use log::{debug, info};

use crate::buffer::{Batched2DBuffer, Slice2D};
use crate::loss::mean_absolute_error;
use crate::{
    Error, NetworkEvaluator, NeuralNetwork, Result, TaskHandle, TrainingConfig, TrainingDataset,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// Mean over the epoch's batches of the per-step average absolute error.
    pub train_error: f32,
    /// Average absolute error over the test set, if it has any rows.
    pub test_error: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub epochs: Vec<EpochReport>,
}

impl FitReport {
    /// Training error of the last epoch.
    pub fn final_error(&self) -> f32 {
        self.epochs.last().map_or(0.0, |e| e.train_error)
    }
}

/// Initialize `network` from `config.seed` and wrap it in an evaluator using
/// the config's learning rate, capacity and loss.
pub fn build_evaluator(
    mut network: NeuralNetwork,
    config: &TrainingConfig,
) -> Result<NetworkEvaluator> {
    config.validate()?;
    network.initialize_weights(config.init_min, config.init_max, config.seed)?;
    Ok(
        NetworkEvaluator::new(network, config.learning_rate, config.max_batch_size)?
            .with_loss(config.loss),
    )
}

/// Train `evaluator` on `dataset` for `config.epochs` epochs.
///
/// Each epoch shuffles the training set (seed `config.seed + epoch`), then
/// runs one train step per `config.batch_size` rows; the last batch of an
/// epoch may be shorter. The evaluator keeps its own learning rate, loss and
/// capacity: `config.learning_rate`, `config.loss` and
/// `config.max_batch_size` are applied when building it.
///
/// The first failing step aborts training with its error.
pub fn fit(
    evaluator: &mut NetworkEvaluator,
    dataset: &mut TrainingDataset,
    config: &TrainingConfig,
) -> Result<FitReport> {
    config.validate()?;
    let network = evaluator.network();
    if dataset.input_size() != network.input_size() {
        return Err(Error::ShapeMismatch(format!(
            "dataset input_size {} does not match network input_size {}",
            dataset.input_size(),
            network.input_size()
        )));
    }
    if dataset.result_size() != network.output_size() {
        return Err(Error::ShapeMismatch(format!(
            "dataset result_size {} does not match network output_size {}",
            dataset.result_size(),
            network.output_size()
        )));
    }
    let batch_size = config.batch_size.min(evaluator.max_batch_size());

    let mut epochs = Vec::with_capacity(config.epochs);
    let mut handle = TaskHandle::completed();

    for epoch in 0..config.epochs {
        dataset.shuffle_training_data(config.seed.wrapping_add(epoch as u64));

        let mut error_sum = 0.0_f32;
        let mut steps = 0_usize;
        let mut start = 0;
        while start < dataset.training_set_size() {
            let count = batch_size.min(dataset.training_set_size() - start);
            let (inputs, targets) = dataset.training_batch(start, count)?;
            let (next, error) = evaluator.train_step(&inputs, &targets, count, &handle)?;
            handle = next;
            error_sum += error;
            steps += 1;
            start += count;
        }

        let (test_inputs, test_targets) = dataset.test_set();
        let test_error = if test_inputs.rows() > 0 {
            Some(evaluate_dataset(evaluator, &test_inputs, &test_targets)?)
        } else {
            None
        };

        let report = EpochReport {
            train_error: error_sum / steps as f32,
            test_error,
        };
        match test_error {
            Some(test) => info!(
                "epoch {}/{}: train error {:.5}, test error {test:.5}",
                epoch + 1,
                config.epochs,
                report.train_error
            ),
            None => info!(
                "epoch {}/{}: train error {:.5}",
                epoch + 1,
                config.epochs,
                report.train_error
            ),
        }
        epochs.push(report);
    }

    Ok(FitReport { epochs })
}

/// Average absolute error of the evaluator's outputs over every row of
/// `inputs`, in chunks of at most `max_batch_size` rows.
///
/// The error is `sum(|actual - target|) / rows`, matching the value reported
/// by [`NetworkEvaluator::train_step`].
pub fn evaluate_dataset(
    evaluator: &mut NetworkEvaluator,
    inputs: &Slice2D<f32>,
    targets: &Slice2D<f32>,
) -> Result<f32> {
    if inputs.rows() != targets.rows() {
        return Err(Error::ShapeMismatch(format!(
            "inputs have {} rows, targets have {}",
            inputs.rows(),
            targets.rows()
        )));
    }
    if inputs.rows() == 0 {
        return Err(Error::InvalidData("nothing to evaluate".to_owned()));
    }

    let rows = inputs.rows();
    let chunk = evaluator.max_batch_size();
    let outputs = Batched2DBuffer::new(chunk, evaluator.network().output_size());
    let mut total = 0.0_f32;

    let mut start = 0;
    while start < rows {
        let count = chunk.min(rows - start);
        let batch = inputs.slice(start, count)?;
        let expected = targets.slice(start, count)?;
        let output = outputs.slice(0, count)?;

        evaluator
            .evaluate(&batch, &output, count, &TaskHandle::completed())?
            .wait()?;
        total += mean_absolute_error(&output.read(), &expected.read(), count) * count as f32;
        start += count;
    }

    debug!("evaluated {rows} rows");
    Ok(total / rows as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activation, NetworkDescription, OutputLoss};

    fn evaluator(max_batch_size: usize) -> NetworkEvaluator {
        let description = NetworkDescription::builder(2)
            .unwrap()
            .output(1, Activation::Linear)
            .unwrap();
        let mut net = NeuralNetwork::new(&description).unwrap();
        net.set_parameters(1, vec![1.0, 1.0], vec![0.0]).unwrap();
        NetworkEvaluator::new(net, 0.01, max_batch_size).unwrap()
    }

    fn sum_dataset(cases: usize, fraction: f32) -> TrainingDataset {
        let inputs: Vec<f32> = (0..cases).flat_map(|i| [i as f32, 1.0]).collect();
        let targets = (0..cases).map(|i| i as f32 + 1.0).collect();
        TrainingDataset::from_flat(inputs, targets, 2, 1, fraction).unwrap()
    }

    #[test]
    fn evaluate_dataset_chunks_by_capacity() {
        // The network computes x0 + x1, which equals the target exactly.
        let mut ev = evaluator(3);
        let data = sum_dataset(8, 1.0);
        let (x, y) = data.training_set();
        assert_eq!(evaluate_dataset(&mut ev, &x, &y).unwrap(), 0.0);

        let shifted =
            Batched2DBuffer::from_vec((0..8).map(|i| i as f32 + 3.0).collect(), 1).unwrap();
        let err = evaluate_dataset(&mut ev, &x, &shifted.as_slice()).unwrap();
        assert!((err - 2.0).abs() < 1e-6);
    }

    #[test]
    fn evaluate_dataset_rejects_mismatched_rows() {
        let mut ev = evaluator(3);
        let data = sum_dataset(8, 1.0);
        let (x, y) = data.training_set();
        let y = y.slice(0, 4).unwrap();
        assert!(matches!(
            evaluate_dataset(&mut ev, &x, &y),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn fit_reports_every_epoch_and_covers_short_batches() {
        let mut ev = evaluator(4);
        let mut data = sum_dataset(10, 0.7);
        let config = TrainingConfig {
            learning_rate: 0.01,
            epochs: 3,
            batch_size: 3,
            max_batch_size: 4,
            ..TrainingConfig::default()
        };

        let report = fit(&mut ev, &mut data, &config).unwrap();
        assert_eq!(report.epochs.len(), 3);
        for epoch in &report.epochs {
            assert!(epoch.train_error.abs() < 1e-6);
            assert!(epoch.test_error.is_some());
        }
        assert_eq!(report.final_error(), report.epochs[2].train_error);
    }

    #[test]
    fn build_evaluator_applies_the_config() {
        let description = NetworkDescription::builder(2)
            .unwrap()
            .hidden(3, Activation::Sigmoid)
            .unwrap()
            .output(1, Activation::Sigmoid)
            .unwrap();
        let config = TrainingConfig {
            learning_rate: 0.25,
            max_batch_size: 8,
            batch_size: 8,
            loss: OutputLoss::Quadratic,
            ..TrainingConfig::default()
        };

        let ev = build_evaluator(NeuralNetwork::new(&description).unwrap(), &config).unwrap();
        assert_eq!(ev.learning_rate(), 0.25);
        assert_eq!(ev.max_batch_size(), 8);
        assert_eq!(ev.loss(), OutputLoss::Quadratic);
        assert!(ev.network().weights(1).iter().all(|w| *w != 0.0));

        let mut seeded = NeuralNetwork::new(&description).unwrap();
        seeded
            .initialize_weights(config.init_min, config.init_max, config.seed)
            .unwrap();
        assert_eq!(ev.network().weights(2), seeded.weights(2));
    }

    #[test]
    fn fit_rejects_mismatched_dataset() {
        let mut ev = evaluator(4);
        let mut data =
            TrainingDataset::from_flat(vec![0.0; 9], vec![0.0; 3], 3, 1, 1.0).unwrap();
        assert!(matches!(
            fit(&mut ev, &mut data, &TrainingConfig::default()),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
