//! Batched forward evaluation, backpropagation and gradient descent.
//!
//! Every operation schedules a chain of tasks on the evaluator's
//! [`TaskGraph`] and returns the handle of the last one. Pass that handle as
//! `after` to the next call to keep steps ordered. Working buffers are reused
//! from step to step, so a new step must not start before the previous one's
//! terminal handle has completed.
//!
//! A training step schedules, strictly in this order:
//!
//! 1. `evaluate` for layers `1..n`
//! 2. the output error
//! 3. for `L` from `n - 2` down to `0`: `backpropagate` into `L` (skipped for
//!    the input layer), then the weight gradients of layer `L + 1`
//! 4. the weight and bias update of layers `1..n`
//!
//! A NaN or infinity anywhere in steps 1 to 3 fails the task that saw it,
//! which skips everything after it; the update never runs.

use log::{debug, trace, warn};
use rayon::prelude::*;

use crate::buffer::{Batched2DBuffer, SharedVec, Slice2D};
use crate::loss::mean_absolute_error;
use crate::{
    Error, EvaluatorLayer, LayerRole, NeuralNetwork, OutputLoss, Result, TaskGraph, TaskHandle,
};

#[derive(Debug)]
pub struct NetworkEvaluator {
    network: NeuralNetwork,
    layers: Vec<EvaluatorLayer>,
    graph: TaskGraph,
    learning_rate: f32,
    max_batch_size: usize,
    loss: OutputLoss,
}

impl NetworkEvaluator {
    /// Allocate working buffers for batches of up to `max_batch_size` rows.
    ///
    /// The evaluator owns `network` until [`dispose`](Self::dispose) hands it
    /// back. Tasks run on a fresh worker pool with one thread per core.
    pub fn new(network: NeuralNetwork, learning_rate: f32, max_batch_size: usize) -> Result<Self> {
        validate_learning_rate(learning_rate)?;
        Self::with_graph(network, learning_rate, max_batch_size, TaskGraph::new(0)?)
    }

    /// Like [`new`](Self::new), running tasks on an existing pool.
    pub fn with_graph(
        network: NeuralNetwork,
        learning_rate: f32,
        max_batch_size: usize,
        graph: TaskGraph,
    ) -> Result<Self> {
        validate_learning_rate(learning_rate)?;
        if max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be > 0".into()));
        }

        let layers = network
            .layers()
            .iter()
            .enumerate()
            .map(|(i, layer)| EvaluatorLayer::for_layer(i, layer, max_batch_size))
            .collect();

        debug!(
            "evaluator: {} layers, max batch {max_batch_size}, learning rate {learning_rate}, {} worker threads",
            network.num_layers(),
            graph.num_threads()
        );

        Ok(Self {
            network,
            layers,
            graph,
            learning_rate,
            max_batch_size,
            loss: OutputLoss::default(),
        })
    }

    pub fn with_loss(mut self, loss: OutputLoss) -> Self {
        self.loss = loss;
        self
    }

    #[inline]
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Change the learning rate used by subsequent steps.
    pub fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()> {
        validate_learning_rate(learning_rate)?;
        self.learning_rate = learning_rate;
        Ok(())
    }

    #[inline]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[inline]
    pub fn loss(&self) -> OutputLoss {
        self.loss
    }

    #[inline]
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    #[inline]
    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    /// Working state of layer `i`. Panics if out of range.
    #[inline]
    pub fn layer(&self, i: usize) -> &EvaluatorLayer {
        &self.layers[i]
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Schedule a forward pass of the first `count` rows of `input`, copying
    /// the output activations into the first `count` rows of `output`.
    ///
    /// Shape errors are reported before anything is scheduled or bound.
    pub fn evaluate(
        &mut self,
        input: &Slice2D<f32>,
        output: &Slice2D<f32>,
        count: usize,
        after: &TaskHandle,
    ) -> Result<TaskHandle> {
        self.check_count(count)?;
        self.check_batch("input", input, self.network.input_size(), count)?;
        self.check_batch("output", output, self.network.output_size(), count)?;

        trace!("evaluate {count} rows");
        self.layers[0].bind_input(input);
        let handle = self.schedule_forward(count, after);
        let handle = self.schedule_copy_output(output, count, &handle);
        self.release_bindings();

        Ok(handle)
    }

    /// Schedule a forward pass and backpropagation of `count` rows, leaving
    /// each layer's weight gradients and errors in its evaluator layer.
    ///
    /// Parameters are not updated.
    pub fn compute_gradients(
        &mut self,
        input: &Slice2D<f32>,
        target: &Slice2D<f32>,
        count: usize,
        after: &TaskHandle,
    ) -> Result<TaskHandle> {
        self.check_count(count)?;
        self.check_batch("input", input, self.network.input_size(), count)?;
        self.check_batch("target", target, self.network.output_size(), count)?;

        self.bind(input, target);
        let handle = self.schedule_forward(count, after);
        let handle = self.schedule_gradients(count, &handle);
        self.release_bindings();

        Ok(handle)
    }

    /// One gradient descent step over the first `count` rows.
    ///
    /// Blocks until the step finishes and returns its terminal handle with
    /// the average absolute error of the outputs computed before the update:
    /// `sum(|actual - target|) / count`.
    pub fn train_step(
        &mut self,
        input: &Slice2D<f32>,
        target: &Slice2D<f32>,
        count: usize,
        after: &TaskHandle,
    ) -> Result<(TaskHandle, f32)> {
        self.check_count(count)?;
        self.check_batch("input", input, self.network.input_size(), count)?;
        self.check_batch("target", target, self.network.output_size(), count)?;

        debug!("train step over {count} rows");
        let scratch = Batched2DBuffer::new(count, self.network.output_size());

        self.bind(input, target);
        let handle = self.schedule_forward(count, after);
        let handle = self.schedule_copy_output(&scratch.as_slice(), count, &handle);
        let handle = self.schedule_gradients(count, &handle);
        let handle = self.apply_gradients(count, &handle);
        self.release_bindings();

        if let Err(err) = handle.wait() {
            warn!("train step over {count} rows aborted: {err}");
            return Err(err);
        }

        let actual = scratch.as_slice();
        let expected = target.head(count);
        let error = mean_absolute_error(&actual.read(), &expected.read(), count);
        Ok((handle, error))
    }

    /// Give back the network, releasing every working buffer.
    ///
    /// Every handle returned by this evaluator must have completed.
    pub fn dispose(self) -> NeuralNetwork {
        debug!("disposing evaluator with {} layers", self.layers.len());
        let Self {
            network, layers, ..
        } = self;
        drop(layers);
        network
    }

    fn bind(&mut self, input: &Slice2D<f32>, target: &Slice2D<f32>) {
        self.layers[0].bind_input(input);
        let last = self.layers.len() - 1;
        self.layers[last].bind_target(target);
    }

    fn release_bindings(&mut self) {
        for layer in &mut self.layers {
            layer.unbind();
        }
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.max_batch_size {
            return Err(Error::ShapeMismatch(format!(
                "batch count must be in 1..={}, got {count}",
                self.max_batch_size
            )));
        }
        Ok(())
    }

    fn check_batch(
        &self,
        what: &str,
        batch: &Slice2D<f32>,
        feature_count: usize,
        count: usize,
    ) -> Result<()> {
        if batch.feature_count() != feature_count {
            return Err(Error::ShapeMismatch(format!(
                "{what} batch has {} features, expected {feature_count}",
                batch.feature_count()
            )));
        }
        if batch.rows() < count {
            return Err(Error::ShapeMismatch(format!(
                "{what} batch has {} rows, {count} requested",
                batch.rows()
            )));
        }
        // A task would lock the same buffer for reading and writing.
        if self.layers.iter().any(|layer| layer.owns_storage_of(batch)) {
            return Err(Error::ShapeMismatch(format!(
                "{what} batch aliases an evaluator working buffer"
            )));
        }
        Ok(())
    }

    fn schedule_forward(&self, count: usize, after: &TaskHandle) -> TaskHandle {
        let mut handle = after.clone();
        for (i, layer) in self.network.layers().iter().enumerate().skip(1) {
            handle = layer.evaluate(
                &self.graph,
                &self.layers[i - 1],
                &self.layers[i],
                count,
                &handle,
            );
        }
        handle
    }

    fn schedule_copy_output(
        &self,
        output: &Slice2D<f32>,
        count: usize,
        after: &TaskHandle,
    ) -> TaskHandle {
        let last = &self.layers[self.layers.len() - 1];
        let source = last.activations(count);
        let destination = output.head(count);

        self.graph.schedule("copy_output", after, move || {
            let source = source.read();
            let mut destination = destination.write();
            destination.copy_from_slice(&source);
            Ok(())
        })
    }

    fn schedule_gradients(&self, count: usize, after: &TaskHandle) -> TaskHandle {
        let last = self.layers.len() - 1;
        let mut handle = self.schedule_output_error(count, after);

        for l in (0..last).rev() {
            if l != 0 {
                handle = self.network.layer(l).backpropagate(
                    &self.graph,
                    &self.layers[l],
                    &self.layers[l + 1],
                    count,
                    &handle,
                );
            }
            handle = self.accumulate_gradient_over_weight(l + 1, count, &handle);
        }
        handle
    }

    fn schedule_output_error(&self, count: usize, after: &TaskHandle) -> TaskHandle {
        let index = self.layers.len() - 1;
        let output = &self.layers[index];
        let actual = output.activations(count);
        let weighted = output.weighted_inputs(count);
        let target = output.target(count);
        let error = output.errors(count);
        let activation = self.network.layer(index).activation();
        let loss = self.loss;

        self.graph.schedule("output_error", after, move || {
            let actual = actual.read();
            let weighted = weighted.read();
            let target = target.read();
            let mut error = error.write();

            error
                .par_iter_mut()
                .zip(actual.par_iter())
                .zip(weighted.par_iter().zip(target.par_iter()))
                .try_for_each(|((e, &a), (&z, &t))| {
                    let value = loss.output_error(activation, a, t, z);
                    if !value.is_finite() {
                        return Err(Error::NumericInstability {
                            stage: "output_error",
                            layer: index,
                        });
                    }
                    *e = value;
                    Ok(())
                })
        })
    }

    /// Schedule `weight_gradients[n * previous_size + k] = sum_b previous_activation[b, k] * error[b, n]`
    /// for layer `index`.
    ///
    /// Layer `index - 1`'s activations must be available: for `index == 1`
    /// that means an input is bound.
    pub(crate) fn accumulate_gradient_over_weight(
        &self,
        index: usize,
        count: usize,
        after: &TaskHandle,
    ) -> TaskHandle {
        assert!(
            index > 0 && index < self.layers.len(),
            "weight gradients exist for layers 1..{}, got {index}",
            self.layers.len()
        );
        trace!("accumulate weight gradients of layer {index} over {count} rows");

        let previous = self.layers[index - 1].activations(count);
        let error = self.layers[index].errors(count);
        let gradients = self.layers[index].weight_gradients().share();

        self.graph
            .schedule("accumulate_gradient_over_weight", after, move || {
                accumulate_rows(index, &previous, &error, &gradients)
            })
    }

    /// Schedule `weight -= learning_rate * gradient` and
    /// `bias[n] -= learning_rate * sum_b error[b, n]` for layers `1..n`.
    pub(crate) fn apply_gradients(&self, count: usize, after: &TaskHandle) -> TaskHandle {
        let mut handle = after.clone();
        for state in self.layers.iter().skip(1) {
            debug_assert_ne!(state.role(), LayerRole::Input);
            let weights = state.weights().share();
            let biases = state.biases().share();
            let gradients = state.weight_gradients().share();
            let error = state.errors(count);
            let learning_rate = self.learning_rate;

            handle = self.graph.schedule("apply_gradients", &handle, move || {
                apply_rows(learning_rate, &weights, &biases, &gradients, &error);
                Ok(())
            });
        }
        handle
    }
}

fn validate_learning_rate(learning_rate: f32) -> Result<()> {
    if !learning_rate.is_finite() || learning_rate <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "learning rate must be finite and > 0, got {learning_rate}"
        )));
    }
    Ok(())
}

fn accumulate_rows(
    layer: usize,
    previous: &Slice2D<f32>,
    error: &Slice2D<f32>,
    gradients: &SharedVec<f32>,
) -> Result<()> {
    let previous = previous.read();
    let error = error.read();
    let mut gradients = gradients.write();

    let previous_size = previous.feature_count();
    let size = error.feature_count();
    let rows = error.len() / size;
    debug_assert_eq!(gradients.len(), size * previous_size);

    gradients
        .par_chunks_mut(previous_size)
        .enumerate()
        .try_for_each(|(n, row)| {
            for (k, g) in row.iter_mut().enumerate() {
                let mut sum = 0.0_f32;
                for b in 0..rows {
                    sum = previous[b * previous_size + k].mul_add(error[b * size + n], sum);
                }
                if !sum.is_finite() {
                    return Err(Error::NumericInstability {
                        stage: "accumulate_gradient_over_weight",
                        layer,
                    });
                }
                *g = sum;
            }
            Ok(())
        })
}

fn apply_rows(
    learning_rate: f32,
    weights: &SharedVec<f32>,
    biases: &SharedVec<f32>,
    gradients: &SharedVec<f32>,
    error: &Slice2D<f32>,
) {
    let gradients = gradients.read();
    let error = error.read();
    let mut weights = weights.write();
    let mut biases = biases.write();

    weights
        .par_iter_mut()
        .zip(gradients.par_iter())
        .for_each(|(w, &g)| *w -= learning_rate * g);

    let size = biases.len();
    let error: &[f32] = &error;
    biases.par_iter_mut().enumerate().for_each(|(n, b)| {
        let sum: f32 = error.chunks(size).map(|row| row[n]).sum();
        *b -= learning_rate * sum;
    });
}
