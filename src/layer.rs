use log::trace;
use rayon::prelude::*;

use crate::activation::ActivationFns;
use crate::buffer::{SharedVec, Slice2D};
use crate::{
    Activation, Error, EvaluatorLayer, LayerParameters, LayerRole, Result, TaskGraph, TaskHandle,
};

/// Trainable state of one layer.
///
/// `weights` is row-major with shape `(size, previous_size)`: the weights
/// feeding neuron `n` are contiguous at `n * previous_size..(n + 1) * previous_size`.
/// Input layers carry no weights or biases.
#[derive(Debug)]
pub struct NetworkLayer {
    role: LayerRole,
    size: usize,
    previous_size: usize,
    activation: Activation,
    weights: SharedVec<f32>,
    biases: SharedVec<f32>,
}

impl NetworkLayer {
    pub(crate) fn input(params: &LayerParameters) -> Self {
        assert_eq!(
            params.role,
            LayerRole::Input,
            "input layer constructor used for a {:?} layer",
            params.role
        );
        Self {
            role: LayerRole::Input,
            size: params.neuron_count,
            previous_size: 0,
            activation: params.activation,
            weights: SharedVec::new(Vec::new()),
            biases: SharedVec::new(Vec::new()),
        }
    }

    /// Parameters are zero-filled; run an initialization pass before training.
    pub(crate) fn new(params: &LayerParameters, previous: &LayerParameters) -> Self {
        assert_ne!(
            params.role,
            LayerRole::Input,
            "input layers cannot be built on top of a previous layer"
        );
        let weights = vec![0.0; params.neuron_count * previous.neuron_count];
        let biases = vec![0.0; params.neuron_count];
        Self {
            role: params.role,
            size: params.neuron_count,
            previous_size: previous.neuron_count,
            activation: params.activation,
            weights: SharedVec::new(weights),
            biases: SharedVec::new(biases),
        }
    }

    #[inline]
    pub fn role(&self) -> LayerRole {
        self.role
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the layer feeding this one (`0` for the input layer).
    #[inline]
    pub fn previous_size(&self) -> usize {
        self.previous_size
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn weight_count(&self) -> usize {
        self.size * self.previous_size
    }

    #[inline]
    pub fn has_bias(&self) -> bool {
        self.role != LayerRole::Input
    }

    /// Copy of the weight matrix.
    pub fn weights(&self) -> Vec<f32> {
        self.weights.snapshot()
    }

    /// Copy of the bias vector.
    pub fn biases(&self) -> Vec<f32> {
        self.biases.snapshot()
    }

    #[inline]
    pub(crate) fn weights_storage(&self) -> &SharedVec<f32> {
        &self.weights
    }

    #[inline]
    pub(crate) fn biases_storage(&self) -> &SharedVec<f32> {
        &self.biases
    }

    /// Schedule the forward pass of this layer for the first `count` batch rows.
    ///
    /// Per row `b` and neuron `n`:
    /// - `weighted_input[b, n] = bias[n] + sum_k previous[b, k] * weight[n * previous_size + k]`
    /// - `activation[b, n] = f(weighted_input[b, n])`
    ///
    /// Panics when called on the input layer.
    pub fn evaluate(
        &self,
        graph: &TaskGraph,
        previous: &EvaluatorLayer,
        current: &EvaluatorLayer,
        count: usize,
        after: &TaskHandle,
    ) -> TaskHandle {
        assert_ne!(self.role, LayerRole::Input, "input layers are never evaluated");
        assert_eq!(
            previous.size(),
            self.previous_size,
            "previous evaluator layer has {} neurons, layer expects {}",
            previous.size(),
            self.previous_size
        );
        assert_eq!(
            current.size(),
            self.size,
            "evaluator layer has {} neurons, layer has {}",
            current.size(),
            self.size
        );

        let layer_index = current.index();
        trace!("evaluate layer {layer_index} over {count} rows");

        let source = previous.activations(count);
        let weighted = current.weighted_inputs(count);
        let activations = current.activations(count);
        let weights = self.weights.share();
        let biases = self.biases.share();
        let fns = self.activation.fns();

        graph.schedule("evaluate", after, move || {
            forward_rows(
                layer_index,
                fns,
                &source,
                &weights,
                &biases,
                &weighted,
                &activations,
            )
        })
    }

    /// Schedule the error of this layer from the error of the next one.
    ///
    /// Per row `b` and neuron `n`:
    /// `error[b, n] = f'(weighted_input[b, n]) * sum_j next_error[b, j] * next_weight[j * size + n]`
    ///
    /// Panics when called on the input layer.
    pub fn backpropagate(
        &self,
        graph: &TaskGraph,
        current: &EvaluatorLayer,
        next: &EvaluatorLayer,
        count: usize,
        after: &TaskHandle,
    ) -> TaskHandle {
        assert_ne!(
            self.role,
            LayerRole::Input,
            "input layers are never backpropagated"
        );
        assert_eq!(
            current.size(),
            self.size,
            "evaluator layer has {} neurons, layer has {}",
            current.size(),
            self.size
        );

        let layer_index = current.index();
        trace!("backpropagate layer {layer_index} over {count} rows");

        let next_error = next.errors(count);
        let next_weights = next.weights().share();
        let weighted = current.weighted_inputs(count);
        let error = current.errors(count);
        let derivative = self.activation.fns().derivative;

        graph.schedule("backpropagate", after, move || {
            backpropagate_rows(
                layer_index,
                derivative,
                &next_error,
                &next_weights,
                &weighted,
                &error,
            )
        })
    }
}

fn forward_rows(
    layer: usize,
    fns: ActivationFns,
    source: &Slice2D<f32>,
    weights: &SharedVec<f32>,
    biases: &SharedVec<f32>,
    weighted: &Slice2D<f32>,
    activations: &Slice2D<f32>,
) -> Result<()> {
    let source = source.read();
    let weights = weights.read();
    let biases = biases.read();
    let mut weighted = weighted.write();
    let mut activations = activations.write();

    let previous_size = source.feature_count();
    let size = biases.len();
    debug_assert_eq!(weights.len(), size * previous_size);

    weighted
        .par_chunks_mut(size)
        .zip(activations.par_chunks_mut(size))
        .zip(source.par_chunks(previous_size))
        .try_for_each(|((z_row, a_row), x_row)| {
            for n in 0..size {
                let row = &weights[n * previous_size..(n + 1) * previous_size];
                let mut z = biases[n];
                for (&w, &x) in row.iter().zip(x_row) {
                    z = w.mul_add(x, z);
                }
                let a = (fns.forward)(z);
                // `max` drops NaN, so a rectified NaN would look finite.
                if z.is_nan() || !a.is_finite() {
                    return Err(Error::NumericInstability {
                        stage: "evaluate",
                        layer,
                    });
                }
                z_row[n] = z;
                a_row[n] = a;
            }
            Ok(())
        })
}

fn backpropagate_rows(
    layer: usize,
    derivative: fn(f32) -> f32,
    next_error: &Slice2D<f32>,
    next_weights: &SharedVec<f32>,
    weighted: &Slice2D<f32>,
    error: &Slice2D<f32>,
) -> Result<()> {
    let next_error = next_error.read();
    let next_weights = next_weights.read();
    let weighted = weighted.read();
    let mut error = error.write();

    let size = weighted.feature_count();
    let next_size = next_error.feature_count();
    debug_assert_eq!(next_weights.len(), next_size * size);

    error
        .par_chunks_mut(size)
        .zip(weighted.par_chunks(size))
        .zip(next_error.par_chunks(next_size))
        .try_for_each(|((e_row, z_row), next_row)| {
            for n in 0..size {
                // Column `n` of the next layer's weight matrix.
                let mut raw = 0.0_f32;
                for (j, &next_e) in next_row.iter().enumerate() {
                    raw = next_e.mul_add(next_weights[j * size + n], raw);
                }
                let e = raw * derivative(z_row[n]);
                if !e.is_finite() {
                    return Err(Error::NumericInstability {
                        stage: "backpropagate",
                        layer,
                    });
                }
                e_row[n] = e;
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Batched2DBuffer;
    use crate::{NetworkDescription, NeuralNetwork};
    use approx::assert_abs_diff_eq;

    fn network(hidden: Activation) -> NeuralNetwork {
        let description = NetworkDescription::builder(3)
            .unwrap()
            .hidden(2, hidden)
            .unwrap()
            .output(2, Activation::Linear)
            .unwrap();
        let mut net = NeuralNetwork::new(&description).unwrap();
        net.set_parameters(1, vec![0.5, -1.0, 0.25, 1.5, 0.5, -0.5], vec![0.1, -0.2])
            .unwrap();
        net.set_parameters(2, vec![1.0, -2.0, 0.5, 3.0], vec![0.0, 0.0])
            .unwrap();
        net
    }

    fn states(net: &NeuralNetwork, input: &Slice2D<f32>) -> Vec<EvaluatorLayer> {
        let mut states: Vec<_> = net
            .layers()
            .iter()
            .enumerate()
            .map(|(i, layer)| EvaluatorLayer::for_layer(i, layer, 4))
            .collect();
        states[0].bind_input(input);
        states
    }

    #[test]
    fn evaluate_computes_weighted_input_and_activation_per_row() {
        let graph = TaskGraph::new(2).unwrap();
        let net = network(Activation::RectifiedLinear);
        let input = Batched2DBuffer::from_vec(vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0], 3).unwrap();
        let states = states(&net, &input.as_slice());

        net.layer(1)
            .evaluate(&graph, &states[0], &states[1], 2, &TaskHandle::completed())
            .wait()
            .unwrap();

        // Row 0: n0 = 0.1 + 0.5 - 2.0 + 0.75 = -0.65, n1 = -0.2 + 1.5 + 1.0 - 1.5 = 0.8
        // Row 1: n0 = 0.1 - 0.5 + 0.25 = -0.15,       n1 = -0.2 - 1.5 - 0.5 = -2.2
        let z = states[1].weighted_inputs(2).to_vec();
        let a = states[1].activations(2).to_vec();
        let expected_z = [-0.65, 0.8, -0.15, -2.2];
        for (got, want) in z.iter().zip(expected_z) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(a[0], 0.0);
        assert_abs_diff_eq!(a[1], 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(a[2], 0.0);
        assert_abs_diff_eq!(a[3], 0.0);
    }

    #[test]
    fn backpropagate_uses_the_transposed_next_weights() {
        let graph = TaskGraph::new(2).unwrap();
        let net = network(Activation::Linear);
        let input = Batched2DBuffer::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap();
        let states = states(&net, &input.as_slice());

        let forward = net
            .layer(1)
            .evaluate(&graph, &states[0], &states[1], 1, &TaskHandle::completed());
        forward.wait().unwrap();

        states[2].errors(1).write().copy_from_slice(&[1.0, 2.0]);
        net.layer(1)
            .backpropagate(&graph, &states[1], &states[2], 1, &forward)
            .wait()
            .unwrap();

        // Next weights (2x2): [[1, -2], [0.5, 3]].
        // error[n] = sum_j next_error[j] * w[j][n]
        // n0 = 1 * 1 + 2 * 0.5 = 2, n1 = 1 * -2 + 2 * 3 = 4
        assert_eq!(states[1].errors(1).to_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn backpropagate_applies_the_activation_derivative() {
        let graph = TaskGraph::new(1).unwrap();
        let net = network(Activation::RectifiedLinear);
        let input = Batched2DBuffer::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap();
        let states = states(&net, &input.as_slice());

        let forward = net
            .layer(1)
            .evaluate(&graph, &states[0], &states[1], 1, &TaskHandle::completed());
        states[2].errors(1).write().copy_from_slice(&[1.0, 2.0]);
        net.layer(1)
            .backpropagate(&graph, &states[1], &states[2], 1, &forward)
            .wait()
            .unwrap();

        // z = [-0.65, 0.8]: the first neuron is inactive.
        assert_eq!(states[1].errors(1).to_vec(), vec![0.0, 4.0]);
    }

    #[test]
    fn non_finite_activation_fails_the_task() {
        let graph = TaskGraph::new(1).unwrap();
        let mut net = network(Activation::Linear);
        net.set_parameters(1, vec![f32::MAX; 6], vec![0.0, 0.0]).unwrap();
        let input = Batched2DBuffer::from_vec(vec![f32::MAX, f32::MAX, f32::MAX], 3).unwrap();
        let states = states(&net, &input.as_slice());

        let err = net
            .layer(1)
            .evaluate(&graph, &states[0], &states[1], 1, &TaskHandle::completed())
            .wait()
            .unwrap_err();
        assert_eq!(
            err,
            Error::NumericInstability {
                stage: "evaluate",
                layer: 1
            }
        );
    }

    #[test]
    fn rectified_nan_weighted_input_fails_the_task() {
        let graph = TaskGraph::new(1).unwrap();
        let net = network(Activation::RectifiedLinear);
        let input = Batched2DBuffer::from_vec(vec![f32::NAN, 0.0, 0.0], 3).unwrap();
        let states = states(&net, &input.as_slice());

        let err = net
            .layer(1)
            .evaluate(&graph, &states[0], &states[1], 1, &TaskHandle::completed())
            .wait()
            .unwrap_err();
        assert_eq!(
            err,
            Error::NumericInstability {
                stage: "evaluate",
                layer: 1
            }
        );
    }

    #[test]
    #[should_panic(expected = "input layers are never evaluated")]
    fn evaluating_the_input_layer_is_a_contract_violation() {
        let graph = TaskGraph::new(1).unwrap();
        let net = network(Activation::Linear);
        let input = Batched2DBuffer::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap();
        let states = states(&net, &input.as_slice());
        net.layer(0)
            .evaluate(&graph, &states[0], &states[0], 1, &TaskHandle::completed());
    }

    #[test]
    #[should_panic(expected = "input layers are never backpropagated")]
    fn backpropagating_the_input_layer_is_a_contract_violation() {
        let graph = TaskGraph::new(1).unwrap();
        let net = network(Activation::Linear);
        let input = Batched2DBuffer::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap();
        let states = states(&net, &input.as_slice());
        net.layer(0)
            .backpropagate(&graph, &states[0], &states[1], 1, &TaskHandle::completed());
    }
}
