//! Per-layer working buffers of a [`NetworkEvaluator`](crate::NetworkEvaluator).
//!
//! Hidden and output layers own four buffers, all sized from the evaluator's
//! maximum batch size:
//!
//! - `activations` and `weighted_inputs`: `(capacity, size)`
//! - `errors`: `(capacity, size)`, also the bias gradient
//! - `weight_gradients`: one entry per weight of the model layer, not batched
//!
//! The input layer owns no activation storage. Its activations are the
//! caller's input rows, bound right before each evaluation. The output layer
//! additionally accepts a bound target slice for error computation.

use log::debug;

use crate::buffer::{Batched2DBuffer, SharedVec, Slice2D};
use crate::{LayerRole, NetworkLayer};

#[derive(Debug)]
enum Activations {
    Owned(Batched2DBuffer<f32>),
    Bound(Option<Slice2D<f32>>),
}

#[derive(Debug)]
pub struct EvaluatorLayer {
    index: usize,
    role: LayerRole,
    size: usize,
    capacity: usize,
    weights: SharedVec<f32>,
    biases: SharedVec<f32>,
    activations: Activations,
    weighted_inputs: Option<Batched2DBuffer<f32>>,
    errors: Batched2DBuffer<f32>,
    weight_gradients: SharedVec<f32>,
    target: Option<Slice2D<f32>>,
}

impl EvaluatorLayer {
    /// Allocate working buffers for `layer`, which sits at `index` in its network.
    pub fn for_layer(index: usize, layer: &NetworkLayer, capacity: usize) -> Self {
        let size = layer.size();
        let (activations, weighted_inputs) = match layer.role() {
            LayerRole::Input => (Activations::Bound(None), None),
            LayerRole::Hidden | LayerRole::Output => (
                Activations::Owned(Batched2DBuffer::new(capacity, size)),
                Some(Batched2DBuffer::new(capacity, size)),
            ),
        };

        debug!(
            "evaluator layer {index} ({:?}): {size} neurons x {capacity} rows, {} weight gradients",
            layer.role(),
            layer.weight_count()
        );

        Self {
            index,
            role: layer.role(),
            size,
            capacity,
            weights: layer.weights_storage().share(),
            biases: layer.biases_storage().share(),
            activations,
            weighted_inputs,
            errors: Batched2DBuffer::new(capacity, size),
            weight_gradients: SharedVec::new(vec![0.0; layer.weight_count()]),
            target: None,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn role(&self) -> LayerRole {
        self.role
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Maximum number of batch rows the owned buffers hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Use `input` as this layer's activations until the next bind or unbind.
    ///
    /// Panics unless this is the input layer.
    pub fn bind_input(&mut self, input: &Slice2D<f32>) {
        match &mut self.activations {
            Activations::Bound(slot) => *slot = Some(input.clone()),
            Activations::Owned(_) => panic!(
                "layer {} is a {:?} layer; only the input layer binds input",
                self.index, self.role
            ),
        }
    }

    /// Compare against `target` in the next error computation.
    ///
    /// Panics unless this is the output layer.
    pub fn bind_target(&mut self, target: &Slice2D<f32>) {
        assert_eq!(
            self.role,
            LayerRole::Output,
            "layer {} is a {:?} layer; only the output layer binds targets",
            self.index,
            self.role
        );
        self.target = Some(target.clone());
    }

    /// Drop any bound input or target.
    pub fn unbind(&mut self) {
        if let Activations::Bound(slot) = &mut self.activations {
            *slot = None;
        }
        self.target = None;
    }

    pub fn bound_input(&self) -> Option<&Slice2D<f32>> {
        match &self.activations {
            Activations::Bound(slot) => slot.as_ref(),
            Activations::Owned(_) => None,
        }
    }

    pub fn bound_target(&self) -> Option<&Slice2D<f32>> {
        self.target.as_ref()
    }

    /// First `count` rows of the activations.
    ///
    /// Panics on an input layer with nothing bound, or if `count` exceeds the
    /// rows available.
    pub fn activations(&self, count: usize) -> Slice2D<f32> {
        match &self.activations {
            Activations::Owned(buffer) => buffer.as_slice().head(count),
            Activations::Bound(Some(input)) => input.head(count),
            Activations::Bound(None) => {
                panic!("input layer {} has no input bound", self.index)
            }
        }
    }

    /// First `count` rows of the weighted inputs.
    ///
    /// Panics on the input layer.
    pub fn weighted_inputs(&self, count: usize) -> Slice2D<f32> {
        match &self.weighted_inputs {
            Some(buffer) => buffer.as_slice().head(count),
            None => panic!("input layer {} has no weighted inputs", self.index),
        }
    }

    /// First `count` rows of the errors.
    pub fn errors(&self, count: usize) -> Slice2D<f32> {
        self.errors.as_slice().head(count)
    }

    /// First `count` rows of the bound target. Panics if none is bound.
    pub fn target(&self, count: usize) -> Slice2D<f32> {
        match &self.target {
            Some(target) => target.head(count),
            None => panic!("layer {} has no target bound", self.index),
        }
    }

    /// Gradient of the cost with respect to each weight feeding this layer,
    /// summed over the batch rows of the last step.
    #[inline]
    pub fn weight_gradients(&self) -> &SharedVec<f32> {
        &self.weight_gradients
    }

    #[inline]
    pub(crate) fn weights(&self) -> &SharedVec<f32> {
        &self.weights
    }

    #[inline]
    pub(crate) fn biases(&self) -> &SharedVec<f32> {
        &self.biases
    }

    /// True when `slice` views a buffer owned by this layer.
    pub(crate) fn owns_storage_of(&self, slice: &Slice2D<f32>) -> bool {
        let storage = slice.storage();
        let owned_activations = match &self.activations {
            Activations::Owned(buffer) => buffer.storage().same_storage(storage),
            Activations::Bound(_) => false,
        };
        let owned_weighted = self
            .weighted_inputs
            .as_ref()
            .is_some_and(|buffer| buffer.storage().same_storage(storage));

        owned_activations || owned_weighted || self.errors.storage().same_storage(storage)
    }
}
