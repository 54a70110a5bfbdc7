use log::debug;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Error, LayerRole, NetworkDescription, NetworkLayer, Result};

/// A feed-forward network: one [`NetworkLayer`] per description entry.
///
/// Layer 0 is the input layer and carries no parameters. For every `i > 0`,
/// `layer(i).previous_size() == layer(i - 1).size()`.
#[derive(Debug)]
pub struct NeuralNetwork {
    description: NetworkDescription,
    layers: Vec<NetworkLayer>,
}

impl NeuralNetwork {
    /// Allocate zero-filled parameters for `description`.
    ///
    /// Call [`initialize_weights`](Self::initialize_weights) before training.
    pub fn new(description: &NetworkDescription) -> Result<Self> {
        let params = description.layers();
        let mut layers = Vec::with_capacity(params.len());
        layers.push(NetworkLayer::input(&params[0]));
        for pair in params.windows(2) {
            layers.push(NetworkLayer::new(&pair[1], &pair[0]));
        }

        debug!(
            "network {:?}: {} parameters",
            params.iter().map(|p| p.neuron_count).collect::<Vec<_>>(),
            layers
                .iter()
                .map(|l| l.weight_count() + l.size() * usize::from(l.has_bias()))
                .sum::<usize>()
        );

        Ok(Self {
            description: description.clone(),
            layers,
        })
    }

    /// Fill every weight and bias with values drawn uniformly from `[min, max)`.
    ///
    /// Each array gets its own generator; seeds increase by one per array,
    /// weights before biases, layer by layer.
    pub fn initialize_weights(&mut self, min: f32, max: f32, seed: u64) -> Result<()> {
        if !(min.is_finite() && max.is_finite()) || min >= max {
            return Err(Error::InvalidConfig(format!(
                "initialization range must be finite with min < max, got [{min}, {max})"
            )));
        }

        let dist = Uniform::new(min, max);
        let mut stream = seed;
        for layer in self.layers.iter().skip(1) {
            for storage in [layer.weights_storage(), layer.biases_storage()] {
                let mut rng = StdRng::seed_from_u64(stream);
                stream = stream.wrapping_add(1);
                for v in storage.write().iter_mut() {
                    *v = rng.sample(dist);
                }
            }
        }

        debug!("initialized weights in [{min}, {max}) from seed {seed}");
        Ok(())
    }

    #[inline]
    pub fn description(&self) -> &NetworkDescription {
        &self.description
    }

    /// Layer `i`. Panics if `i >= num_layers()`.
    #[inline]
    pub fn layer(&self, i: usize) -> &NetworkLayer {
        &self.layers[i]
    }

    #[inline]
    pub fn layers(&self) -> &[NetworkLayer] {
        &self.layers
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.layers[0].size()
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].size()
    }

    /// Copy of layer `i`'s weights.
    pub fn weights(&self, i: usize) -> Vec<f32> {
        self.layers[i].weights()
    }

    /// Copy of layer `i`'s biases.
    pub fn biases(&self, i: usize) -> Vec<f32> {
        self.layers[i].biases()
    }

    /// Overwrite layer `i`'s parameters.
    ///
    /// `weights` is row-major `(size, previous_size)`. Values must be finite.
    pub fn set_parameters(&mut self, i: usize, weights: Vec<f32>, biases: Vec<f32>) -> Result<()> {
        let layer = self.layers.get(i).ok_or_else(|| {
            Error::ShapeMismatch(format!(
                "layer index {i} out of range for {} layers",
                self.layers.len()
            ))
        })?;
        if layer.role() == LayerRole::Input {
            return Err(Error::ShapeMismatch(
                "the input layer has no parameters".to_owned(),
            ));
        }
        if weights.len() != layer.weight_count() {
            return Err(Error::ShapeMismatch(format!(
                "layer {i} expects {} weights, got {}",
                layer.weight_count(),
                weights.len()
            )));
        }
        if biases.len() != layer.size() {
            return Err(Error::ShapeMismatch(format!(
                "layer {i} expects {} biases, got {}",
                layer.size(),
                biases.len()
            )));
        }
        if !weights.iter().chain(&biases).all(|v| v.is_finite()) {
            return Err(Error::InvalidData(format!(
                "layer {i} parameters must be finite"
            )));
        }

        *layer.weights_storage().write() = weights;
        *layer.biases_storage().write() = biases;
        Ok(())
    }
}
