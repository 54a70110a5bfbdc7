//! Network topology descriptors.
//!
//! A [`NetworkDescription`] is an ordered list of [`LayerParameters`]: one
//! input layer, any number of hidden layers, one output layer. It is validated
//! before any parameter buffer is allocated.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Activation, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
/// Position of a layer in the network; decides which operations are legal on it.
pub enum LayerRole {
    Input,
    Hidden,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
/// Topology of a single layer.
pub struct LayerParameters {
    pub neuron_count: usize,
    pub role: LayerRole,
    pub activation: Activation,
}

impl LayerParameters {
    /// Input layers pass their values through unchanged.
    pub fn input(neuron_count: usize) -> Self {
        Self {
            neuron_count,
            role: LayerRole::Input,
            activation: Activation::Linear,
        }
    }

    pub fn hidden(neuron_count: usize, activation: Activation) -> Self {
        Self {
            neuron_count,
            role: LayerRole::Hidden,
            activation,
        }
    }

    pub fn output(neuron_count: usize, activation: Activation) -> Self {
        Self {
            neuron_count,
            role: LayerRole::Output,
            activation,
        }
    }
}

/// Validated, ordered layer list.
///
/// Invariants: at least two layers, the first is `Input`, the last is
/// `Output`, every other layer is `Hidden`, and every layer has at least one
/// neuron.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescription {
    layers: Vec<LayerParameters>,
}

impl NetworkDescription {
    pub fn new(layers: Vec<LayerParameters>) -> Result<Self> {
        validate_layers(&layers)?;
        Ok(Self { layers })
    }

    /// Start a description whose input layer has `input_size` neurons.
    ///
    /// ```rust
    /// use neural_burst::{Activation, NetworkDescription};
    ///
    /// # fn main() -> neural_burst::Result<()> {
    /// let description = NetworkDescription::builder(2)?
    ///     .hidden(2, Activation::Sigmoid)?
    ///     .output(1, Activation::Sigmoid)?;
    /// assert_eq!(description.len(), 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder(input_size: usize) -> Result<DescriptionBuilder> {
        DescriptionBuilder::new(input_size)
    }

    #[inline]
    pub fn layers(&self) -> &[LayerParameters] {
        &self.layers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false for a validated description.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.layers[0].neuron_count
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].neuron_count
    }
}

fn validate_layers(layers: &[LayerParameters]) -> Result<()> {
    if layers.len() < 2 {
        return Err(Error::Topology(format!(
            "a network needs at least 2 layers (input and output), got {}",
            layers.len()
        )));
    }

    let last = layers.len() - 1;
    for (i, layer) in layers.iter().enumerate() {
        let expected = match i {
            0 => LayerRole::Input,
            i if i == last => LayerRole::Output,
            _ => LayerRole::Hidden,
        };
        if layer.role != expected {
            return Err(Error::Topology(format!(
                "layer {i} must be {expected:?}, got {:?}",
                layer.role
            )));
        }
        if layer.neuron_count == 0 {
            return Err(Error::Topology(format!("layer {i} must have at least one neuron")));
        }
    }

    Ok(())
}

/// Builder for a [`NetworkDescription`].
#[derive(Debug, Clone)]
pub struct DescriptionBuilder {
    layers: Vec<LayerParameters>,
}

impl DescriptionBuilder {
    fn new(input_size: usize) -> Result<Self> {
        if input_size == 0 {
            return Err(Error::Topology("input size must be > 0".to_owned()));
        }
        Ok(Self {
            layers: vec![LayerParameters::input(input_size)],
        })
    }

    /// Append a hidden layer.
    pub fn hidden(mut self, neuron_count: usize, activation: Activation) -> Result<Self> {
        if neuron_count == 0 {
            return Err(Error::Topology("hidden layer size must be > 0".to_owned()));
        }
        let layer = LayerParameters::hidden(neuron_count, activation);
        self.layers.push(layer);
        Ok(self)
    }

    /// Append the output layer and finish.
    pub fn output(
        mut self,
        neuron_count: usize,
        activation: Activation,
    ) -> Result<NetworkDescription> {
        let layer = LayerParameters::output(neuron_count, activation);
        self.layers.push(layer);
        NetworkDescription::new(self.layers)
    }
}

#[cfg(feature = "serde")]
#[derive(Serialize, Deserialize)]
struct SerializedDescription {
    layers: Vec<LayerParameters>,
}

#[cfg(feature = "serde")]
impl NetworkDescription {
    /// Parse and validate a description from JSON of the form
    /// `{"layers": [{"neuron_count": 2, "role": "input", "activation": "linear"}, ...]}`.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: SerializedDescription = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse description json: {e}")))?;
        Self::new(raw.layers)
    }

    pub fn to_json_string(&self) -> Result<String> {
        let raw = SerializedDescription {
            layers: self.layers.clone(),
        };
        serde_json::to_string_pretty(&raw)
            .map_err(|e| Error::InvalidData(format!("failed to serialize description: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_description() {
        let d = NetworkDescription::builder(4)
            .unwrap()
            .hidden(3, Activation::RectifiedLinear)
            .unwrap()
            .output(2, Activation::Sigmoid)
            .unwrap();

        assert_eq!(d.len(), 3);
        assert_eq!(d.input_size(), 4);
        assert_eq!(d.output_size(), 2);
        assert_eq!(d.layers()[0].role, LayerRole::Input);
        assert_eq!(d.layers()[1].activation, Activation::RectifiedLinear);
    }

    #[test]
    fn rejects_too_few_layers() {
        let err = NetworkDescription::new(vec![LayerParameters::input(2)]).unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
        assert!(NetworkDescription::new(Vec::new()).is_err());
    }

    #[test]
    fn rejects_wrong_first_and_last_roles() {
        let no_input = vec![
            LayerParameters::hidden(2, Activation::Linear),
            LayerParameters::output(1, Activation::Linear),
        ];
        assert!(matches!(NetworkDescription::new(no_input), Err(Error::Topology(_))));

        let no_output = vec![
            LayerParameters::input(2),
            LayerParameters::hidden(1, Activation::Linear),
        ];
        assert!(matches!(NetworkDescription::new(no_output), Err(Error::Topology(_))));

        let output_in_middle = vec![
            LayerParameters::input(2),
            LayerParameters::output(2, Activation::Linear),
            LayerParameters::output(1, Activation::Linear),
        ];
        assert!(NetworkDescription::new(output_in_middle).is_err());
    }

    #[test]
    fn rejects_empty_layers() {
        assert!(NetworkDescription::builder(0).is_err());
        assert!(
            NetworkDescription::builder(2)
                .unwrap()
                .hidden(0, Activation::Sigmoid)
                .is_err()
        );
        assert!(
            NetworkDescription::builder(2)
                .unwrap()
                .output(0, Activation::Sigmoid)
                .is_err()
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_roundtrip_validates() {
        let d = NetworkDescription::builder(2)
            .unwrap()
            .hidden(2, Activation::Sigmoid)
            .unwrap()
            .output(1, Activation::Sigmoid)
            .unwrap();
        let json = d.to_json_string().unwrap();
        assert_eq!(NetworkDescription::from_json_str(&json).unwrap(), d);

        let bad = r#"{"layers":[{"neuron_count":2,"role":"hidden","activation":"linear"}]}"#;
        assert!(matches!(
            NetworkDescription::from_json_str(bad),
            Err(Error::Topology(_))
        ));
    }
}
