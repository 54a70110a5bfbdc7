#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, OutputLoss, Result};

/// Knobs of a training run driven by [`fit`](crate::fit).
///
/// `max_batch_size` sizes the evaluator's working buffers and must be at least
/// `batch_size`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub epochs: usize,
    pub batch_size: usize,
    pub max_batch_size: usize,
    pub init_min: f32,
    pub init_max: f32,
    pub seed: u64,
    pub loss: OutputLoss,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.0015,
            epochs: 10,
            batch_size: 16,
            max_batch_size: 32,
            init_min: -0.5,
            init_max: 0.5,
            seed: 1337,
            loss: OutputLoss::CrossEntropy,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        if self.max_batch_size < self.batch_size {
            return Err(Error::InvalidConfig(format!(
                "max_batch_size {} is smaller than batch_size {}",
                self.max_batch_size, self.batch_size
            )));
        }
        if !(self.init_min.is_finite() && self.init_max.is_finite())
            || self.init_min >= self.init_max
        {
            return Err(Error::InvalidConfig(format!(
                "init range must be finite with min < max, got [{}, {})",
                self.init_min, self.init_max
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl TrainingConfig {
    /// Parse a config from JSON. Missing fields take their default value.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("failed to serialize config: {e}")))
    }
}
