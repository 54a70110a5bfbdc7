use thiserror::Error;

/// Errors reported by the network, evaluator and dataset APIs.
///
/// Every variant is reported before any buffer is touched, except
/// `NumericInstability` and `TaskFailed`, which surface from an already
/// scheduled task when its handle is awaited.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The network description cannot form a network.
    #[error("invalid topology: {0}")]
    Topology(String),
    /// A batch or buffer does not fit the layer sizes or capacity it is used with.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// A NaN or infinity showed up while a step was running.
    ///
    /// The step is aborted: no weight or bias update scheduled after the
    /// failing task runs.
    #[error("numeric instability during {stage} in layer {layer}")]
    NumericInstability { stage: &'static str, layer: usize },
    /// A task panicked on a worker thread.
    #[error("task `{0}` failed")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
