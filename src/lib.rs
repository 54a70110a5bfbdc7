//! A batched feed-forward network trainer.
//!
//! `neural-burst` evaluates a multi-layer perceptron over batches of rows and
//! trains it with mini-batch gradient descent. Every forward, backward and
//! update computation is a task on a worker pool; tasks are chained through
//! explicit [`TaskHandle`] dependencies and each one runs data-parallel over
//! its rows and neurons.
//!
//! # Design goals
//!
//! - Fixed topology: buffers are sized once from a [`NetworkDescription`] and a
//!   maximum batch size, then reused for every step.
//! - Explicit ordering: every scheduling call takes the handle to run after and
//!   returns the handle of its last task. Nothing is ordered implicitly.
//! - Clear contracts: shapes are validated before anything is scheduled.
//!
//! # Panics vs `Result`
//!
//! - Low-level layer kernels ([`NetworkLayer::evaluate`],
//!   [`NetworkLayer::backpropagate`]) panic on misuse, such as evaluating the
//!   input layer.
//! - [`NetworkEvaluator`] operations validate their batches and return
//!   [`Result`]. A NaN or infinity produced while a step runs fails its task
//!   handle with [`Error::NumericInstability`] and the step's parameter update
//!   never runs.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - Batches are [`Batched2DBuffer`]s of shape `(rows, features)` in
//!   row-major layout; a [`Slice2D`] views a range of rows without copying.
//! - Layer weights are row-major with shape `(size, previous_size)`.
//!
//! # Quick start
//!
//! ```rust
//! use neural_burst::{
//!     Activation, Batched2DBuffer, NetworkDescription, NetworkEvaluator, NeuralNetwork,
//!     TaskHandle,
//! };
//!
//! # fn main() -> neural_burst::Result<()> {
//! let description = NetworkDescription::builder(2)?
//!     .hidden(4, Activation::Sigmoid)?
//!     .output(1, Activation::Sigmoid)?;
//! let mut network = NeuralNetwork::new(&description)?;
//! network.initialize_weights(-0.5, 0.5, 7)?;
//!
//! let mut evaluator = NetworkEvaluator::new(network, 0.5, 4)?;
//! let inputs = Batched2DBuffer::from_vec(vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0], 2)?;
//! let targets = Batched2DBuffer::from_vec(vec![0.0, 1.0, 1.0, 0.0], 1)?;
//!
//! let mut handle = TaskHandle::completed();
//! for _ in 0..10 {
//!     let (next, _error) =
//!         evaluator.train_step(&inputs.as_slice(), &targets.as_slice(), 4, &handle)?;
//!     handle = next;
//! }
//!
//! let outputs = Batched2DBuffer::new(4, 1);
//! evaluator
//!     .evaluate(&inputs.as_slice(), &outputs.as_slice(), 4, &handle)?
//!     .wait()?;
//! let _network = evaluator.dispose();
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod buffer;
pub mod config;
pub mod dataset;
pub mod description;
pub mod error;
pub mod evaluator;
pub mod evaluator_layer;
pub mod layer;
pub mod loss;
pub mod network;
pub mod task;
pub mod train;

pub use activation::Activation;
pub use buffer::{Batched2DBuffer, Slice2D};
pub use config::TrainingConfig;
pub use dataset::{DEFAULT_TRAINING_FRACTION, TrainingDataset};
pub use description::{DescriptionBuilder, LayerParameters, LayerRole, NetworkDescription};
pub use error::{Error, Result};
pub use evaluator::NetworkEvaluator;
pub use evaluator_layer::EvaluatorLayer;
pub use layer::NetworkLayer;
pub use loss::OutputLoss;
pub use network::NeuralNetwork;
pub use task::{TaskGraph, TaskHandle};
pub use train::{EpochReport, FitReport, build_evaluator, evaluate_dataset, fit};
