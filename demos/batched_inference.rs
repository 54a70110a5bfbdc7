use std::time::Instant;

use neural_burst::{
    Activation, Batched2DBuffer, DEFAULT_TRAINING_FRACTION, NetworkDescription, NetworkEvaluator,
    NeuralNetwork, TaskHandle, TrainingDataset, evaluate_dataset,
};

const INPUTS: usize = 16;
const CASES: usize = 4_096;
const BATCH: usize = 256;

fn main() -> neural_burst::Result<()> {
    env_logger::init();

    // Target: mean of the inputs, squashed into (0, 1).
    let xs: Vec<f32> = (0..CASES * INPUTS)
        .map(|i| ((i * 31) % 97) as f32 / 97.0 - 0.5)
        .collect();
    let ys: Vec<f32> = xs
        .chunks(INPUTS)
        .map(|row| 1.0 / (1.0 + (-row.iter().sum::<f32>()).exp()))
        .collect();
    let dataset = TrainingDataset::from_flat(xs, ys, INPUTS, 1, DEFAULT_TRAINING_FRACTION)?;

    let description = NetworkDescription::builder(INPUTS)?
        .hidden(64, Activation::RectifiedLinear)?
        .hidden(32, Activation::RectifiedLinear)?
        .output(1, Activation::Sigmoid)?;
    let mut network = NeuralNetwork::new(&description)?;
    network.initialize_weights(-0.1, 0.1, 42)?;
    let mut evaluator = NetworkEvaluator::new(network, 1e-3, BATCH)?;

    // Schedule every batch before waiting once: the handles keep them ordered.
    let (inputs, _) = dataset.training_set();
    let outputs = Batched2DBuffer::new(inputs.rows(), 1);
    let started = Instant::now();
    let mut handle = TaskHandle::completed();
    let mut start = 0;
    while start < inputs.rows() {
        let count = BATCH.min(inputs.rows() - start);
        handle = evaluator.evaluate(
            &inputs.slice(start, count)?,
            &outputs.slice(start, count)?,
            count,
            &handle,
        )?;
        start += count;
    }
    handle.wait()?;
    println!(
        "evaluated {} rows in {:?} on {} threads",
        inputs.rows(),
        started.elapsed(),
        evaluator.graph().num_threads()
    );

    let (test_inputs, test_targets) = dataset.test_set();
    let error = evaluate_dataset(&mut evaluator, &test_inputs, &test_targets)?;
    println!("untrained test error={error}");

    Ok(())
}
