use neural_burst::{
    Activation, Batched2DBuffer, NetworkDescription, NeuralNetwork, TaskHandle, TrainingConfig,
    TrainingDataset, build_evaluator, fit,
};

fn main() -> neural_burst::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Classic XOR dataset, all four cases used for training.
    let xs = vec![
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ];
    let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
    let mut dataset = TrainingDataset::from_rows(&xs, &ys, 1.0)?;

    // 2 -> 4 -> 1, sigmoid throughout.
    let description = NetworkDescription::builder(2)?
        .hidden(4, Activation::Sigmoid)?
        .output(1, Activation::Sigmoid)?;

    let config = TrainingConfig {
        learning_rate: 0.5,
        epochs: 2_000,
        batch_size: 4,
        max_batch_size: 4,
        init_min: -1.0,
        init_max: 1.0,
        seed: 7,
        ..TrainingConfig::default()
    };

    let mut evaluator = build_evaluator(NeuralNetwork::new(&description)?, &config)?;
    let report = fit(&mut evaluator, &mut dataset, &config)?;
    println!("final average absolute error={}", report.final_error());

    let inputs = Batched2DBuffer::from_vec(xs.concat(), 2)?;
    let outputs = Batched2DBuffer::new(4, 1);
    evaluator
        .evaluate(&inputs.as_slice(), &outputs.as_slice(), 4, &TaskHandle::completed())?
        .wait()?;
    for (x, y) in xs.iter().zip(outputs.to_vec()) {
        println!("x={x:?} y={y}");
    }

    Ok(())
}
