use neural_burst::{
    Activation, Batched2DBuffer, NetworkDescription, NetworkEvaluator, NeuralNetwork, TaskHandle,
    TrainingConfig, TrainingDataset, build_evaluator, fit,
};

const XOR_INPUTS: [f32; 8] = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
const XOR_TARGETS: [f32; 4] = [0.0, 1.0, 1.0, 0.0];

fn xor_network() -> NeuralNetwork {
    let description = NetworkDescription::builder(2)
        .unwrap()
        .hidden(2, Activation::Sigmoid)
        .unwrap()
        .output(1, Activation::Sigmoid)
        .unwrap();
    let mut net = NeuralNetwork::new(&description).unwrap();
    // Fixed starting point that breaks the hidden-unit symmetry.
    net.set_parameters(1, vec![0.8, -0.6, -0.7, 0.9], vec![0.1, -0.2])
        .unwrap();
    net.set_parameters(2, vec![0.5, 0.7], vec![-0.3]).unwrap();
    net
}

#[test_log::test]
fn xor_converges_with_full_batch_steps() {
    let mut evaluator = NetworkEvaluator::new(xor_network(), 0.5, 4).unwrap();
    let inputs = Batched2DBuffer::from_vec(XOR_INPUTS.to_vec(), 2).unwrap();
    let targets = Batched2DBuffer::from_vec(XOR_TARGETS.to_vec(), 1).unwrap();

    let mut handle = TaskHandle::completed();
    let mut first_error = None;
    let mut error = f32::INFINITY;
    for _ in 0..1500 {
        let (next, step_error) = evaluator
            .train_step(&inputs.as_slice(), &targets.as_slice(), 4, &handle)
            .unwrap();
        handle = next;
        first_error.get_or_insert(step_error);
        error = step_error;
    }

    assert!(error < 0.1, "xor did not converge: error {error}");
    assert!(error < first_error.unwrap());

    let outputs = Batched2DBuffer::new(4, 1);
    evaluator
        .evaluate(&inputs.as_slice(), &outputs.as_slice(), 4, &handle)
        .unwrap()
        .wait()
        .unwrap();
    for (out, target) in outputs.to_vec().iter().zip(XOR_TARGETS) {
        assert_eq!(*out > 0.5, target > 0.5, "output {out} for target {target}");
    }
}

#[test_log::test]
fn xor_converges_through_fit() {
    let rows: Vec<Vec<f32>> = XOR_INPUTS.chunks(2).map(<[f32]>::to_vec).collect();
    let targets: Vec<Vec<f32>> = XOR_TARGETS.iter().map(|t| vec![*t]).collect();
    let mut dataset = TrainingDataset::from_rows(&rows, &targets, 1.0).unwrap();

    let config = TrainingConfig {
        learning_rate: 0.5,
        epochs: 1500,
        batch_size: 4,
        max_batch_size: 4,
        ..TrainingConfig::default()
    };
    let mut evaluator =
        NetworkEvaluator::new(xor_network(), config.learning_rate, config.max_batch_size).unwrap();

    let report = fit(&mut evaluator, &mut dataset, &config).unwrap();
    assert_eq!(report.epochs.len(), 1500);
    assert!(report.epochs[0].test_error.is_none());
    assert!(
        report.final_error() < 0.1,
        "xor did not converge: error {}",
        report.final_error()
    );
}

#[test_log::test]
fn xor_converges_from_seeded_initialization() {
    let rows: Vec<Vec<f32>> = XOR_INPUTS.chunks(2).map(<[f32]>::to_vec).collect();
    let targets: Vec<Vec<f32>> = XOR_TARGETS.iter().map(|t| vec![*t]).collect();
    let mut dataset = TrainingDataset::from_rows(&rows, &targets, 1.0).unwrap();

    let description = NetworkDescription::builder(2)
        .unwrap()
        .hidden(8, Activation::Sigmoid)
        .unwrap()
        .output(1, Activation::Sigmoid)
        .unwrap();
    let config = TrainingConfig {
        learning_rate: 0.5,
        epochs: 2000,
        batch_size: 4,
        max_batch_size: 4,
        init_min: -1.0,
        init_max: 1.0,
        seed: 7,
        ..TrainingConfig::default()
    };
    let network = NeuralNetwork::new(&description).unwrap();
    let mut evaluator = build_evaluator(network, &config).unwrap();

    let report = fit(&mut evaluator, &mut dataset, &config).unwrap();
    assert!(
        report.final_error() < 0.1,
        "xor did not converge from seed {}: error {}",
        config.seed,
        report.final_error()
    );
}
