use neural_burst::{NetworkDescription, NeuralNetwork, TrainingConfig, build_evaluator};

fn main() -> neural_burst::Result<()> {
    env_logger::init();

    let description = NetworkDescription::from_json_str(
        r#"{
            "layers": [
                {"neuron_count": 4, "role": "input", "activation": "linear"},
                {"neuron_count": 8, "role": "hidden", "activation": "rectified_linear"},
                {"neuron_count": 3, "role": "output", "activation": "sigmoid"}
            ]
        }"#,
    )?;
    let config = TrainingConfig::from_json_str(
        r#"{"learning_rate": 0.01, "epochs": 50, "batch_size": 8, "max_batch_size": 8}"#,
    )?;

    let evaluator = build_evaluator(NeuralNetwork::new(&description)?, &config)?;
    println!(
        "built {} layers, max batch {}",
        evaluator.num_layers(),
        evaluator.max_batch_size()
    );

    println!("{}", description.to_json_string()?);
    println!("{}", config.to_json_string()?);
    Ok(())
}
