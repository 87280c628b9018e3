//! Builds a small multi-rate network, evolves it, trains it batch-wise, streams it and stores it.
//!
//! Run with `RUST_LOG=info cargo run --example pipeline`.
use log::{debug, info, warn};
use nalgebra::DMatrix;

use rusty_layers::error::NetworkError;
use rusty_layers::layer::iaf::{IafEuler, Membrane};
use rusty_layers::layer::pass_through::PassThrough;
use rusty_layers::layer::rate::RateEuler;
use rusty_layers::layer::registry::LayerRegistry;
use rusty_layers::network::{BatchSizing, LogProgress, Network, Signals, Span};
use rusty_layers::timeseries::{SignalType, TimeSeries};

const SEED: u64 = 42;
const LEARNING_RATE: f64 = 0.05;

fn main() -> Result<(), NetworkError> {
    env_logger::init();

    let mut network = Network::new(
        vec![
            Box::new(PassThrough::identity("input", 2, 0.01)?),
            Box::new(
                RateEuler::new("rates", DMatrix::from_element(2, 4, 0.5), 0.05, 0.002)?
                    .with_noise(0.01, SEED)?,
            ),
            Box::new(IafEuler::new(
                "spikes",
                DMatrix::identity(4, 4) * 5.0,
                Membrane::default(),
                0.001,
            )?),
        ],
        None,
    )?;
    info!("{}", network);

    let input = TimeSeries::from_fn(0.0, 0.01, 200, SignalType::Continuous, |t| {
        vec![(10.0 * t).sin().max(0.0), (10.0 * t).cos().max(0.0)]
    })?;

    let signals = network.evolve(Some(&input), Some(Span::Duration(0.5)), true)?;
    for (name, output) in signals.iter() {
        info!("`{}`: {} samples on {} channels", name, output.len(), output.num_channels());
    }

    // Push the readout rates towards a constant target of one
    network.reset_all();
    network.train_with_progress(
        |network: &mut Network, signals: &Signals, _first: bool, last: bool| {
            let mean_rate = mean(&signals["rates"]);
            if let Some(mut rates) = network.layer_as_mut::<RateEuler>("rates") {
                let weights = rates.weights() * (1.0 + LEARNING_RATE * (1.0 - mean_rate));
                if let Err(err) = rates.set_weights(weights) {
                    warn!("Could not update weights: {}", err);
                }
            }
            if last {
                info!("Final mean rate: {:.3}", mean_rate);
            }
        },
        Some(&input),
        None,
        BatchSizing::Duration(0.25),
        &mut LogProgress,
        false,
    )?;

    network.reset_all();
    let streamed = network.stream_with_callback(Some(&input), Some(Span::Timesteps(20)), |network, step| {
        debug!("Streaming step {} (t = {:.2})", step, network.t())
    })?;
    info!("Streamed {} spike counts", streamed["spikes"].len());

    let path = std::env::temp_dir().join("rusty_layers_pipeline.json");
    network.save(&path)?;
    let loaded = Network::load(&path, &LayerRegistry::default())?;
    info!("Reloaded from {}: {}", path.display(), loaded);

    Ok(())
}

fn mean(signal: &TimeSeries) -> f64 {
    let values: Vec<f64> = signal.samples().iter().flatten().copied().collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
