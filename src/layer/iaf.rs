//! Leaky integrate-and-fire neurons driven by continuous input currents.
use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pass_through::{matrix_from_rows, matrix_to_rows};
use super::{
    check_dt, input_at, step_input, tagged_config, untagged_config, Layer, LoadableLayer,
    StreamingLayer,
};
use crate::error::NetworkError;
use crate::timeseries::{time_base, SignalType, TimeSeries};
use crate::MIN_PARALLEL_NEURONS;

/// Membrane parameters shared by all neurons of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Membrane {
    pub tau_mem: f64,
    pub v_thresh: f64,
    pub v_reset: f64,
    pub v_rest: f64,
}

impl Default for Membrane {
    fn default() -> Self {
        Membrane {
            tau_mem: 0.02,
            v_thresh: 1.0,
            v_reset: 0.0,
            v_rest: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IafEulerConfig {
    name: String,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    membrane: Membrane,
    dt: f64,
}

/// A population of leaky integrate-and-fire neurons emitting event counts.
///
/// Each time step, the membrane potential follows the Euler update
/// `v <- v + dt / tau_mem * (v_rest - v + sum_j w_ji u_j + b_i)`; a neuron whose potential
/// reaches `v_thresh` emits an event and is reset to `v_reset`.
#[derive(Debug, Clone, PartialEq)]
pub struct IafEuler {
    name: String,
    weights: DMatrix<f64>,
    bias: Vec<f64>,
    membrane: Membrane,
    dt: f64,
    timestep: usize,
    potentials: Vec<f64>,
    last_events: Vec<f64>,
}

impl IafEuler {
    pub fn new(
        name: &str,
        weights: DMatrix<f64>,
        membrane: Membrane,
        dt: f64,
    ) -> Result<Self, NetworkError> {
        let size = weights.ncols();
        IafEuler::build(name, weights, vec![0.0; size], membrane, dt)
    }

    fn build(
        name: &str,
        weights: DMatrix<f64>,
        bias: Vec<f64>,
        membrane: Membrane,
        dt: f64,
    ) -> Result<Self, NetworkError> {
        check_dt(dt)?;
        if !(membrane.tau_mem > 0.0) {
            return Err(NetworkError::InvalidParameter(format!(
                "Membrane time constant must be positive, got {}",
                membrane.tau_mem
            )));
        }
        if !(membrane.v_thresh > membrane.v_reset) {
            return Err(NetworkError::InvalidParameter(format!(
                "Threshold ({}) must exceed the reset potential ({})",
                membrane.v_thresh, membrane.v_reset
            )));
        }
        let size = weights.ncols();
        if bias.len() != size {
            return Err(NetworkError::InvalidParameter(format!(
                "Expected {} bias values, got {}",
                size,
                bias.len()
            )));
        }

        Ok(IafEuler {
            name: name.to_string(),
            weights,
            bias,
            membrane,
            dt,
            timestep: 0,
            potentials: vec![membrane.v_rest; size],
            last_events: vec![0.0; size],
        })
    }

    pub fn with_bias(mut self, bias: Vec<f64>) -> Result<Self, NetworkError> {
        if bias.len() != self.size() {
            return Err(NetworkError::InvalidParameter(format!(
                "Expected {} bias values, got {}",
                self.size(),
                bias.len()
            )));
        }
        self.bias = bias;
        Ok(self)
    }

    pub fn weights(&self) -> &DMatrix<f64> {
        &self.weights
    }

    /// Replace the weight matrix, keeping its shape.
    pub fn set_weights(&mut self, weights: DMatrix<f64>) -> Result<(), NetworkError> {
        if weights.shape() != self.weights.shape() {
            return Err(NetworkError::InvalidParameter(format!(
                "Weights must be of shape {:?}, got {:?}",
                self.weights.shape(),
                weights.shape()
            )));
        }
        self.weights = weights;
        Ok(())
    }

    pub fn membrane(&self) -> &Membrane {
        &self.membrane
    }

    pub fn potentials(&self) -> &[f64] {
        &self.potentials
    }

    /// Advance all neurons by one time step and return which of them fired.
    fn step_once(&mut self, input: Vec<f64>) -> Vec<f64> {
        let current = self.weights.transpose() * DVector::from_vec(input);
        let Membrane {
            tau_mem,
            v_thresh,
            v_reset,
            v_rest,
        } = self.membrane;
        let alpha = self.dt / tau_mem;
        let update = |(v, (i, b)): (&mut f64, (&f64, &f64))| {
            *v += alpha * (v_rest - *v + i + b);
            if *v >= v_thresh {
                *v = v_reset;
                1.0
            } else {
                0.0
            }
        };

        let events: Vec<f64> = if self.size() >= MIN_PARALLEL_NEURONS {
            self.potentials
                .par_iter_mut()
                .zip(current.as_slice().par_iter().zip(self.bias.par_iter()))
                .map(update)
                .collect()
        } else {
            self.potentials
                .iter_mut()
                .zip(current.iter().zip(self.bias.iter()))
                .map(update)
                .collect()
        };
        self.last_events = events.clone();
        events
    }

    fn config(&self) -> IafEulerConfig {
        IafEulerConfig {
            name: self.name.clone(),
            weights: matrix_to_rows(&self.weights),
            bias: self.bias.clone(),
            membrane: self.membrane,
            dt: self.dt,
        }
    }
}

impl Layer for IafEuler {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn size_in(&self) -> usize {
        self.weights.nrows()
    }

    fn size(&self) -> usize {
        self.weights.ncols()
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn timestep(&self) -> usize {
        self.timestep
    }

    fn input_type(&self) -> SignalType {
        SignalType::Continuous
    }

    fn output_type(&self) -> SignalType {
        SignalType::Event
    }

    fn evolve(
        &mut self,
        input: Option<&TimeSeries>,
        num_timesteps: usize,
        verbose: bool,
    ) -> Result<TimeSeries, NetworkError> {
        let t_start = self.t();
        let times = time_base(t_start, self.dt, num_timesteps);
        let mut raster = Vec::with_capacity(num_timesteps);
        for t in times.iter() {
            let row = input_at(input, *t, self.size_in())?;
            raster.push(self.step_once(row));
        }
        self.timestep += num_timesteps;

        if verbose {
            let num_events: f64 = raster.iter().flatten().sum();
            debug!(
                "Layer `{}` emitted {} events in {} time steps",
                self.name,
                num_events,
                num_timesteps
            );
        }

        TimeSeries::new(times, raster, SignalType::Event)?.with_bounds(t_start, self.t())
    }

    fn reset_time(&mut self) {
        self.timestep = 0;
    }

    fn reset_state(&mut self) {
        self.potentials = vec![self.membrane.v_rest; self.size()];
        self.last_events = vec![0.0; self.size()];
    }

    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn to_dict(&self) -> Result<Value, NetworkError> {
        tagged_config(&self.config(), Self::CLASS_NAME)
    }

    fn as_streaming(&mut self) -> Option<&mut dyn StreamingLayer> {
        Some(self)
    }
}

impl StreamingLayer for IafEuler {
    fn initial_output(&self) -> Vec<f64> {
        self.last_events.clone()
    }

    /// Returns the number of events of each neuron over all `num_timesteps` steps.
    fn step(
        &mut self,
        input: Option<&[f64]>,
        num_timesteps: usize,
    ) -> Result<Vec<f64>, NetworkError> {
        let input = step_input(input, self.size_in())?;
        let mut counts = vec![0.0; self.size()];
        for _ in 0..num_timesteps {
            let events = self.step_once(input.clone());
            counts.iter_mut().zip(events).for_each(|(c, e)| *c += e);
        }
        self.timestep += num_timesteps;
        Ok(counts)
    }
}

impl LoadableLayer for IafEuler {
    const CLASS_NAME: &'static str = "IafEuler";

    fn load_from_dict(config: &Value) -> Result<Self, NetworkError> {
        let config: IafEulerConfig = untagged_config(config)?;
        IafEuler::build(
            &config.name,
            matrix_from_rows(&config.weights)?,
            config.bias,
            config.membrane,
            config.dt,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membrane() -> Membrane {
        Membrane {
            tau_mem: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_regular_firing() {
        // Under constant drive 2, v_k = 2 (1 - 0.9^k) crosses the threshold at k = 7
        let mut layer = IafEuler::new("iaf", DMatrix::from_element(1, 1, 1.0), membrane(), 0.01).unwrap();
        let input = TimeSeries::new(vec![0.0], vec![vec![2.0]], SignalType::Continuous).unwrap();
        let output = layer.evolve(Some(&input), 14, false).unwrap();
        assert_eq!(output.kind(), SignalType::Event);

        let firing_steps: Vec<usize> = output
            .samples()
            .iter()
            .enumerate()
            .filter(|(_, row)| row[0] > 0.0)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(firing_steps, vec![6, 13]);
        assert_eq!(layer.potentials(), &[0.0]);
    }

    #[test]
    fn test_streaming_counts() {
        let mut layer = IafEuler::new("iaf", DMatrix::from_element(1, 2, 1.0), membrane(), 0.01)
            .unwrap()
            .with_bias(vec![0.0, -2.0])
            .unwrap();
        assert_eq!(layer.initial_output(), vec![0.0, 0.0]);
        assert_eq!(layer.step(Some(&[2.0]), 14).unwrap(), vec![2.0, 0.0]);
        assert_eq!(layer.timestep(), 14);

        layer.reset_all();
        assert_eq!(layer.timestep(), 0);
        assert_eq!(layer.potentials(), &[0.0, 0.0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let size = MIN_PARALLEL_NEURONS + 1;
        let mut large = IafEuler::new("iaf", DMatrix::from_element(1, size, 1.0), membrane(), 0.01).unwrap();
        let mut small = IafEuler::new("iaf", DMatrix::from_element(1, 1, 1.0), membrane(), 0.01).unwrap();
        let counts = large.step(Some(&[2.0]), 30).unwrap();
        let expected = small.step(Some(&[2.0]), 30).unwrap()[0];
        assert!(counts.iter().all(|c| *c == expected));
    }

    #[test]
    fn test_dict_round_trip() {
        let layer = IafEuler::new("iaf", DMatrix::from_element(3, 2, 0.5), membrane(), 0.001)
            .unwrap()
            .with_bias(vec![0.1, 0.2])
            .unwrap();
        let config = layer.to_dict().unwrap();
        assert_eq!(config["class_name"], "IafEuler");
        assert_eq!(IafEuler::load_from_dict(&config).unwrap(), layer);
    }

    #[test]
    fn test_set_weights() {
        let mut layer = IafEuler::new("iaf", DMatrix::zeros(2, 3), membrane(), 0.01).unwrap();
        assert!(layer.set_weights(DMatrix::zeros(3, 3)).is_err());
        assert_eq!(layer.size_in(), 2);
        layer.set_weights(DMatrix::from_element(2, 3, 0.5)).unwrap();
        assert_eq!(layer.weights()[(1, 2)], 0.5);
    }

    #[test]
    fn test_invalid_membrane() {
        let bad = Membrane {
            v_reset: 2.0,
            ..Default::default()
        };
        assert!(IafEuler::new("iaf", DMatrix::zeros(1, 1), bad, 0.01).is_err());
        let bad = Membrane {
            tau_mem: 0.0,
            ..Default::default()
        };
        assert!(IafEuler::new("iaf", DMatrix::zeros(1, 1), bad, 0.01).is_err());
    }
}
