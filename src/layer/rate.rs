//! Rate neurons integrated with the forward Euler method.
//!
//! Each neuron `i` holds a state `x_i` following
//! `tau_i dx_i/dt = -x_i + sum_j w_ji u_j + b_i`, optionally perturbed by Gaussian noise of
//! standard deviation `noise_std * sqrt(dt)` per step. The output is the rectified state
//! `max(x_i, 0)`.
use derivative::Derivative;
use log::debug;
use nalgebra::{DMatrix, DVector};
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use rand_distr::{Distribution, Normal};
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RateEulerConfig {
    name: String,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    tau: Vec<f64>,
    dt: f64,
    #[serde(default)]
    noise_std: f64,
    #[serde(default)]
    seed: u64,
}

/// A population of rate neurons with leaky integration.
#[derive(Derivative)]
#[derivative(Debug, Clone, PartialEq)]
pub struct RateEuler {
    name: String,
    /// Weight matrix of shape `size_in x size`.
    weights: DMatrix<f64>,
    bias: Vec<f64>,
    tau: Vec<f64>,
    dt: f64,
    noise_std: f64,
    seed: u64,
    timestep: usize,
    state: Vec<f64>,
    #[derivative(PartialEq = "ignore", Debug = "ignore")]
    noise: Normal<f64>,
    #[derivative(PartialEq = "ignore", Debug = "ignore")]
    rng: ChaCha8Rng,
}

impl RateEuler {
    /// Create a noiseless population with zero bias and a common time constant.
    pub fn new(name: &str, weights: DMatrix<f64>, tau: f64, dt: f64) -> Result<Self, NetworkError> {
        let size = weights.ncols();
        RateEuler::build(name, weights, vec![0.0; size], vec![tau; size], dt, 0.0, 0)
    }

    fn build(
        name: &str,
        weights: DMatrix<f64>,
        bias: Vec<f64>,
        tau: Vec<f64>,
        dt: f64,
        noise_std: f64,
        seed: u64,
    ) -> Result<Self, NetworkError> {
        check_dt(dt)?;
        let size = weights.ncols();
        check_neuron_params("bias", &bias, size)?;
        check_neuron_params("tau", &tau, size)?;
        if tau.iter().any(|tau| *tau <= 0.0) {
            return Err(NetworkError::InvalidParameter(
                "Time constants must be positive".to_string(),
            ));
        }

        Ok(RateEuler {
            name: name.to_string(),
            weights,
            bias,
            tau,
            dt,
            noise_std,
            seed,
            timestep: 0,
            state: vec![0.0; size],
            noise: noise_sampler(noise_std)?,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn with_bias(mut self, bias: Vec<f64>) -> Result<Self, NetworkError> {
        self.set_bias(bias)?;
        Ok(self)
    }

    /// Add Gaussian state noise, drawn from a generator seeded with `seed`.
    pub fn with_noise(mut self, noise_std: f64, seed: u64) -> Result<Self, NetworkError> {
        self.noise = noise_sampler(noise_std)?;
        self.noise_std = noise_std;
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(self)
    }

    pub fn weights(&self) -> &DMatrix<f64> {
        &self.weights
    }

    /// Replace the weight matrix. Returns an error if its shape differs from the current one.
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

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    pub fn set_bias(&mut self, bias: Vec<f64>) -> Result<(), NetworkError> {
        check_neuron_params("bias", &bias, self.size())?;
        self.bias = bias;
        Ok(())
    }

    pub fn tau(&self) -> &[f64] {
        &self.tau
    }

    /// Returns the (unrectified) neuron states.
    pub fn state(&self) -> &[f64] {
        &self.state
    }

    /// Advance all neurons by one time step and return the rectified states.
    fn step_once(&mut self, input: Vec<f64>) -> Vec<f64> {
        let drive = self.weights.transpose() * DVector::from_vec(input);
        let noise: Vec<f64> = if self.noise_std > 0.0 {
            let scale = self.dt.sqrt();
            (0..self.size())
                .map(|_| self.noise.sample(&mut self.rng) * scale)
                .collect()
        } else {
            vec![0.0; self.size()]
        };

        let dt = self.dt;
        let update = |((x, tau), (d, (b, n))): ((&mut f64, &f64), (&f64, (&f64, &f64)))| {
            *x += dt / tau * (-*x + d + b) + n;
        };
        if self.size() >= MIN_PARALLEL_NEURONS {
            self.state
                .par_iter_mut()
                .zip(self.tau.par_iter())
                .zip(drive.as_slice().par_iter().zip(self.bias.par_iter().zip(noise.par_iter())))
                .for_each(update);
        } else {
            self.state
                .iter_mut()
                .zip(self.tau.iter())
                .zip(drive.iter().zip(self.bias.iter().zip(noise.iter())))
                .for_each(update);
        }

        self.output()
    }

    fn output(&self) -> Vec<f64> {
        self.state.iter().map(|x| x.max(0.0)).collect()
    }

    fn config(&self) -> RateEulerConfig {
        RateEulerConfig {
            name: self.name.clone(),
            weights: matrix_to_rows(&self.weights),
            bias: self.bias.clone(),
            tau: self.tau.clone(),
            dt: self.dt,
            noise_std: self.noise_std,
            seed: self.seed,
        }
    }
}

fn check_neuron_params(what: &str, values: &[f64], size: usize) -> Result<(), NetworkError> {
    if values.len() != size {
        return Err(NetworkError::InvalidParameter(format!(
            "Expected {} values for {}, got {}",
            size,
            what,
            values.len()
        )));
    }
    Ok(())
}

fn noise_sampler(noise_std: f64) -> Result<Normal<f64>, NetworkError> {
    // `Normal::new` accepts a negative deviation and mirrors the distribution
    if !(noise_std.is_finite() && noise_std >= 0.0) {
        return Err(NetworkError::InvalidParameter(format!(
            "Noise level must be finite and non-negative, got {}",
            noise_std
        )));
    }
    Normal::new(0.0, noise_std).map_err(|e| {
        NetworkError::InvalidParameter(format!("Invalid noise level {}: {}", noise_std, e))
    })
}

impl Layer for RateEuler {
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
        SignalType::Continuous
    }

    fn evolve(
        &mut self,
        input: Option<&TimeSeries>,
        num_timesteps: usize,
        verbose: bool,
    ) -> Result<TimeSeries, NetworkError> {
        let t_start = self.t();
        let times = time_base(t_start, self.dt, num_timesteps);
        let mut samples = Vec::with_capacity(num_timesteps);
        for t in times.iter() {
            let row = input_at(input, *t, self.size_in())?;
            samples.push(self.step_once(row));
        }
        self.timestep += num_timesteps;

        if verbose {
            debug!(
                "Layer `{}` evolved for {} time steps, mean rate {:.4}",
                self.name,
                num_timesteps,
                self.output().iter().sum::<f64>() / self.size().max(1) as f64
            );
        }

        TimeSeries::new(times, samples, SignalType::Continuous)?.with_bounds(t_start, self.t())
    }

    fn reset_time(&mut self) {
        self.timestep = 0;
    }

    fn reset_state(&mut self) {
        self.state = vec![0.0; self.size()];
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
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

impl StreamingLayer for RateEuler {
    fn initial_output(&self) -> Vec<f64> {
        self.output()
    }

    fn step(
        &mut self,
        input: Option<&[f64]>,
        num_timesteps: usize,
    ) -> Result<Vec<f64>, NetworkError> {
        let input = step_input(input, self.size_in())?;
        let mut output = self.output();
        for _ in 0..num_timesteps {
            output = self.step_once(input.clone());
        }
        self.timestep += num_timesteps;
        Ok(output)
    }
}

impl LoadableLayer for RateEuler {
    const CLASS_NAME: &'static str = "RateEuler";

    fn load_from_dict(config: &Value) -> Result<Self, NetworkError> {
        let config: RateEulerConfig = untagged_config(config)?;
        RateEuler::build(
            &config.name,
            matrix_from_rows(&config.weights)?,
            config.bias,
            config.tau,
            config.dt,
            config.noise_std,
            config.seed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 42;

    #[test]
    fn test_euler_update() {
        // With tau equal to dt, the state jumps to its drive in a single step
        let mut layer = RateEuler::new("rate", DMatrix::from_element(1, 2, 1.0), 0.1, 0.1).unwrap();
        assert_eq!(layer.step(Some(&[2.0]), 1).unwrap(), vec![2.0, 2.0]);
        assert_eq!(layer.step(Some(&[-1.0]), 1).unwrap(), vec![0.0, 0.0]);
        assert_eq!(layer.state(), &[-1.0, -1.0]);
        assert_eq!(layer.timestep(), 2);

        // With tau twice dt, the state moves halfway
        let mut layer = RateEuler::new("rate", DMatrix::from_element(1, 1, 1.0), 0.2, 0.1).unwrap();
        let input = TimeSeries::new(vec![0.0], vec![vec![4.0]], SignalType::Continuous).unwrap();
        let output = layer.evolve(Some(&input), 2, false).unwrap();
        assert_eq!(output.samples(), &[vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_bias() {
        let mut layer = RateEuler::new("rate", DMatrix::zeros(1, 2), 0.1, 0.1)
            .unwrap()
            .with_bias(vec![1.0, -1.0])
            .unwrap();
        let output = layer.evolve(None, 3, false).unwrap();
        assert_eq!(output.samples()[2], vec![1.0, 0.0]);
        assert!(layer.set_bias(vec![1.0]).is_err());
    }

    #[test]
    fn test_noise_is_reproducible() {
        let build = || {
            RateEuler::new("rate", DMatrix::from_element(1, 3, 1.0), 0.05, 0.01)
                .unwrap()
                .with_noise(0.5, SEED)
                .unwrap()
        };
        let mut layer = build();
        let mut other = build();
        let first = layer.evolve(None, 20, false).unwrap();
        assert_eq!(first, other.evolve(None, 20, false).unwrap());
        assert!(first.samples().iter().flatten().any(|x| *x > 0.0));

        layer.reset_all();
        assert_eq!(layer.timestep(), 0);
        assert_eq!(first, layer.evolve(None, 20, false).unwrap());

        assert!(build().with_noise(-1.0, SEED).is_err());
    }

    #[test]
    fn test_parallel_update() {
        let size = MIN_PARALLEL_NEURONS + 50;
        let mut layer = RateEuler::new("rate", DMatrix::from_element(1, size, 0.5), 0.1, 0.1).unwrap();
        let output = layer.step(Some(&[3.0]), 4).unwrap();
        assert_eq!(output.len(), size);
        assert!(output.iter().all(|x| *x == 1.5));
    }

    #[test]
    fn test_dict_round_trip() {
        let layer = RateEuler::new("rate", DMatrix::from_element(2, 3, 0.25), 0.02, 0.001)
            .unwrap()
            .with_bias(vec![0.0, 0.5, 1.0])
            .unwrap()
            .with_noise(0.1, SEED)
            .unwrap();
        let config = layer.to_dict().unwrap();
        assert_eq!(config["class_name"], "RateEuler");

        let loaded = RateEuler::load_from_dict(&config).unwrap();
        assert_eq!(loaded, layer);
        assert_eq!(loaded.to_dict().unwrap(), config);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(RateEuler::new("rate", DMatrix::zeros(1, 1), 0.0, 0.1).is_err());
        assert!(RateEuler::new("rate", DMatrix::zeros(1, 1), 0.1, -0.1).is_err());

        let layer = RateEuler::new("rate", DMatrix::zeros(1, 1), 0.1, 0.01).unwrap();
        assert!(matches!(
            layer.clone().with_noise(f64::NAN, SEED),
            Err(NetworkError::InvalidParameter(_))
        ));
        let mut config = layer.with_noise(0.2, SEED).unwrap().to_dict().unwrap();
        config["noise_std"] = serde_json::json!(-0.2);
        assert!(matches!(
            RateEuler::load_from_dict(&config),
            Err(NetworkError::InvalidParameter(_))
        ));
    }
}
