//! A layer mapping its input linearly to its output at every time step.
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_dt, input_at, step_input, tagged_config, untagged_config, Layer, LoadableLayer,
    StreamingLayer,
};
use crate::error::NetworkError;
use crate::timeseries::{time_base, SignalType, TimeSeries};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PassThroughConfig {
    name: String,
    /// Weights as rows of input channels, i.e., `size_in` rows of `size` values.
    weights: Vec<Vec<f64>>,
    dt: f64,
}

/// A weighted linear map from continuous input to continuous output.
#[derive(Debug, Clone, PartialEq)]
pub struct PassThrough {
    name: String,
    /// Weight matrix of shape `size_in x size`.
    weights: DMatrix<f64>,
    dt: f64,
    timestep: usize,
    last_output: Vec<f64>,
}

impl PassThrough {
    /// Create a new layer with a `size_in x size` weight matrix.
    pub fn new(name: &str, weights: DMatrix<f64>, dt: f64) -> Result<Self, NetworkError> {
        check_dt(dt)?;
        let size = weights.ncols();
        Ok(PassThrough {
            name: name.to_string(),
            weights,
            dt,
            timestep: 0,
            last_output: vec![0.0; size],
        })
    }

    /// Create a new layer from rows of weights, one per input channel.
    pub fn from_rows(name: &str, rows: &[Vec<f64>], dt: f64) -> Result<Self, NetworkError> {
        PassThrough::new(name, matrix_from_rows(rows)?, dt)
    }

    /// Create a layer copying its input (identity weights).
    pub fn identity(name: &str, size: usize, dt: f64) -> Result<Self, NetworkError> {
        PassThrough::new(name, DMatrix::identity(size, size), dt)
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

    fn apply(&self, input: Vec<f64>) -> Vec<f64> {
        let input = DVector::from_vec(input);
        (self.weights.transpose() * input).iter().copied().collect()
    }

    fn config(&self) -> PassThroughConfig {
        PassThroughConfig {
            name: self.name.clone(),
            weights: matrix_to_rows(&self.weights),
            dt: self.dt,
        }
    }
}

/// Convert rows of values into a matrix, checking that all rows have the same length.
pub(crate) fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<DMatrix<f64>, NetworkError> {
    let ncols = rows.first().map_or(0, |row| row.len());
    if rows.iter().any(|row| row.len() != ncols) {
        return Err(NetworkError::InvalidParameter(
            "All weight rows must have the same length".to_string(),
        ));
    }
    Ok(DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]))
}

pub(crate) fn matrix_to_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

impl Layer for PassThrough {
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
        let samples = times
            .iter()
            .map(|t| Ok(self.apply(input_at(input, *t, self.size_in())?)))
            .collect::<Result<Vec<Vec<f64>>, NetworkError>>()?;

        if let Some(last) = samples.last() {
            self.last_output = last.clone();
        }
        self.timestep += num_timesteps;
        if verbose {
            debug!("Layer `{}` evolved for {} time steps", self.name, num_timesteps);
        }

        TimeSeries::new(times, samples, SignalType::Continuous)?
            .with_bounds(t_start, self.t())
    }

    fn reset_time(&mut self) {
        self.timestep = 0;
    }

    fn reset_state(&mut self) {
        self.last_output = vec![0.0; self.size()];
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

impl StreamingLayer for PassThrough {
    fn initial_output(&self) -> Vec<f64> {
        self.last_output.clone()
    }

    fn step(
        &mut self,
        input: Option<&[f64]>,
        num_timesteps: usize,
    ) -> Result<Vec<f64>, NetworkError> {
        if num_timesteps > 0 {
            self.last_output = self.apply(step_input(input, self.size_in())?);
        }
        self.timestep += num_timesteps;
        Ok(self.last_output.clone())
    }
}

impl LoadableLayer for PassThrough {
    const CLASS_NAME: &'static str = "PassThrough";

    fn load_from_dict(config: &Value) -> Result<Self, NetworkError> {
        let config: PassThroughConfig = untagged_config(config)?;
        PassThrough::from_rows(&config.name, &config.weights, config.dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evolve() {
        let mut layer = PassThrough::from_rows("lin", &[vec![1.0, 2.0], vec![0.5, 0.0]], 0.1).unwrap();
        assert_eq!(layer.size_in(), 2);
        assert_eq!(layer.size(), 2);

        let input = TimeSeries::new(
            vec![0.0, 0.1, 0.2],
            vec![vec![1.0, 2.0], vec![0.0, 1.0], vec![2.0, 0.0]],
            SignalType::Continuous,
        )
        .unwrap();
        let output = layer.evolve(Some(&input), 3, false).unwrap();
        assert_eq!(output.len(), 3);
        assert_eq!(output.samples()[0], vec![2.0, 2.0]);
        assert_eq!(output.samples()[1], vec![0.5, 0.0]);
        assert_eq!(output.samples()[2], vec![2.0, 4.0]);
        assert_eq!(layer.timestep(), 3);
        assert!((layer.t() - 0.3).abs() < 1e-12);
        assert!((output.t_stop() - 0.3).abs() < 1e-12);

        // Without input the output is zero
        let output = layer.evolve(None, 2, false).unwrap();
        assert!(output.samples().iter().flatten().all(|x| *x == 0.0));
        assert_eq!(layer.timestep(), 5);
    }

    #[test]
    fn test_invalid_input() {
        let mut layer = PassThrough::identity("id", 3, 0.1).unwrap();
        let input = TimeSeries::new(vec![0.0], vec![vec![1.0]], SignalType::Continuous).unwrap();
        assert!(layer.evolve(Some(&input), 1, false).is_err());
        assert!(PassThrough::identity("id", 3, 0.0).is_err());
        assert!(PassThrough::from_rows("bad", &[vec![1.0], vec![1.0, 2.0]], 0.1).is_err());
    }

    #[test]
    fn test_reset() {
        let mut layer = PassThrough::identity("id", 2, 0.1).unwrap();
        layer.step(Some(&[1.0, 2.0]), 3).unwrap();
        assert_eq!(layer.initial_output(), vec![1.0, 2.0]);
        assert_eq!(layer.timestep(), 3);

        layer.reset_state();
        assert_eq!(layer.timestep(), 3);
        assert_eq!(layer.initial_output(), vec![0.0, 0.0]);

        layer.step(Some(&[1.0, 2.0]), 3).unwrap();
        layer.reset_all();
        assert_eq!(layer.timestep(), 0);
        assert_eq!(layer.initial_output(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_dict_round_trip() {
        let layer = PassThrough::from_rows("lin", &[vec![1.0, 2.0, 3.0]], 0.02).unwrap();
        let config = layer.to_dict().unwrap();
        assert_eq!(config["class_name"], "PassThrough");
        assert_eq!(config["name"], "lin");

        let loaded = PassThrough::load_from_dict(&config).unwrap();
        assert_eq!(loaded, layer);
        assert_eq!(loaded.to_dict().unwrap(), config);
    }

    #[test]
    fn test_set_weights() {
        let mut layer = PassThrough::identity("id", 2, 0.1).unwrap();
        assert!(layer.set_weights(DMatrix::zeros(2, 3)).is_err());
        layer.set_weights(DMatrix::from_element(2, 2, 0.5)).unwrap();
        assert_eq!(layer.step(Some(&[1.0, 1.0]), 1).unwrap(), vec![1.0, 1.0]);
    }
}
