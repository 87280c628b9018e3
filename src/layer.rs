//! Layers, the units of computation composed by a network.
//!
//! The network treats layers as opaque: it only reads their sizes, time steps and signal types,
//! evolves them, and resets them. Each layer owns its internal state and its own time step counter.
use std::any::Any;
use std::fmt;

use serde_json::Value;

use crate::error::NetworkError;
use crate::timeseries::{SignalType, TimeSeries};

pub mod iaf;
pub mod pass_through;
pub mod rate;
pub mod registry;

/// Key of the class name in the configuration of a layer.
pub const CLASS_NAME_KEY: &str = "class_name";

/// Access to the concrete type behind a layer, e.g., to update its parameters during training.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of time-stepped computation with a fixed time step, input size and output size.
pub trait Layer: AsAny + fmt::Debug {
    /// The name of the layer, unique within a network.
    fn name(&self) -> &str;

    /// Rename the layer, e.g., when its name collides with another layer of a network.
    fn set_name(&mut self, name: String);

    /// The expected number of input channels.
    fn size_in(&self) -> usize;

    /// The number of output channels.
    fn size(&self) -> usize;

    /// The time step of the layer.
    fn dt(&self) -> f64;

    /// The number of time steps the layer evolved for since its last time reset.
    fn timestep(&self) -> usize;

    /// The current time of the layer.
    fn t(&self) -> f64 {
        self.timestep() as f64 * self.dt()
    }

    fn input_type(&self) -> SignalType;

    fn output_type(&self) -> SignalType;

    /// Evolve the layer by `num_timesteps` of its own time steps and return its output.
    fn evolve(
        &mut self,
        input: Option<&TimeSeries>,
        num_timesteps: usize,
        verbose: bool,
    ) -> Result<TimeSeries, NetworkError>;

    /// Reset the time of the layer to zero, without changing its state.
    fn reset_time(&mut self);

    /// Reset the internal state of the layer, without changing its time.
    fn reset_state(&mut self);

    /// Reset both the state and the time of the layer.
    fn reset_all(&mut self) {
        self.reset_state();
        self.reset_time();
    }

    /// The class name under which the layer is stored and found in a [`registry::LayerRegistry`].
    fn class_name(&self) -> &'static str;

    /// The configuration of the layer, including its class name under [`CLASS_NAME_KEY`].
    fn to_dict(&self) -> Result<Value, NetworkError>;

    /// The single-step evolution interface of the layer, if it supports streaming.
    fn as_streaming(&mut self) -> Option<&mut dyn StreamingLayer> {
        None
    }
}

/// Single-step evolution, used to stream data through a network one network time step at a time.
pub trait StreamingLayer {
    /// The output of the layer before any streaming step.
    fn initial_output(&self) -> Vec<f64>;

    /// Advance the layer by `num_timesteps` of its own time steps while holding `input` constant,
    /// and return the output of the last step (event layers return counts over all steps).
    fn step(&mut self, input: Option<&[f64]>, num_timesteps: usize)
        -> Result<Vec<f64>, NetworkError>;
}

/// Layers that can be reconstructed from their configuration.
pub trait LoadableLayer: Layer + Sized {
    /// The class name written by [`Layer::to_dict`].
    const CLASS_NAME: &'static str;

    /// Reconstruct a layer from the output of [`Layer::to_dict`].
    fn load_from_dict(config: &Value) -> Result<Self, NetworkError>;
}

/// Serialize a configuration and tag it with a class name.
pub(crate) fn tagged_config<C: serde::Serialize>(
    config: &C,
    class_name: &str,
) -> Result<Value, NetworkError> {
    let mut value = serde_json::to_value(config)?;
    match value.as_object_mut() {
        Some(map) => {
            map.insert(
                CLASS_NAME_KEY.to_string(),
                Value::String(class_name.to_string()),
            );
            Ok(value)
        }
        None => Err(NetworkError::Serialization(format!(
            "Configuration of class `{}` is not a mapping",
            class_name
        ))),
    }
}

/// Deserialize a configuration, ignoring its class name tag.
pub(crate) fn untagged_config<C: serde::de::DeserializeOwned>(
    config: &Value,
) -> Result<C, NetworkError> {
    let mut config = config.clone();
    if let Some(map) = config.as_object_mut() {
        map.remove(CLASS_NAME_KEY);
    }
    Ok(serde_json::from_value(config)?)
}

/// Returns the input samples of a layer at time `t`, or zeros if there is no input yet.
/// Returns an error if the input does not have `size_in` channels.
pub(crate) fn input_at(
    input: Option<&TimeSeries>,
    t: f64,
    size_in: usize,
) -> Result<Vec<f64>, NetworkError> {
    match input.and_then(|ts| ts.sample_at(t)) {
        Some(row) if row.len() == size_in => Ok(row.to_vec()),
        Some(row) => Err(NetworkError::Layer(format!(
            "Input has {} channels, expected {}",
            row.len(),
            size_in
        ))),
        None => Ok(vec![0.0; size_in]),
    }
}

/// Check the input of a streaming step.
pub(crate) fn step_input(input: Option<&[f64]>, size_in: usize) -> Result<Vec<f64>, NetworkError> {
    match input {
        Some(row) if row.len() == size_in => Ok(row.to_vec()),
        Some(row) => Err(NetworkError::Layer(format!(
            "Input has {} channels, expected {}",
            row.len(),
            size_in
        ))),
        None => Ok(vec![0.0; size_in]),
    }
}

/// Check a layer time step at construction.
pub(crate) fn check_dt(dt: f64) -> Result<(), NetworkError> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(NetworkError::InvalidTimeStep(dt));
    }
    Ok(())
}
