//! Error module for the Rusty Layers library.
use thiserror::Error;

/// The broad category an error belongs to.
///
/// Every [`NetworkError`] maps to exactly one kind, which lets callers react to a family of
/// failures (e.g., any structural problem) without matching on every variant.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// The connectivity graph would be invalid (cycle, dimension or type mismatch, unknown layer).
    Structural,
    /// No usable network time step exists for the layers' time steps.
    TimingConfiguration,
    /// A layer clock disagrees with the network clock.
    Synchronization,
    /// An operation was called with missing or invalid arguments.
    Argument,
    /// A layer lacks a capability required by the operation.
    Capability,
    /// Saving or loading a network failed.
    Persistence,
    /// A layer implementation failed on its own.
    Layer,
}

/// Error types for the library.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum NetworkError {
    /// The output size of the source layer differs from the input size of the target layer.
    #[error("Dimensions of layers `{source_name}` (size={size}) and `{target}` (size_in={size_in}) do not match")]
    DimensionMismatch {
        source_name: String,
        size: usize,
        target: String,
        size_in: usize,
    },
    /// The output type of the source layer differs from the input type of the target layer.
    #[error("Input / output types of layer `{source_name}` (output_type={output_type}) and `{target}` (input_type={input_type}) do not match")]
    TypeMismatch {
        source_name: String,
        output_type: String,
        target: String,
        input_type: String,
    },
    /// The predecessor relation contains a cycle.
    #[error("Cannot resolve evolution order of layers: {0}")]
    UnresolvableOrder(String),
    /// No layer with the given name belongs to the network.
    #[error("Layer `{0}` not found in the network")]
    LayerNotFound(String),
    /// A time step cannot be expressed in the decimal base used for least common multiples.
    #[error("Time step {value} is too small for decimal base {decimal_base}")]
    StepTooSmall { value: f64, decimal_base: f64 },
    /// The least common multiple of the layer time steps is unusable.
    #[error("Could not find a reasonable common time step: {0}")]
    NoCommonTimeStep(String),
    /// A layer time step does not divide the forced network time step.
    #[error("Network time step is set to {network_dt}, which is not a multiple of layer `{layer}`'s time step ({layer_dt})")]
    IncompatibleTimeStep {
        layer: String,
        layer_dt: f64,
        network_dt: f64,
    },
    /// Time steps must be finite and positive.
    #[error("Invalid time step {0}: must be finite and positive")]
    InvalidTimeStep(f64),
    /// The current network time cannot be expressed in a new network time step.
    #[error("Network time {t} is not a multiple of the new network time step {dt}")]
    IncompatibleNetworkTime { t: f64, dt: f64 },
    /// A layer clock is not in sync with the network clock after an evolution.
    #[error("Layer `{layer}` is not in sync with the network (layer timestep={layer_timestep}, expected={expected})")]
    Desynchronized {
        layer: String,
        layer_timestep: usize,
        expected: usize,
    },
    /// A layer can only join the network at the current network time.
    #[error("Layer time must match network time (network: t={network_t}, layer `{layer}`: t={layer_t})")]
    LayerTimeMismatch {
        layer: String,
        layer_t: f64,
        network_t: f64,
    },
    /// None of the arguments determining the evolution length was supplied.
    #[error("One of `num_timesteps`, `duration` or an input time series must be supplied")]
    MissingDuration,
    /// The input time series ends before the current network time.
    #[error("Cannot determine an appropriate evolution duration: input ends at {t_stop}, before the network time {t}")]
    NonPositiveDuration { t_stop: f64, t: f64 },
    /// The operation requires at least one layer.
    #[error("The network does not contain any layers")]
    EmptyNetwork,
    /// Error for invalid parameters.
    #[error("Invalid parameters: {0}")]
    InvalidParameter(String),
    /// The external input does not fit the layers receiving it.
    #[error("Invalid external input: {0}")]
    InputMismatch(String),
    /// A layer does not implement single-step evolution.
    #[error("Layer `{0}` does not implement the streaming interface")]
    NotStreamable(String),
    /// The class name of a stored layer is not registered.
    #[error("Unknown layer class `{0}`")]
    UnknownLayerClass(String),
    /// Error for I/O operations.
    #[error("I/O error: {0}")]
    IOError(String),
    /// Error while (de)serializing a network or layer configuration.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error raised by a layer implementation.
    #[error("Layer error: {0}")]
    Layer(String),
}

impl NetworkError {
    /// Returns the category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::DimensionMismatch { .. }
            | NetworkError::TypeMismatch { .. }
            | NetworkError::UnresolvableOrder(_)
            | NetworkError::LayerNotFound(_) => ErrorKind::Structural,
            NetworkError::StepTooSmall { .. }
            | NetworkError::NoCommonTimeStep(_)
            | NetworkError::IncompatibleTimeStep { .. }
            | NetworkError::InvalidTimeStep(_)
            | NetworkError::IncompatibleNetworkTime { .. } => ErrorKind::TimingConfiguration,
            NetworkError::Desynchronized { .. } | NetworkError::LayerTimeMismatch { .. } => {
                ErrorKind::Synchronization
            }
            NetworkError::MissingDuration
            | NetworkError::NonPositiveDuration { .. }
            | NetworkError::EmptyNetwork
            | NetworkError::InvalidParameter(_)
            | NetworkError::InputMismatch(_) => ErrorKind::Argument,
            NetworkError::NotStreamable(_) => ErrorKind::Capability,
            NetworkError::UnknownLayerClass(_)
            | NetworkError::IOError(_)
            | NetworkError::Serialization(_) => ErrorKind::Persistence,
            NetworkError::Layer(_) => ErrorKind::Layer,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(e: serde_json::Error) -> Self {
        NetworkError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            NetworkError::UnresolvableOrder("a, b".into()).kind(),
            ErrorKind::Structural
        );
        assert_eq!(
            NetworkError::NoCommonTimeStep("".into()).kind(),
            ErrorKind::TimingConfiguration
        );
        assert_eq!(
            NetworkError::Desynchronized {
                layer: "a".into(),
                layer_timestep: 1,
                expected: 2
            }
            .kind(),
            ErrorKind::Synchronization
        );
        assert_eq!(NetworkError::MissingDuration.kind(), ErrorKind::Argument);
        assert_eq!(
            NetworkError::NotStreamable("a".into()).kind(),
            ErrorKind::Capability
        );
    }

    #[test]
    fn test_error_display_names_layers() {
        let e = NetworkError::TypeMismatch {
            source_name: "filt".into(),
            output_type: "Event".into(),
            target: "rate".into(),
            input_type: "Continuous".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("filt") && msg.contains("rate"));
        assert!(msg.contains("Event") && msg.contains("Continuous"));
    }
}
