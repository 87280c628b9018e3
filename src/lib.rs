//! This crate provides tools for composing time-stepped neural network layers into networks and
//! evolving them on a common clock.
//!
//! Each layer has its own time step. The network time step is the least common multiple of the
//! layer time steps (or a forced value they all divide), and every layer performs a whole number
//! of its own time steps per network time step.
//!
//! # Creating Networks
//!
//! ```rust
//! use rusty_layers::layer::pass_through::PassThrough;
//! use rusty_layers::layer::rate::RateEuler;
//! use rusty_layers::network::Network;
//! use nalgebra::DMatrix;
//!
//! // A chain of two layers, the first one receiving external input
//! let network = Network::new(
//!     vec![
//!         Box::new(PassThrough::identity("input", 2, 0.1).unwrap()),
//!         Box::new(RateEuler::new("rates", DMatrix::from_element(2, 3, 0.5), 0.05, 0.02).unwrap()),
//!     ],
//!     None,
//! )
//! .unwrap();
//!
//! assert_eq!(network.dt(), Some(0.1));
//! assert_eq!(network.timesteps_per_network_dt("rates"), Some(5));
//! ```
//!
//! # Evolving Networks
//!
//! ```rust
//! use rusty_layers::layer::pass_through::PassThrough;
//! use rusty_layers::network::{Network, Span};
//! use rusty_layers::timeseries::{SignalType, TimeSeries};
//!
//! let mut network = Network::new(
//!     vec![
//!         Box::new(PassThrough::identity("a", 1, 0.1).unwrap()),
//!         Box::new(PassThrough::identity("b", 1, 0.05).unwrap()),
//!     ],
//!     None,
//! )
//! .unwrap();
//!
//! let input = TimeSeries::from_fn(0.0, 0.1, 10, SignalType::Continuous, |t| vec![t]).unwrap();
//! let signals = network.evolve(Some(&input), Some(Span::Timesteps(4)), false).unwrap();
//!
//! assert_eq!(signals["a"].len(), 4);
//! assert_eq!(signals["b"].len(), 8);
//! assert_eq!(network.timestep(), 4);
//! ```

pub mod error;
pub mod layer;
pub mod network;
pub mod timeseries;
pub mod timestep;
pub mod utils;

pub use error::{ErrorKind, NetworkError};
pub use layer::registry::LayerRegistry;
pub use layer::{Layer, LoadableLayer, StreamingLayer};
pub use network::{BatchSizing, LayerMut, Network, NetworkConfig, Signals, Span};
pub use timeseries::{SignalType, TimeSeries};
pub use timestep::TimeStepConfig;

/// Default relative tolerance when checking whether a time step is a multiple of another.
pub const TOL_REL: f64 = 1e-5;
/// Default absolute tolerance when checking whether a time step is a multiple of another.
pub const TOL_ABS: f64 = 1e-10;
/// Default resolution to which time steps are rounded when computing least common multiples.
pub const DECIMAL_BASE: f64 = 1e-7;
/// Default bound on the ratio between the network time step and the largest layer time step.
pub const MAX_FACTOR: f64 = 100.0;
/// The number of neurons above which layer updates run in parallel.
pub const MIN_PARALLEL_NEURONS: usize = 100;
/// Reserved key of the external input among the signals of an evolution. No layer can be named so.
pub const EXTERNAL_INPUT_KEY: &str = "external";
