//! Networks of layers: connectivity, time step resolution, evolution and persistence.
mod graph;
pub mod network;
pub mod order;
pub mod persistence;
pub mod scheduler;

pub use network::{LayerMut, Network};
pub use persistence::NetworkConfig;
pub use scheduler::{BatchSizing, LogProgress, NoProgress, ProgressReporter, Signals, Span};
