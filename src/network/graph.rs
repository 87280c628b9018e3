//! Structural mutations of a network.
//!
//! Every mutation either succeeds as a whole or leaves the network as it was: the layers, the
//! predecessor relation, the time step and the evolution order are restored on failure.
use log::{debug, info, warn};

use super::network::{LayerId, Network};
use crate::error::NetworkError;
use crate::layer::Layer;
use crate::timestep::{common_time_step, is_multiple, timesteps_per_network_dt};
use crate::utils::is_close;
use crate::EXTERNAL_INPUT_KEY;

/// The network clock, as resolved for a set of layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Timing {
    dt: Option<f64>,
    timestep: usize,
}

impl Network {
    /// Add a layer to the network and return its name within the network.
    ///
    /// The layer must be at the current network time. If its name is already taken (or is the
    /// reserved key of the external input), the layer is renamed by increasing a trailing `_<i>`
    /// suffix, or by appending `_0`. The layer optionally receives input from `input_layer` and
    /// sends its output to `output_layer`. The network time step is recomputed.
    ///
    /// On error, the network is left unchanged and the layer is dropped.
    pub fn add_layer(
        &mut self,
        mut layer: Box<dyn Layer>,
        input_layer: Option<&str>,
        output_layer: Option<&str>,
        external_input: bool,
    ) -> Result<String, NetworkError> {
        if !is_close(layer.t(), self.t()) {
            return Err(NetworkError::LayerTimeMismatch {
                layer: layer.name().to_string(),
                layer_t: layer.t(),
                network_t: self.t(),
            });
        }

        let input_id = input_layer.map(|name| self.id(name)).transpose()?;
        let output_id = output_layer.map(|name| self.id(name)).transpose()?;
        if let Some(source) = input_id {
            check_compatible(self.get(source)?, layer.as_ref())?;
        }
        if let Some(target) = output_id {
            check_compatible(layer.as_ref(), self.get(target)?)?;
        }

        if self.ids.contains_key(layer.name()) || layer.name() == EXTERNAL_INPUT_KEY {
            let mut name = layer.name().to_string();
            while self.ids.contains_key(&name) || name == EXTERNAL_INPUT_KEY {
                name = new_name(&name);
            }
            info!(
                "A layer with name `{}` already exists, the new layer is renamed to `{}`",
                layer.name(),
                name
            );
            layer.set_name(name);
        }

        let previous_timing = self.timing();
        let timing = {
            let mut dts = self.layer_dts();
            dts.push((layer.name(), layer.dt()));
            self.resolve_timing(&dts)?
        };

        let id = LayerId(self.next_id);
        self.next_id += 1;
        let name = layer.name().to_string();
        self.ids.insert(name.clone(), id);
        self.layers.insert(id, layer);
        if external_input {
            self.external.insert(id);
        }
        self.apply_timing(timing);

        let previous_output_source =
            output_id.and_then(|target| self.predecessors.get(&target).copied());
        if let Some(source) = input_id {
            self.predecessors.insert(id, source);
        }
        if let Some(target) = output_id {
            self.predecessors.insert(target, id);
        }

        match self.resolve_evolution_order() {
            Ok(order) => self.order = order,
            Err(err) => {
                self.predecessors.remove(&id);
                if let Some(target) = output_id {
                    self.restore_predecessor(target, previous_output_source);
                }
                self.external.remove(&id);
                self.ids.remove(&name);
                self.layers.remove(&id);
                self.apply_timing(previous_timing);
                return Err(err);
            }
        }

        info!("Added layer `{}` to the network", name);
        Ok(name)
    }

    /// Remove a layer from the network and return it.
    ///
    /// Layers receiving input from the removed layer are disconnected. The network time step is
    /// recomputed from the remaining layers; an empty network keeps its last time step.
    pub fn remove_layer(&mut self, name: &str) -> Result<Box<dyn Layer>, NetworkError> {
        let id = self.id(name)?;
        let timing = {
            let dts: Vec<(&str, f64)> = self
                .layers
                .iter()
                .filter(|(other, _)| **other != id)
                .map(|(_, layer)| (layer.name(), layer.dt()))
                .collect();
            self.resolve_timing(&dts)?
        };

        let targets: Vec<LayerId> = self
            .predecessors
            .iter()
            .filter(|(_, source)| **source == id)
            .map(|(target, _)| *target)
            .collect();
        for target in targets {
            self.predecessors.remove(&target);
            if let Some(target_name) = self.name_of(target) {
                info!(
                    "Layer `{}` no longer receives input from layer `{}`",
                    target_name,
                    name
                );
            }
        }
        self.predecessors.remove(&id);
        self.external.remove(&id);
        self.ids.remove(name);
        let layer = self
            .layers
            .remove(&id)
            .ok_or_else(|| NetworkError::LayerNotFound(name.to_string()))?;
        if self.input_layer == Some(id) {
            self.input_layer = None;
        }
        if self.output_layer == Some(id) {
            self.output_layer = None;
        }

        self.apply_timing(timing);
        self.order = self.resolve_evolution_order()?;
        info!("Removed layer `{}` from the network", name);
        Ok(layer)
    }

    /// Let `target` receive the output of `source`, replacing its previous input layer.
    ///
    /// Returns an error, leaving the network unchanged, if the output size or type of `source`
    /// does not match the input of `target`, or if the connection would introduce a cycle.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<(), NetworkError> {
        let source_id = self.id(source)?;
        let target_id = self.id(target)?;
        check_compatible(self.get(source_id)?, self.get(target_id)?)?;

        let previous = self.predecessors.insert(target_id, source_id);
        match self.resolve_evolution_order() {
            Ok(order) => {
                self.order = order;
                info!("Layer `{}` now receives input from layer `{}`", target, source);
                Ok(())
            }
            Err(err) => {
                self.restore_predecessor(target_id, previous);
                Err(err)
            }
        }
    }

    /// Remove the connection from `source` to `target`. Does nothing if they are not connected.
    pub fn disconnect(&mut self, source: &str, target: &str) -> Result<(), NetworkError> {
        let source_id = self.id(source)?;
        let target_id = self.id(target)?;

        if self.predecessors.get(&target_id) == Some(&source_id) {
            self.predecessors.remove(&target_id);
            self.order = self.resolve_evolution_order()?;
            info!(
                "Layer `{}` no longer receives input from layer `{}`",
                target,
                source
            );
        } else {
            warn!(
                "There is no connection from layer `{}` to layer `{}`",
                source,
                target
            );
        }
        Ok(())
    }

    /// Set whether a layer receives the external input of the network.
    pub fn set_external_input(&mut self, name: &str, external_input: bool) -> Result<(), NetworkError> {
        let id = self.id(name)?;
        if external_input {
            self.external.insert(id);
        } else {
            self.external.remove(&id);
        }
        Ok(())
    }

    fn restore_predecessor(&mut self, target: LayerId, source: Option<LayerId>) {
        match source {
            Some(source) => {
                self.predecessors.insert(target, source);
            }
            None => {
                self.predecessors.remove(&target);
            }
        }
    }

    pub(super) fn timing(&self) -> Timing {
        Timing {
            dt: self.dt,
            timestep: self.timestep,
        }
    }

    /// Resolve the network clock for a set of layer time steps, without changing the network.
    ///
    /// With a forced time step, every layer time step must divide it. Otherwise, the time step is
    /// the least common multiple of the layer time steps. If the time step changes while the
    /// network time is not zero, the time step counter is converted so that the network time is
    /// preserved.
    pub(super) fn resolve_timing(&self, dts: &[(&str, f64)]) -> Result<Timing, NetworkError> {
        let dt = match self.dt {
            Some(dt) if self.force_dt => {
                for (name, layer_dt) in dts.iter() {
                    if !is_multiple(dt, *layer_dt, self.config.tol_rel, self.config.tol_abs) {
                        return Err(NetworkError::IncompatibleTimeStep {
                            layer: name.to_string(),
                            layer_dt: *layer_dt,
                            network_dt: dt,
                        });
                    }
                }
                Some(dt)
            }
            _ if dts.is_empty() => self.dt,
            _ => Some(common_time_step(dts, &self.config)?),
        };

        let timestep = match (self.dt, dt) {
            (Some(old_dt), Some(new_dt)) if self.timestep > 0 && old_dt != new_dt => {
                let t = self.t();
                if !is_multiple(t, new_dt, self.config.tol_rel, self.config.tol_abs) {
                    return Err(NetworkError::IncompatibleNetworkTime { t, dt: new_dt });
                }
                (t / new_dt).round() as usize
            }
            _ => self.timestep,
        };

        Ok(Timing { dt, timestep })
    }

    /// Set the network clock and the number of layer time steps per network time step.
    pub(super) fn apply_timing(&mut self, timing: Timing) {
        if timing.dt != self.dt {
            if let Some(dt) = timing.dt {
                debug!("Network time step set to {}", dt);
            }
        }
        self.dt = timing.dt;
        self.timestep = timing.timestep;
        self.ratios = self
            .layers
            .iter()
            .map(|(id, layer)| {
                let ratio = timing
                    .dt
                    .map_or(1, |dt| timesteps_per_network_dt(dt, layer.dt()));
                (*id, ratio)
            })
            .collect();
    }
}

/// Check that the output of `source` fits the input of `target`.
fn check_compatible(source: &dyn Layer, target: &dyn Layer) -> Result<(), NetworkError> {
    if source.size() != target.size_in() {
        return Err(NetworkError::DimensionMismatch {
            source_name: source.name().to_string(),
            size: source.size(),
            target: target.name().to_string(),
            size_in: target.size_in(),
        });
    }
    if source.output_type() != target.input_type() {
        return Err(NetworkError::TypeMismatch {
            source_name: source.name().to_string(),
            output_type: source.output_type().to_string(),
            target: target.name().to_string(),
            input_type: target.input_type().to_string(),
        });
    }
    Ok(())
}

/// Returns a new name by increasing the integer after the last `_`, or by appending `_0`.
/// A suffix that cannot be increased is kept and `_0` is appended.
pub(super) fn new_name(name: &str) -> String {
    let increased = name.rsplit_once('_').and_then(|(stem, suffix)| {
        let i = suffix.parse::<i64>().ok()?.checked_add(1)?;
        Some(format!("{}_{}", stem, i))
    });
    increased.unwrap_or_else(|| format!("{}_0", name))
}
