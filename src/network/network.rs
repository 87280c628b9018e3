//! The network structure and read access to its layers.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};

use log::warn;

use crate::error::NetworkError;
use crate::layer::Layer;
use crate::timestep::TimeStepConfig;

/// Identifier of a layer within a network, assigned in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LayerId(pub(crate) usize);

/// A directed acyclic graph of layers evolved on a common clock.
///
/// Each layer has at most one predecessor whose output it receives as input. Layers flagged as
/// external inputs receive the input time series passed to the network instead. The network
/// owns its layers; they are addressed by their unique names.
#[derive(Debug)]
pub struct Network {
    pub(super) layers: BTreeMap<LayerId, Box<dyn Layer>>,
    pub(super) ids: HashMap<String, LayerId>,
    /// Maps a layer to the layer it receives input from.
    pub(super) predecessors: HashMap<LayerId, LayerId>,
    pub(super) external: BTreeSet<LayerId>,
    /// Number of layer time steps per network time step.
    pub(super) ratios: HashMap<LayerId, usize>,
    pub(super) order: Vec<LayerId>,
    pub(super) dt: Option<f64>,
    pub(super) force_dt: bool,
    pub(super) timestep: usize,
    pub(super) config: TimeStepConfig,
    pub(super) input_layer: Option<LayerId>,
    pub(super) output_layer: Option<LayerId>,
    pub(super) next_id: usize,
}

impl Network {
    /// Create a network from layers connected in series, with default time step tolerances.
    ///
    /// The first layer receives external input and every other layer receives the output of
    /// the layer before it. If `dt` is provided, the network time step is forced to this value
    /// and every layer time step must divide it. Otherwise, the network time step is the least
    /// common multiple of the layer time steps.
    pub fn new(layers: Vec<Box<dyn Layer>>, dt: Option<f64>) -> Result<Self, NetworkError> {
        Network::with_config(layers, dt, TimeStepConfig::default())
    }

    /// Create a network from layers connected in series, see [`Network::new`].
    pub fn with_config(
        layers: Vec<Box<dyn Layer>>,
        dt: Option<f64>,
        config: TimeStepConfig,
    ) -> Result<Self, NetworkError> {
        config.validate()?;
        if let Some(dt) = dt {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(NetworkError::InvalidTimeStep(dt));
            }
        }

        let mut network = Network {
            layers: BTreeMap::new(),
            ids: HashMap::new(),
            predecessors: HashMap::new(),
            external: BTreeSet::new(),
            ratios: HashMap::new(),
            order: vec![],
            dt,
            force_dt: dt.is_some(),
            timestep: 0,
            config,
            input_layer: None,
            output_layer: None,
            next_id: 0,
        };

        let mut previous: Option<String> = None;
        for (k, layer) in layers.into_iter().enumerate() {
            let name = network.add_layer(layer, previous.as_deref(), None, k == 0)?;
            if k == 0 {
                network.input_layer = network.ids.get(&name).copied();
            }
            previous = Some(name);
        }
        network.output_layer = previous.and_then(|name| network.ids.get(&name).copied());

        Ok(network)
    }

    /// Returns the network time step, or `None` for an empty network without forced time step.
    pub fn dt(&self) -> Option<f64> {
        self.dt
    }

    /// Returns whether the network time step was forced at construction.
    pub fn is_dt_forced(&self) -> bool {
        self.force_dt
    }

    /// Returns the number of network time steps since the last time reset.
    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Returns the current network time.
    pub fn t(&self) -> f64 {
        self.dt.map_or(0.0, |dt| self.timestep as f64 * dt)
    }

    pub fn time_step_config(&self) -> &TimeStepConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains_layer(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    /// Returns the layer names in evolution order.
    pub fn evolution_order(&self) -> Vec<&str> {
        self.order.iter().filter_map(|id| self.name_of(*id)).collect()
    }

    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        let id = self.ids.get(name)?;
        self.layers.get(id).map(|layer| layer.as_ref())
    }

    /// Returns mutable access to a layer, e.g., to update its parameters.
    /// The layer keeps its name within the network, see [`LayerMut`].
    pub fn layer_mut(&mut self, name: &str) -> Option<LayerMut<'_, dyn Layer + 'static>> {
        let id = self.ids.get(name)?;
        let layer: &mut (dyn Layer + 'static) = self.layers.get_mut(id)?.as_mut();
        Some(LayerMut::new(layer))
    }

    /// Returns a layer as its concrete type, if it has this type.
    pub fn layer_as<T: Layer + 'static>(&self, name: &str) -> Option<&T> {
        self.layer(name)?.as_any().downcast_ref::<T>()
    }

    /// Returns a layer as its concrete type with mutable access, if it has this type.
    pub fn layer_as_mut<T: Layer + 'static>(&mut self, name: &str) -> Option<LayerMut<'_, T>> {
        let id = self.ids.get(name)?;
        let layer: &mut (dyn Layer + 'static) = self.layers.get_mut(id)?.as_mut();
        layer.as_any_mut().downcast_mut::<T>().map(LayerMut::new)
    }

    /// Returns the name of the layer whose output `name` receives, if any.
    pub fn predecessor(&self, name: &str) -> Option<&str> {
        let id = self.ids.get(name)?;
        self.predecessors
            .get(id)
            .and_then(|source| self.name_of(*source))
    }

    pub fn is_external_input(&self, name: &str) -> bool {
        self.ids
            .get(name)
            .map_or(false, |id| self.external.contains(id))
    }

    /// Returns the number of time steps the layer performs per network time step.
    pub fn timesteps_per_network_dt(&self, name: &str) -> Option<usize> {
        let id = self.ids.get(name)?;
        self.ratios.get(id).copied()
    }

    /// The first layer of the chain the network was built from, if still present.
    pub fn input_layer(&self) -> Option<&str> {
        self.input_layer.and_then(|id| self.name_of(id))
    }

    /// The last layer of the chain the network was built from, if still present.
    pub fn output_layer(&self) -> Option<&str> {
        self.output_layer.and_then(|id| self.name_of(id))
    }

    pub(super) fn name_of(&self, id: LayerId) -> Option<&str> {
        self.layers.get(&id).map(|layer| layer.name())
    }

    pub(super) fn id(&self, name: &str) -> Result<LayerId, NetworkError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| NetworkError::LayerNotFound(name.to_string()))
    }

    pub(super) fn get(&self, id: LayerId) -> Result<&dyn Layer, NetworkError> {
        self.layers
            .get(&id)
            .map(|layer| layer.as_ref())
            .ok_or_else(|| NetworkError::LayerNotFound(format!("#{}", id.0)))
    }

    /// Returns the name and time step of every layer, in insertion order.
    pub(super) fn layer_dts(&self) -> Vec<(&str, f64)> {
        self.layers
            .values()
            .map(|layer| (layer.name(), layer.dt()))
            .collect()
    }
}

/// Mutable access to a layer owned by a network.
///
/// Layers are addressed by name within the network, so a rename through this handle is undone
/// when the handle is dropped.
pub struct LayerMut<'a, T: Layer + ?Sized> {
    layer: &'a mut T,
    name: String,
}

impl<'a, T: Layer + ?Sized> LayerMut<'a, T> {
    fn new(layer: &'a mut T) -> Self {
        let name = layer.name().to_string();
        LayerMut { layer, name }
    }
}

impl<T: Layer + ?Sized> Deref for LayerMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.layer
    }
}

impl<T: Layer + ?Sized> DerefMut for LayerMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.layer
    }
}

impl<T: Layer + ?Sized> Drop for LayerMut<'_, T> {
    fn drop(&mut self) {
        if self.layer.name() != self.name {
            warn!(
                "Layer `{}` cannot be renamed to `{}` within a network",
                self.name,
                self.layer.name()
            );
            self.layer.set_name(std::mem::take(&mut self.name));
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Network object with {} layers", self.layers.len())?;
        if let Some(dt) = self.dt {
            write!(f, " (dt={}, t={})", dt, self.t())?;
        }
        for id in self.order.iter() {
            if let Some(layer) = self.layers.get(id) {
                write!(
                    f,
                    "\n    {} `{}` (size_in={}, size={}, dt={})",
                    layer.class_name(),
                    layer.name(),
                    layer.size_in(),
                    layer.size(),
                    layer.dt()
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::pass_through::PassThrough;
    use crate::layer::rate::RateEuler;
    use nalgebra::DMatrix;

    fn chain() -> Network {
        Network::new(
            vec![
                Box::new(PassThrough::identity("input", 2, 0.1).unwrap()),
                Box::new(RateEuler::new("hidden", DMatrix::zeros(2, 3), 0.1, 0.02).unwrap()),
            ],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_new_chain() {
        let network = chain();
        assert_eq!(network.num_layers(), 2);
        assert_eq!(network.dt(), Some(0.1));
        assert!(!network.is_dt_forced());
        assert_eq!(network.evolution_order(), vec!["input", "hidden"]);
        assert_eq!(network.input_layer(), Some("input"));
        assert_eq!(network.output_layer(), Some("hidden"));
        assert_eq!(network.predecessor("hidden"), Some("input"));
        assert_eq!(network.predecessor("input"), None);
        assert!(network.is_external_input("input"));
        assert!(!network.is_external_input("hidden"));
        assert_eq!(network.timesteps_per_network_dt("input"), Some(1));
        assert_eq!(network.timesteps_per_network_dt("hidden"), Some(5));
        assert_eq!(network.timesteps_per_network_dt("missing"), None);
    }

    #[test]
    fn test_empty() {
        let network = Network::new(vec![], None).unwrap();
        assert!(network.is_empty());
        assert_eq!(network.dt(), None);
        assert_eq!(network.t(), 0.0);
        assert_eq!(network.input_layer(), None);

        let network = Network::new(vec![], Some(0.5)).unwrap();
        assert_eq!(network.dt(), Some(0.5));
        assert!(network.is_dt_forced());

        assert_eq!(
            Network::new(vec![], Some(-0.5)).unwrap_err(),
            NetworkError::InvalidTimeStep(-0.5)
        );
    }

    #[test]
    fn test_typed_access() {
        let mut network = chain();
        assert!(network.layer_as::<PassThrough>("input").is_some());
        assert!(network.layer_as::<RateEuler>("input").is_none());

        let mut rate = network.layer_as_mut::<RateEuler>("hidden").unwrap();
        rate.set_bias(vec![1.0, 2.0, 3.0]).unwrap();
        drop(rate);
        assert_eq!(
            network.layer_as::<RateEuler>("hidden").unwrap().bias(),
            &[1.0, 2.0, 3.0]
        );
        assert!(network.layer("missing").is_none());
        assert!(network.layer_as_mut::<PassThrough>("hidden").is_none());
    }

    #[test]
    fn test_renames_through_mutable_access_are_undone() {
        let mut network = chain();
        network.layer_mut("input").unwrap().set_name("renamed".to_string());
        network
            .layer_as_mut::<RateEuler>("hidden")
            .unwrap()
            .set_name("other".to_string());

        assert_eq!(network.evolution_order(), vec!["input", "hidden"]);
        assert_eq!(network.layer("input").unwrap().name(), "input");
        assert!(network.layer("renamed").is_none());
        assert_eq!(network.predecessor("hidden"), Some("input"));

        let layer = network.layer_mut("hidden").unwrap();
        assert_eq!(layer.size(), 3);
    }

    #[test]
    fn test_display() {
        let display = chain().to_string();
        assert!(display.starts_with("Network object with 2 layers (dt=0.1, t=0)"));
        assert!(display.contains("PassThrough `input` (size_in=2, size=2, dt=0.1)"));
        assert!(display.contains("RateEuler `hidden` (size_in=2, size=3, dt=0.02)"));
    }
}
