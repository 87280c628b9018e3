//! Saving and loading networks as JSON files.
//!
//! A network is stored as the configurations of its layers in evolution order, together with the
//! network time step if it was forced. Networks that are not a plain chain also record their
//! connections and external inputs.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::network::Network;
use crate::error::NetworkError;
use crate::layer::registry::LayerRegistry;
use crate::timestep::TimeStepConfig;

/// The stored form of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Layer configurations, each carrying its class name, in evolution order.
    pub layers: Vec<Value>,
    /// The network time step, present only if it was forced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    /// `(source, target)` pairs. Without them, the layers form a chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_inputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_step: Option<TimeStepConfig>,
}

impl Network {
    /// Returns the configuration the network can be rebuilt from with [`Network::from_config`].
    pub fn to_config(&self) -> Result<NetworkConfig, NetworkError> {
        let layers = self
            .order
            .iter()
            .map(|id| self.get(*id)?.to_dict())
            .collect::<Result<Vec<Value>, NetworkError>>()?;

        let (connections, external_inputs) = if self.is_chain() {
            (None, None)
        } else {
            let connections = self
                .order
                .iter()
                .filter_map(|target| {
                    let source = self.predecessors.get(target)?;
                    Some((
                        self.name_of(*source)?.to_string(),
                        self.name_of(*target)?.to_string(),
                    ))
                })
                .collect();
            let external_inputs = self
                .order
                .iter()
                .filter(|id| self.external.contains(*id))
                .filter_map(|id| self.name_of(*id).map(|name| name.to_string()))
                .collect();
            (Some(connections), Some(external_inputs))
        };

        Ok(NetworkConfig {
            layers,
            dt: if self.force_dt { self.dt } else { None },
            connections,
            external_inputs,
            time_step: if self.config == TimeStepConfig::default() {
                None
            } else {
                Some(self.config)
            },
        })
    }

    /// Rebuild a network from its configuration, looking up layer classes in `registry`.
    ///
    /// Without connections, the layers are connected in series with the first one receiving
    /// external input, as done by [`Network::new`].
    pub fn from_config(
        config: &NetworkConfig,
        registry: &LayerRegistry,
    ) -> Result<Network, NetworkError> {
        let layers = config
            .layers
            .iter()
            .map(|layer| registry.load(layer))
            .collect::<Result<Vec<_>, NetworkError>>()?;
        let time_step = config.time_step.unwrap_or_default();

        let connections = match config.connections.as_ref() {
            Some(connections) => connections,
            None => return Network::with_config(layers, config.dt, time_step),
        };

        let external: Vec<&str> = config
            .external_inputs
            .iter()
            .flatten()
            .map(|name| name.as_str())
            .collect();
        let mut network = Network::with_config(vec![], config.dt, time_step)?;
        let mut names = Vec::with_capacity(layers.len());
        for layer in layers {
            let is_external = external.contains(&layer.name());
            names.push(network.add_layer(layer, None, None, is_external)?);
        }
        for (source, target) in connections.iter() {
            network.connect(source, target)?;
        }

        network.input_layer = names
            .iter()
            .find(|name| network.is_external_input(name))
            .and_then(|name| network.ids.get(name.as_str()).copied());
        network.output_layer = names
            .last()
            .and_then(|name| network.ids.get(name.as_str()).copied());

        debug!("Loaded network with {} layers", network.num_layers());
        Ok(network)
    }

    /// Save the network to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NetworkError> {
        let config = self.to_config()?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &config)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a network from a JSON file written by [`Network::save`].
    pub fn load<P: AsRef<Path>>(path: P, registry: &LayerRegistry) -> Result<Network, NetworkError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: NetworkConfig = serde_json::from_reader(reader)?;
        Network::from_config(&config, registry)
    }

    /// Whether the layers form a chain in evolution order, with only the first one receiving
    /// external input.
    fn is_chain(&self) -> bool {
        let first_external = match self.order.first() {
            Some(first) => self.external.len() == 1 && self.external.contains(first),
            None => self.external.is_empty(),
        };
        first_external
            && self.predecessors.len() + 1 == self.order.len().max(1)
            && self
                .order
                .windows(2)
                .all(|pair| self.predecessors.get(&pair[1]) == Some(&pair[0]))
    }
}
