//! Lookup of layer constructors by class name, used to reconstruct stored networks.
use std::collections::HashMap;
use std::fmt;

use log::warn;
use serde_json::Value;

use super::iaf::IafEuler;
use super::pass_through::PassThrough;
use super::rate::RateEuler;
use super::{Layer, LoadableLayer, CLASS_NAME_KEY};
use crate::error::NetworkError;

/// A function reconstructing a layer from its configuration.
pub type LayerLoader = Box<dyn Fn(&Value) -> Result<Box<dyn Layer>, NetworkError> + Send + Sync>;

/// Maps class names to layer constructors.
///
/// The default registry knows the built-in layers. Custom layers are added with
/// [`LayerRegistry::register`] or [`LayerRegistry::register_loader`].
pub struct LayerRegistry {
    loaders: HashMap<String, LayerLoader>,
}

impl LayerRegistry {
    /// Create a registry without any known class.
    pub fn empty() -> Self {
        LayerRegistry {
            loaders: HashMap::new(),
        }
    }

    /// Register a layer type under its class name, replacing any previous entry.
    pub fn register<T: LoadableLayer + 'static>(&mut self) {
        self.register_loader(T::CLASS_NAME, |config| {
            Ok(Box::new(T::load_from_dict(config)?) as Box<dyn Layer>)
        });
    }

    /// Register a custom constructor under a class name, replacing any previous entry.
    pub fn register_loader<F>(&mut self, class_name: &str, loader: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Layer>, NetworkError> + Send + Sync + 'static,
    {
        if self
            .loaders
            .insert(class_name.to_string(), Box::new(loader))
            .is_some()
        {
            warn!("Layer class `{}` was already registered and is replaced", class_name);
        }
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.loaders.contains_key(class_name)
    }

    /// Returns the registered class names, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.loaders.keys().map(|name| name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Reconstruct a layer from a configuration carrying its class name.
    pub fn load(&self, config: &Value) -> Result<Box<dyn Layer>, NetworkError> {
        let class_name = config
            .get(CLASS_NAME_KEY)
            .and_then(|name| name.as_str())
            .ok_or_else(|| {
                NetworkError::UnknownLayerClass(format!(
                    "layer configuration has no `{}` entry",
                    CLASS_NAME_KEY
                ))
            })?;
        let loader = self
            .loaders
            .get(class_name)
            .ok_or_else(|| NetworkError::UnknownLayerClass(class_name.to_string()))?;
        loader(config)
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        let mut registry = LayerRegistry::empty();
        registry.register::<PassThrough>();
        registry.register::<RateEuler>();
        registry.register::<IafEuler>();
        registry
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("classes", &self.class_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn test_default_registry() {
        let registry = LayerRegistry::default();
        assert_eq!(
            registry.class_names(),
            vec!["IafEuler", "PassThrough", "RateEuler"]
        );

        let layer = RateEuler::new("rate", DMatrix::zeros(2, 3), 0.1, 0.01).unwrap();
        let loaded = registry.load(&layer.to_dict().unwrap()).unwrap();
        assert_eq!(loaded.name(), "rate");
        assert_eq!(loaded.class_name(), "RateEuler");
        assert_eq!((*loaded).as_any().downcast_ref::<RateEuler>(), Some(&layer));
    }

    #[test]
    fn test_unknown_class() {
        let registry = LayerRegistry::empty();
        let layer = PassThrough::identity("id", 2, 0.1).unwrap();
        assert_eq!(
            registry.load(&layer.to_dict().unwrap()).unwrap_err(),
            NetworkError::UnknownLayerClass("PassThrough".to_string())
        );
        assert!(matches!(
            registry.load(&serde_json::json!({"name": "x"})),
            Err(NetworkError::UnknownLayerClass(_))
        ));
    }

    #[test]
    fn test_register_loader() {
        let mut registry = LayerRegistry::empty();
        registry.register_loader("Identity", |config| {
            let size = config["size"].as_u64().unwrap_or(1) as usize;
            Ok(Box::new(PassThrough::identity("identity", size, 0.1)?) as Box<dyn Layer>)
        });
        assert!(registry.contains("Identity"));
        let layer = registry
            .load(&serde_json::json!({"class_name": "Identity", "size": 4}))
            .unwrap();
        assert_eq!(layer.size(), 4);
    }
}
