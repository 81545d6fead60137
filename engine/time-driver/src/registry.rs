//! Hardware model registry: maps a configured model type to its constructor

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::bus::BusConnector;
use crate::config::DriverConfig;
use crate::console::ConsoleSink;
use crate::error::{DriverError, RegistryError};
use crate::scheduler::{ClockHandle, ControlInbox};

/// A simulated component that can be built from configuration and run until shutdown
#[async_trait]
pub trait HardwareModel: Send {
    fn name(&self) -> &str;

    async fn run(self: Box<Self>, shutdown: oneshot::Receiver<()>) -> Result<(), DriverError>;
}

/// What a model needs from the process that hosts it
pub struct ModelContext {
    pub connector: Arc<dyn BusConnector>,
    /// Handle for components the model serves, such as the remote command channel
    pub handle: ClockHandle,
    pub inbox: ControlInbox,
    pub console: Option<Box<dyn ConsoleSink>>,
}

pub type ModelConstructor = fn(&DriverConfig, ModelContext) -> Result<Box<dyn HardwareModel>, DriverError>;

/// Model type name to constructor
#[derive(Default)]
pub struct ModelRegistry {
    constructors: BTreeMap<String, ModelConstructor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the time driver model registered
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.constructors.insert(crate::TIME_DRIVER_MODEL.to_string(), crate::driver::construct);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: ModelConstructor) -> Result<(), RegistryError> {
        if self.constructors.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.constructors.insert(name.to_string(), constructor);
        Ok(())
    }

    /// Build the model named by `config.simulator.hardware_model.model_type`
    pub fn build(
        &self,
        config: &DriverConfig,
        context: ModelContext,
    ) -> Result<Box<dyn HardwareModel>, DriverError> {
        let model_type = config.simulator.hardware_model.model_type.as_str();
        let constructor = self
            .constructors
            .get(model_type)
            .ok_or_else(|| RegistryError::Unknown(model_type.to_string()))?;
        debug!(model = model_type, simulator = %config.simulator.name, "Building hardware model");
        constructor(config, context)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::MemoryConnector;

    struct IdleModel;

    #[async_trait]
    impl HardwareModel for IdleModel {
        fn name(&self) -> &str {
            "Idle"
        }

        async fn run(self: Box<Self>, shutdown: oneshot::Receiver<()>) -> Result<(), DriverError> {
            let _ = shutdown.await;
            Ok(())
        }
    }

    fn idle(_config: &DriverConfig, _context: ModelContext) -> Result<Box<dyn HardwareModel>, DriverError> {
        Ok(Box::new(IdleModel))
    }

    fn context() -> ModelContext {
        let (handle, inbox) = ClockHandle::channel();
        ModelContext { connector: Arc::new(MemoryConnector::default()), handle, inbox, console: None }
    }

    #[test]
    fn test_builtin_registry_builds_time_driver() {
        let registry = ModelRegistry::with_builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![crate::TIME_DRIVER_MODEL]);

        let model = registry.build(&DriverConfig::default(), context()).unwrap();
        assert_eq!(model.name(), "time");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ModelRegistry::with_builtin();
        assert!(registry.register("Idle", idle).is_ok());
        assert!(matches!(registry.register("Idle", idle), Err(RegistryError::Duplicate(name)) if name == "Idle"));
        assert!(matches!(
            registry.register(crate::TIME_DRIVER_MODEL, idle),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn test_unknown_model_fails() {
        let registry = ModelRegistry::with_builtin();
        let mut config = DriverConfig::default();
        config.simulator.hardware_model.model_type = "Reaction Wheel".to_string();
        let result = registry.build(&config, context());
        assert!(matches!(result, Err(DriverError::Registry(RegistryError::Unknown(name))) if name == "Reaction Wheel"));
    }

    #[tokio::test]
    async fn test_registered_model_runs_until_shutdown() {
        let mut registry = ModelRegistry::new();
        registry.register("Idle", idle).unwrap();
        let mut config = DriverConfig::default();
        config.simulator.hardware_model.model_type = "Idle".to_string();

        let model = registry.build(&config, context()).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(model.run(stop_rx));
        stop_tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
