use crate::config::AppConfig;
use serde::de::DeserializeOwned;
use spakit::{ServiceError, ServiceLocator};
use std::sync::Arc;

/// Service key under which [`register_config_service`] publishes the provider.
pub const CONFIG_SERVICE: &str = "config";

/// Configuration provider trait for modules
pub trait ConfigProvider: Send + Sync {
    /// The `config` value of a module's entry, if the entry has one.
    fn get_module_config(&self, module_id: &str) -> Option<serde_json::Value>;

    /// Get a top-level section ("core", "logging") as JSON.
    fn get_config_raw(&self, key: &str) -> Option<serde_json::Value>;
}

/// Typed read of a module's `config` value.
pub fn module_config<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    module_id: &str,
) -> anyhow::Result<Option<T>> {
    provider
        .get_module_config(module_id)
        .map(|raw| {
            serde_json::from_value(raw)
                .map_err(|e| anyhow::anyhow!("invalid config for module '{module_id}': {e}"))
        })
        .transpose()
}

/// [`ConfigProvider`] over the loaded [`AppConfig`].
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_module_config(&self, module_id: &str) -> Option<serde_json::Value> {
        let entry = self.0.module_entry(module_id).ok()??;
        (!entry.config.is_null()).then_some(entry.config)
    }

    fn get_config_raw(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "core" => serde_json::to_value(&self.0.core).ok(),
            "logging" => self
                .0
                .logging
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
            _ => None,
        }
    }
}

/// Publish the configuration as the `"config"` service.
///
/// Modules read it through their sandbox:
/// `sandbox.get_service_as::<AppConfigProvider>("config")`.
pub fn register_config_service(
    services: &ServiceLocator,
    config: Arc<AppConfig>,
) -> Result<(), ServiceError> {
    services.add_service(CONFIG_SERVICE, move |_| {
        Ok(AppConfigProvider::from_arc(config.clone()))
    })
}
