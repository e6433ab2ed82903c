//! Modules shipped with the host.

pub mod clock;
pub mod counter;

use serde::de::DeserializeOwned;
use spakit::{Core, CoreError, Props, Sandbox, ServiceError};
use spakit_bootstrap::{module_config, AppConfigProvider, CONFIG_SERVICE};

/// Register every bundled module under its id.
pub fn register_all(core: &Core) -> Result<(), CoreError> {
    core.add_module(clock::MODULE_ID, |sandbox| Ok(clock::Clock::new(sandbox)))?;
    core.add_module(counter::MODULE_ID, |sandbox| {
        Ok(counter::Counter::new(sandbox))
    })?;
    Ok(())
}

/// Settings for one instance: start props win, then the module's `config`
/// entry from the "config" service, then `T::default()`.
pub(crate) fn settings<T>(sandbox: &Sandbox, props: Option<&Props>) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if let Some(props) = props {
        return Ok(T::deserialize(props)?);
    }
    let provider = match sandbox.get_service_as::<AppConfigProvider>(CONFIG_SERVICE) {
        Ok(provider) => provider,
        Err(CoreError::Service(ServiceError::UnknownService(_))) => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    Ok(module_config(provider.as_ref(), sandbox.module_id())?.unwrap_or_default())
}
