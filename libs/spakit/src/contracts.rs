//! Module and extension contracts.
//!
//! A module is built by a factory that receives its [`Sandbox`]; optional
//! capabilities are discovered through the `as_*` accessors rather than by
//! probing for methods at runtime.

use std::sync::Arc;

use crate::bus::Message;
use crate::hooks::PluginMap;
use crate::kernel::Core;
use crate::sandbox::Sandbox;

/// Properties handed to a module on start and on props updates.
pub type Props = serde_json::Value;

/// Type-erased module factory stored in a registration record.
pub type ModuleFactory = Arc<dyn Fn(Sandbox) -> anyhow::Result<Arc<dyn Module>> + Send + Sync>;

/// A unit of application behavior with an init/destroy lifecycle.
pub trait Module: Send + Sync + 'static {
    fn init(&self, props: Option<&Props>) -> anyhow::Result<()>;

    fn destroy(&self) -> anyhow::Result<()>;

    /// The sandbox the factory received. Core rejects instances that
    /// return any other sandbox.
    fn sandbox(&self) -> &Sandbox;

    /// Return self as a [`SubscribingModule`] if this module declares bus subscriptions.
    fn as_subscriber(&self) -> Option<&dyn SubscribingModule> {
        None
    }

    /// Return self as a [`MessageReceiver`] if this module accepts bus messages.
    fn as_message_receiver(&self) -> Option<&dyn MessageReceiver> {
        None
    }

    /// Return self as a [`PropsReceiver`] if this module reacts to props updates.
    fn as_props_receiver(&self) -> Option<&dyn PropsReceiver> {
        None
    }
}

/// Declares message types a module wants delivered once it is initialized.
pub trait SubscribingModule: Send + Sync {
    fn module_will_subscribe(&self) -> Vec<String>;
}

pub trait MessageReceiver: Send + Sync {
    fn module_did_receive_message(&self, message: &Message) -> anyhow::Result<()>;
}

/// Invoked when `start_module` targets an instance that is already running.
pub trait PropsReceiver: Send + Sync {
    fn module_did_receive_props(&self, props: Option<&Props>) -> anyhow::Result<()>;
}

/// A named bundle of plugins installed into the Core during `init`.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Called exactly once, synchronously, from `Core::init`.
    fn install(&self, core: &Core) -> anyhow::Result<PluginMap>;
}
