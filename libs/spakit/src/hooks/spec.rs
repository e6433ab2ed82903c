//! Built-in hook specs and their argument types.

use std::sync::Arc;

use super::{HookSpec, HookType};
use crate::bus::{Message, MessageHandler, Unsubscribe};
use crate::contracts::{Module, ModuleFactory, Props};
use crate::kernel::{CoreError, StartOptions};

macro_rules! hook_spec {
    ($(#[$meta:meta])* $name:ident, $args:ty => $output:ty) => {
        $(#[$meta])*
        pub struct $name;

        impl HookSpec for $name {
            type Args = $args;
            type Output = $output;

            fn hook_type() -> HookType {
                HookType::$name
            }
        }
    };
}

hook_spec!(
    /// Deferred ready callback of `Core::init_with`.
    OnCoreInit, () => ()
);
hook_spec!(OnModuleAdd, ModuleAddArgs => Result<(), CoreError>);
hook_spec!(OnModuleStart, ModuleStartArgs => Result<(), CoreError>);
hook_spec!(OnModuleStop, ModuleStopArgs => ());
hook_spec!(OnModuleInit, ModuleInitArgs => anyhow::Result<()>);
hook_spec!(OnModuleDestroy, ModuleArgs => anyhow::Result<()>);
hook_spec!(OnModuleReceiveProps, ModuleInitArgs => anyhow::Result<()>);
hook_spec!(OnModuleSubscribe, ModuleArgs => Vec<String>);
hook_spec!(OnModuleReceiveMessage, ModuleMessageArgs => anyhow::Result<()>);
hook_spec!(OnMessageSubscribe, MessageSubscribeArgs => Result<Unsubscribe, CoreError>);
hook_spec!(OnMessagePublish, MessagePublishArgs => Result<(), CoreError>);

pub struct ModuleAddArgs {
    pub module_id: String,
    pub factory: ModuleFactory,
}

#[derive(Debug, Clone)]
pub struct ModuleStartArgs {
    pub module_id: String,
    pub options: StartOptions,
}

impl ModuleStartArgs {
    /// The targeted instance id; defaults to the module id.
    pub fn instance_id(&self) -> &str {
        self.options
            .instance_id
            .as_deref()
            .unwrap_or(&self.module_id)
    }
}

#[derive(Debug, Clone)]
pub struct ModuleStopArgs {
    pub module_id: String,
    pub instance_id: Option<String>,
}

impl ModuleStopArgs {
    pub fn instance_id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or(&self.module_id)
    }
}

/// A live module instance; its ids are available through its sandbox.
#[derive(Clone)]
pub struct ModuleArgs {
    pub instance: Arc<dyn Module>,
}

#[derive(Clone)]
pub struct ModuleInitArgs {
    pub instance: Arc<dyn Module>,
    pub props: Option<Props>,
}

#[derive(Clone)]
pub struct ModuleMessageArgs {
    pub instance: Arc<dyn Module>,
    pub message: Message,
}

pub struct MessageSubscribeArgs {
    pub message_type: String,
    pub handler: MessageHandler,
}

#[derive(Debug, Clone)]
pub struct MessagePublishArgs {
    pub message: Message,
}
