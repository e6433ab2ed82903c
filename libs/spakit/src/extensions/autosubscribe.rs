//! Subscribes modules to the message types they declare.
//!
//! After a module's `init` succeeds, its `module_will_subscribe` list is
//! read through `OnModuleSubscribe` and each type is routed to
//! `module_did_receive_message` through `OnModuleReceiveMessage`. The
//! unsubscribe handles live on the module's sandbox and are released before
//! its `destroy` runs.

use std::sync::Arc;

use crate::bus::Message;
use crate::contracts::{Extension, Module};
use crate::hooks::{
    Hook, ModuleArgs, ModuleMessageArgs, OnModuleDestroy, OnModuleInit, OnModuleReceiveMessage,
    OnModuleSubscribe, PluginMap,
};
use crate::kernel::{Core, CoreError};

pub const AUTOSUBSCRIBE_EXTENSION: &str = "module-autosubscribe";

#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleAutoSubscribe;

impl ModuleAutoSubscribe {
    pub fn new() -> Self {
        Self
    }
}

impl Extension for ModuleAutoSubscribe {
    fn name(&self) -> &str {
        AUTOSUBSCRIBE_EXTENSION
    }

    fn install(&self, core: &Core) -> anyhow::Result<PluginMap> {
        let subscribe = core.create_hook::<OnModuleSubscribe, _>(|args: &ModuleArgs| {
            args.instance
                .as_subscriber()
                .map(|s| s.module_will_subscribe())
                .unwrap_or_default()
        })?;
        let receive =
            core.create_hook::<OnModuleReceiveMessage, _>(|args: &ModuleMessageArgs| {
                match args.instance.as_message_receiver() {
                    Some(receiver) => receiver.module_did_receive_message(&args.message),
                    None => Ok(()),
                }
            })?;

        // plugins live in the registry the hooks point to
        let (subscribe, receive) = (subscribe.downgrade(), receive.downgrade());
        Ok(PluginMap::new()
            .on::<OnModuleInit, _>(move |next, args| {
                next()?;
                let (Some(subscribe), Some(receive)) = (subscribe.upgrade(), receive.upgrade())
                else {
                    return Ok(());
                };
                subscribe_instance(&subscribe, &receive, &args.instance)
            })
            .on::<OnModuleDestroy, _>(|next, args| {
                let sandbox = args.instance.sandbox();
                let released = sandbox.release_subscriptions();
                if released > 0 {
                    tracing::debug!(
                        module = sandbox.module_id(),
                        instance = sandbox.instance_id(),
                        released,
                        "auto-subscriptions released"
                    );
                }
                next()
            }))
    }
}

fn subscribe_instance(
    subscribe: &Hook<OnModuleSubscribe>,
    receive: &Hook<OnModuleReceiveMessage>,
    instance: &Arc<dyn Module>,
) -> anyhow::Result<()> {
    if instance.as_subscriber().is_none() {
        return Ok(());
    }
    let message_types = subscribe.call(ModuleArgs {
        instance: instance.clone(),
    });
    if message_types.is_empty() {
        return Ok(());
    }

    let sandbox = instance.sandbox();
    if instance.as_message_receiver().is_none() {
        return Err(CoreError::MissingMessageReceiver {
            module_id: sandbox.module_id().to_string(),
            instance_id: sandbox.instance_id().to_string(),
        }
        .into());
    }

    let core = sandbox.core()?;
    for message_type in &message_types {
        let receive = receive.downgrade();
        let target = Arc::downgrade(instance);
        let subscribed = core.on_message(message_type, move |message: &Message| {
            let (Some(instance), Some(receive)) = (target.upgrade(), receive.upgrade()) else {
                return Ok(());
            };
            receive.call(ModuleMessageArgs {
                instance,
                message: message.clone(),
            })
        });
        match subscribed {
            Ok(unsubscribe) => sandbox.track_subscription(unsubscribe),
            Err(e) => {
                sandbox.release_subscriptions();
                return Err(e.into());
            }
        }
    }

    tracing::debug!(
        module = sandbox.module_id(),
        instance = sandbox.instance_id(),
        types = ?message_types,
        "auto-subscribed"
    );
    Ok(())
}
