use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::json;
use spakit::{
    Message, MessageReceiver, Module, Props, PropsReceiver, Sandbox, SubscribingModule,
};

use super::{clock, settings};

pub const MODULE_ID: &str = "counter";
pub const CHANGED: &str = "counter.changed";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterConfig {
    #[serde(default = "default_step")]
    pub step: u64,
}

fn default_step() -> u64 {
    1
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
        }
    }
}

/// Adds `step` for every clock tick and announces the new total.
pub struct Counter {
    sandbox: Sandbox,
    step: AtomicU64,
    total: AtomicU64,
}

impl Counter {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            step: AtomicU64::new(default_step()),
            total: AtomicU64::new(0),
        }
    }

    fn apply(&self, props: Option<&Props>) -> anyhow::Result<()> {
        let cfg: CounterConfig = settings(&self.sandbox, props)?;
        self.step.store(cfg.step, Ordering::Relaxed);
        Ok(())
    }
}

impl Module for Counter {
    fn init(&self, props: Option<&Props>) -> anyhow::Result<()> {
        self.apply(props)
    }

    fn destroy(&self) -> anyhow::Result<()> {
        tracing::info!(
            instance = self.sandbox.instance_id(),
            total = self.total.load(Ordering::Relaxed),
            "counter stopped"
        );
        Ok(())
    }

    fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    fn as_subscriber(&self) -> Option<&dyn SubscribingModule> {
        Some(self)
    }

    fn as_message_receiver(&self) -> Option<&dyn MessageReceiver> {
        Some(self)
    }

    fn as_props_receiver(&self) -> Option<&dyn PropsReceiver> {
        Some(self)
    }
}

impl SubscribingModule for Counter {
    fn module_will_subscribe(&self) -> Vec<String> {
        vec![clock::TICK.to_string()]
    }
}

impl MessageReceiver for Counter {
    fn module_did_receive_message(&self, _message: &Message) -> anyhow::Result<()> {
        let step = self.step.load(Ordering::Relaxed);
        let total = self.total.fetch_add(step, Ordering::Relaxed) + step;
        self.sandbox.publish_async(Message::new(CHANGED).with_payload(json!({
            "instance": self.sandbox.instance_id(),
            "total": total,
        })))?;
        Ok(())
    }
}

impl PropsReceiver for Counter {
    fn module_did_receive_props(&self, props: Option<&Props>) -> anyhow::Result<()> {
        self.apply(props)?;
        tracing::debug!(
            instance = self.sandbox.instance_id(),
            step = self.step.load(Ordering::Relaxed),
            "counter step updated"
        );
        Ok(())
    }
}
