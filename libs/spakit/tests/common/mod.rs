//! Shared test module that records what the Core does to it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spakit::{
    Message, MessageReceiver, Module, Props, PropsReceiver, Sandbox, SubscribingModule,
};

#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// How a [`Recorder`] behaves. Cloned into every instance the factory builds.
#[derive(Clone, Default)]
pub struct RecorderSpec {
    pub fail_init: bool,
    pub fail_destroy: Arc<AtomicBool>,
    pub subscribes: Option<Vec<String>>,
    pub receives: bool,
    pub takes_props: bool,
}

impl RecorderSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_destroy(self) -> Self {
        self.fail_destroy.store(true, Ordering::SeqCst);
        self
    }

    pub fn subscribing(mut self, types: &[&str]) -> Self {
        self.subscribes = Some(types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn receiving(mut self) -> Self {
        self.receives = true;
        self
    }

    pub fn with_props(mut self) -> Self {
        self.takes_props = true;
        self
    }

    pub fn factory(self, log: &Log) -> impl Fn(Sandbox) -> anyhow::Result<Recorder> + Send + Sync + 'static {
        let log = log.clone();
        move |sandbox: Sandbox| {
            log.push(format!("build:{}", sandbox.instance_id()));
            Ok(Recorder {
                sandbox,
                log: log.clone(),
                spec: self.clone(),
            })
        }
    }
}

pub struct Recorder {
    sandbox: Sandbox,
    log: Log,
    spec: RecorderSpec,
}

fn render(props: Option<&Props>) -> String {
    props.map_or_else(|| "-".to_string(), |p| p.to_string())
}

impl Module for Recorder {
    fn init(&self, props: Option<&Props>) -> anyhow::Result<()> {
        self.log
            .push(format!("init:{}:{}", self.sandbox.instance_id(), render(props)));
        if self.spec.fail_init {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        self.log.push(format!("destroy:{}", self.sandbox.instance_id()));
        if self.spec.fail_destroy.load(Ordering::SeqCst) {
            anyhow::bail!("destroy refused");
        }
        Ok(())
    }

    fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    fn as_subscriber(&self) -> Option<&dyn SubscribingModule> {
        self.spec.subscribes.as_ref().map(|_| self as &dyn SubscribingModule)
    }

    fn as_message_receiver(&self) -> Option<&dyn MessageReceiver> {
        self.spec.receives.then_some(self as &dyn MessageReceiver)
    }

    fn as_props_receiver(&self) -> Option<&dyn PropsReceiver> {
        self.spec.takes_props.then_some(self as &dyn PropsReceiver)
    }
}

impl SubscribingModule for Recorder {
    fn module_will_subscribe(&self) -> Vec<String> {
        self.spec.subscribes.clone().unwrap_or_default()
    }
}

impl MessageReceiver for Recorder {
    fn module_did_receive_message(&self, message: &Message) -> anyhow::Result<()> {
        self.log.push(format!(
            "msg:{}:{}",
            self.sandbox.instance_id(),
            message.message_type
        ));
        Ok(())
    }
}

impl PropsReceiver for Recorder {
    fn module_did_receive_props(&self, props: Option<&Props>) -> anyhow::Result<()> {
        self.log
            .push(format!("props:{}:{}", self.sandbox.instance_id(), render(props)));
        Ok(())
    }
}

/// Let spawned deliveries run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
