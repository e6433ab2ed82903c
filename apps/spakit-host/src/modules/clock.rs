use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use spakit::{Message, Module, Props, Sandbox};
use tokio_util::sync::CancellationToken;

use super::settings;

pub const MODULE_ID: &str = "clock";
pub const TICK: &str = "clock.tick";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClockConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

/// Publishes `clock.tick` with a running sequence number every interval.
pub struct Clock {
    sandbox: Sandbox,
    ticker: Mutex<Option<CancellationToken>>,
}

impl Clock {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            ticker: Mutex::new(None),
        }
    }
}

impl Module for Clock {
    fn init(&self, props: Option<&Props>) -> anyhow::Result<()> {
        let cfg: ClockConfig = settings(&self.sandbox, props)?;
        if cfg.interval_ms == 0 {
            anyhow::bail!("clock interval must be positive");
        }
        let runtime =
            tokio::runtime::Handle::try_current().context("clock needs a tokio runtime")?;

        let cancel = CancellationToken::new();
        runtime.spawn(tick_loop(
            self.sandbox.clone(),
            Duration::from_millis(cfg.interval_ms),
            cancel.clone(),
        ));
        if let Some(previous) = self.ticker.lock().replace(cancel) {
            previous.cancel();
        }
        tracing::info!(
            instance = self.sandbox.instance_id(),
            interval_ms = cfg.interval_ms,
            "clock started"
        );
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.ticker.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }

    fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }
}

async fn tick_loop(sandbox: Sandbox, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                seq += 1;
                let tick = Message::new(TICK).with_payload(json!({
                    "source": sandbox.instance_id(),
                    "seq": seq,
                }));
                if let Err(e) = sandbox.publish_async(tick) {
                    tracing::debug!(error = %e, "clock stopped publishing");
                    break;
                }
            }
        }
    }
    tracing::debug!(instance = sandbox.instance_id(), ticks = seq, "clock loop finished");
}
