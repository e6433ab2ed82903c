//! Tracing around the core lifecycle.
//!
//! Wraps module add, start and stop in spans with their timings, logs when
//! the core becomes ready and, optionally, traces every publish.

use std::time::Instant;

use crate::contracts::Extension;
use crate::hooks::{OnCoreInit, OnMessagePublish, OnModuleAdd, OnModuleStart, OnModuleStop, PluginMap};
use crate::kernel::Core;

pub const LIFECYCLE_LOGGER_EXTENSION: &str = "lifecycle-logger";

/// Traces module add/start/stop and, optionally, every publish.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleLogger {
    messages: bool,
}

impl Default for LifecycleLogger {
    fn default() -> Self {
        Self { messages: true }
    }
}

impl LifecycleLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(mut self, enabled: bool) -> Self {
        self.messages = enabled;
        self
    }
}

impl Extension for LifecycleLogger {
    fn name(&self) -> &str {
        LIFECYCLE_LOGGER_EXTENSION
    }

    fn install(&self, _core: &Core) -> anyhow::Result<PluginMap> {
        let mut plugins = PluginMap::new()
            .on::<OnCoreInit, _>(|next, _| {
                next();
                tracing::info!("core ready");
            })
            .on::<OnModuleAdd, _>(|next, args| {
                let span = tracing::debug_span!("module_add", module = %args.module_id);
                let _enter = span.enter();
                let result = next();
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "module rejected");
                }
                result
            })
            .on::<OnModuleStart, _>(|next, args| {
                let span = tracing::info_span!(
                    "module_start",
                    module = %args.module_id,
                    instance = %args.instance_id()
                );
                let _enter = span.enter();
                let started = Instant::now();
                let result = next();
                let elapsed_us = started.elapsed().as_micros() as u64;
                match &result {
                    Ok(()) => tracing::debug!(elapsed_us, "start finished"),
                    Err(e) => tracing::warn!(error = %e, "start refused"),
                }
                result
            })
            .on::<OnModuleStop, _>(|next, args| {
                let span = tracing::info_span!(
                    "module_stop",
                    module = %args.module_id,
                    instance = %args.instance_id()
                );
                let _enter = span.enter();
                let started = Instant::now();
                next();
                let elapsed_us = started.elapsed().as_micros() as u64;
                tracing::debug!(elapsed_us, "stop finished");
            });

        if self.messages {
            plugins = plugins.on::<OnMessagePublish, _>(|next, args| {
                tracing::trace!(message_type = %args.message.message_type, "publish");
                next()
            });
        }
        Ok(plugins)
    }
}
