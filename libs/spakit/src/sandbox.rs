//! Per-instance facade handed to module factories.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::{Message, Unsubscribe};
use crate::kernel::{Core, CoreError, StartOptions, WeakCore};
use crate::services::ServiceRef;

/// Narrow view of the Core for one `(module_id, instance_id)` pair.
///
/// Modules may start/stop modules, publish messages and look up services.
/// The back-reference to the Core is weak: a sandbox never keeps it alive.
#[derive(Clone)]
pub struct Sandbox {
    inner: Arc<SandboxInner>,
}

struct SandboxInner {
    core: WeakCore,
    module_id: String,
    instance_id: String,
    unsubscribers: Mutex<Vec<Unsubscribe>>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("module_id", &self.inner.module_id)
            .field("instance_id", &self.inner.instance_id)
            .field("subscriptions", &self.inner.unsubscribers.lock().len())
            .finish()
    }
}

impl Sandbox {
    pub(crate) fn new(core: WeakCore, module_id: &str, instance_id: &str) -> Self {
        Self {
            inner: Arc::new(SandboxInner {
                core,
                module_id: module_id.to_string(),
                instance_id: instance_id.to_string(),
                unsubscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.inner.module_id
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn start_module(&self, module_id: &str, options: StartOptions) -> Result<(), CoreError> {
        self.core()?.start_module(module_id, options)
    }

    pub fn stop_module(&self, module_id: &str, instance_id: Option<&str>) -> Result<(), CoreError> {
        self.core()?.stop_module(module_id, instance_id);
        Ok(())
    }

    pub fn publish_async(&self, message: Message) -> Result<(), CoreError> {
        self.core()?.publish_async(message)
    }

    pub fn get_service(&self, key: &str) -> Result<ServiceRef, CoreError> {
        Ok(self.core()?.services().get_service(key)?)
    }

    pub fn get_service_as<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, CoreError> {
        Ok(self.core()?.services().get::<T>(key)?)
    }

    /// Whether both handles point at the same sandbox.
    pub fn same_as(&self, other: &Sandbox) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- trusted-extension surface ----

    /// The full Core. Meant for extensions, not for module code.
    #[doc(hidden)]
    pub fn core(&self) -> Result<Core, CoreError> {
        self.inner.core.upgrade().ok_or(CoreError::CoreDropped)
    }

    /// Keep `unsubscribe` until [`release_subscriptions`](Self::release_subscriptions).
    #[doc(hidden)]
    pub fn track_subscription(&self, unsubscribe: Unsubscribe) {
        self.inner.unsubscribers.lock().push(unsubscribe);
    }

    /// Cancel and forget every tracked subscription. Returns how many were live.
    #[doc(hidden)]
    pub fn release_subscriptions(&self) -> usize {
        let drained: Vec<Unsubscribe> = std::mem::take(&mut *self.inner.unsubscribers.lock());
        drained.iter().filter(|u| u.unsubscribe()).count()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.unsubscribers.lock().len()
    }
}
