//! The mediator: module registrations, running instances, extensions.
//!
//! Until [`Core::init`] runs, public operations call their implementation
//! directly. `init` wraps each of them into a hook once; from then on every
//! call goes through the plugin chain registered for its [`HookType`](crate::hooks::HookType).

mod document;
mod error;
mod table;

pub use document::{HostDocument, ReadyState};
pub use error::CoreError;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::bus::{Message, MessageBus, MessageHandler, Unsubscribe};
use crate::contracts::{Extension, Module, ModuleFactory, Props};
use crate::hooks::{
    Hook, HookSpec, HooksSystem, MessagePublishArgs, MessageSubscribeArgs, ModuleAddArgs,
    ModuleArgs, ModuleInitArgs, ModuleStartArgs, ModuleStopArgs, OnCoreInit, OnMessagePublish,
    OnMessageSubscribe, OnModuleAdd, OnModuleDestroy, OnModuleInit, OnModuleReceiveProps,
    OnModuleStart, OnModuleStop,
};
use crate::sandbox::Sandbox;
use crate::services::ServiceLocator;
use table::{ModuleTable, StartPlan, StopPlan};

/// Options for [`Core::start_module`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// Defaults to the module id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Props>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = Some(props);
        self
    }
}

/// Cheap, cloneable handle to a micro-kernel instance.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

/// Non-owning handle held by sandboxes and hook methods.
#[derive(Clone, Default)]
pub struct WeakCore(Weak<CoreInner>);

impl WeakCore {
    pub fn upgrade(&self) -> Option<Core> {
        self.0.upgrade().map(|inner| Core { inner })
    }
}

impl std::fmt::Debug for WeakCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakCore")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

struct CoreInner {
    version: String,
    hooks: HooksSystem,
    bus: MessageBus,
    services: Arc<ServiceLocator>,
    document: HostDocument,
    state: Mutex<CoreState>,
    wired: OnceLock<CoreHooks>,
    ready_tx: watch::Sender<ReadySignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadySignal {
    Pending,
    Fired,
    Aborted,
}

#[derive(Default)]
struct CoreState {
    initialized: bool,
    extensions: Vec<Arc<dyn Extension>>,
    modules: ModuleTable,
}

/// Hooks installed by `init`.
struct CoreHooks {
    core_init: Hook<OnCoreInit>,
    add: Hook<OnModuleAdd>,
    start: Hook<OnModuleStart>,
    stop: Hook<OnModuleStop>,
    subscribe: Hook<OnMessageSubscribe>,
    publish: Hook<OnMessagePublish>,
    module_init: Hook<OnModuleInit>,
    module_destroy: Hook<OnModuleDestroy>,
    receive_props: Hook<OnModuleReceiveProps>,
}

#[derive(Default)]
pub struct CoreBuilder {
    version: Option<String>,
    hooks: Option<HooksSystem>,
    bus: Option<MessageBus>,
    services: Option<Arc<ServiceLocator>>,
    document: Option<HostDocument>,
}

impl CoreBuilder {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_hooks(mut self, hooks: HooksSystem) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_services(mut self, services: Arc<ServiceLocator>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_document(mut self, document: HostDocument) -> Self {
        self.document = Some(document);
        self
    }

    pub fn build(self) -> Core {
        Core {
            inner: Arc::new(CoreInner {
                version: self
                    .version
                    .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
                hooks: self.hooks.unwrap_or_default(),
                bus: self.bus.unwrap_or_default(),
                services: self.services.unwrap_or_default(),
                document: self.document.unwrap_or_default(),
                state: Mutex::new(CoreState::default()),
                wired: OnceLock::new(),
                ready_tx: watch::Sender::new(ReadySignal::Pending),
            }),
        }
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let extensions: Vec<&str> = state.extensions.iter().map(|e| e.name()).collect();
        f.debug_struct("Core")
            .field("version", &self.inner.version)
            .field("initialized", &state.initialized)
            .field("extensions", &extensions)
            .field("modules", &state.modules)
            .finish()
    }
}

impl Core {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CoreBuilder {
        CoreBuilder::default()
    }

    pub fn downgrade(&self) -> WeakCore {
        WeakCore(Arc::downgrade(&self.inner))
    }

    // ---- extensions & hooks ----

    /// Record extensions to install during `init`. The whole batch is
    /// rejected if any name is empty or already taken.
    pub fn use_extensions<I>(&self, extensions: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = Arc<dyn Extension>>,
    {
        let batch: Vec<Arc<dyn Extension>> = extensions.into_iter().collect();
        let mut state = self.inner.state.lock();
        if state.initialized {
            return Err(CoreError::AlreadyInitialized);
        }
        let mut names: HashSet<String> = state
            .extensions
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        for extension in &batch {
            let name = extension.name();
            if name.trim().is_empty() {
                return Err(CoreError::InvalidExtensionName);
            }
            if !names.insert(name.to_string()) {
                return Err(CoreError::DuplicateExtension(name.to_string()));
            }
        }
        for extension in &batch {
            tracing::debug!(extension = extension.name(), "extension registered");
        }
        state.extensions.extend(batch);
        Ok(())
    }

    pub fn create_hook<H, F>(&self, method: F) -> Result<Hook<H>, CoreError>
    where
        H: HookSpec,
        F: Fn(&H::Args) -> H::Output + Send + Sync + 'static,
    {
        Ok(self.inner.hooks.create_hook::<H, F>(method)?)
    }

    // ---- init ----

    pub fn init(&self) -> Result<(), CoreError> {
        self.init_with(|| {})
    }

    /// Initialize once. `on_init` becomes the method of the `OnCoreInit`
    /// hook and runs after the document is ready, never synchronously.
    ///
    /// A failed init is final: the core stays initialized, modules cannot be
    /// started usefully and [`Core::ready`] resolves with
    /// [`CoreError::InitAborted`].
    pub fn init_with<F>(&self, on_init: F) -> Result<(), CoreError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        let extensions = {
            let mut state = self.inner.state.lock();
            if state.initialized {
                return Err(CoreError::AlreadyInitialized);
            }
            state.initialized = true;
            state.extensions.clone()
        };

        if let Err(e) = self.install_extensions(on_init, &extensions) {
            self.inner.ready_tx.send_replace(ReadySignal::Aborted);
            tracing::error!(error = %e, code = e.code(), "core init aborted");
            return Err(e);
        }

        self.schedule_ready(&runtime);
        tracing::info!(
            version = %self.inner.version,
            extensions = extensions.len(),
            "core initialized"
        );
        Ok(())
    }

    /// Wire the core hooks, then let every extension plug into them in order.
    fn install_extensions<F>(
        &self,
        on_init: F,
        extensions: &[Arc<dyn Extension>],
    ) -> Result<(), CoreError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hooks = self.wire(on_init)?;
        if self.inner.wired.set(hooks).is_err() {
            return Err(CoreError::AlreadyInitialized);
        }

        for extension in extensions {
            let plugins = extension
                .install(self)
                .map_err(|source| CoreError::ExtensionInstall {
                    name: extension.name().to_string(),
                    source,
                })?;
            tracing::debug!(
                extension = extension.name(),
                plugins = plugins.len(),
                "extension installed"
            );
            self.inner.hooks.merge(plugins)?;
        }
        Ok(())
    }

    /// Resolves once the `OnCoreInit` chain has run, or with
    /// [`CoreError::InitAborted`] if init failed.
    pub async fn ready(&self) -> Result<(), CoreError> {
        let mut ready = self.inner.ready_tx.subscribe();
        let signal = ready
            .wait_for(|signal| *signal != ReadySignal::Pending)
            .await
            .map(|signal| *signal)
            .map_err(|_| CoreError::CoreDropped)?;
        match signal {
            ReadySignal::Aborted => Err(CoreError::InitAborted),
            _ => Ok(()),
        }
    }

    fn wire<F>(&self, on_init: F) -> Result<CoreHooks, CoreError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hooks = &self.inner.hooks;
        Ok(CoreHooks {
            core_init: hooks.create_hook::<OnCoreInit, _>(move |_: &()| on_init())?,
            add: self.bind::<OnModuleAdd>(Core::add_module_raw, || Err(CoreError::CoreDropped))?,
            start: self
                .bind::<OnModuleStart>(Core::start_module_raw, || Err(CoreError::CoreDropped))?,
            stop: self.bind::<OnModuleStop>(Core::stop_module_raw, || {})?,
            subscribe: self
                .bind::<OnMessageSubscribe>(Core::on_message_raw, || Err(CoreError::CoreDropped))?,
            publish: self
                .bind::<OnMessagePublish>(Core::publish_raw, || Err(CoreError::CoreDropped))?,
            module_init: hooks.create_hook::<OnModuleInit, _>(|args: &ModuleInitArgs| {
                args.instance.init(args.props.as_ref())
            })?,
            module_destroy: hooks
                .create_hook::<OnModuleDestroy, _>(|args: &ModuleArgs| args.instance.destroy())?,
            receive_props: hooks.create_hook::<OnModuleReceiveProps, _>(
                |args: &ModuleInitArgs| match args.instance.as_props_receiver() {
                    Some(receiver) => receiver.module_did_receive_props(args.props.as_ref()),
                    None => Ok(()),
                },
            )?,
        })
    }

    /// Hook whose method calls `op` on this core, or `dropped` once it is gone.
    fn bind<H: HookSpec>(
        &self,
        op: fn(&Core, &H::Args) -> H::Output,
        dropped: fn() -> H::Output,
    ) -> Result<Hook<H>, CoreError> {
        let core = self.downgrade();
        Ok(self
            .inner
            .hooks
            .create_hook::<H, _>(move |args: &H::Args| match core.upgrade() {
                Some(core) => op(&core, args),
                None => dropped(),
            })?)
    }

    fn schedule_ready(&self, runtime: &tokio::runtime::Handle) {
        let core = self.downgrade();
        let mut ready_state = self.inner.document.subscribe();
        let current = *ready_state.borrow_and_update();
        if current.is_ready() {
            runtime.spawn(async move { fire_ready(&core) });
            return;
        }

        tracing::debug!(ready_state = %current, "document not ready, listening");
        runtime.spawn(async move {
            let became_ready = ready_state.wait_for(|s| s.is_ready()).await.is_ok();
            drop(ready_state);
            tracing::debug!("ready listener removed");
            if became_ready {
                fire_ready(&core);
            }
        });
    }

    // ---- modules ----

    pub fn add_module<M, F>(&self, id: &str, factory: F) -> Result<(), CoreError>
    where
        M: Module,
        F: Fn(Sandbox) -> anyhow::Result<M> + Send + Sync + 'static,
    {
        let factory: ModuleFactory = Arc::new(move |sandbox: Sandbox| {
            factory(sandbox).map(|module| Arc::new(module) as Arc<dyn Module>)
        });
        self.add_module_factory(id, factory)
    }

    pub fn add_module_factory(&self, id: &str, factory: ModuleFactory) -> Result<(), CoreError> {
        let args = ModuleAddArgs {
            module_id: id.to_string(),
            factory,
        };
        match self.inner.wired.get() {
            Some(hooks) => hooks.add.call(args),
            None => self.add_module_raw(&args),
        }
    }

    fn add_module_raw(&self, args: &ModuleAddArgs) -> Result<(), CoreError> {
        self.inner
            .state
            .lock()
            .modules
            .register(&args.module_id, args.factory.clone())?;
        tracing::debug!(module = %args.module_id, "module registered");
        Ok(())
    }

    /// Start an instance, or hand new props to it if it is already running.
    ///
    /// Factory and `init` failures are logged and leave nothing running;
    /// they are not returned as errors.
    pub fn start_module(&self, id: &str, options: StartOptions) -> Result<(), CoreError> {
        let args = ModuleStartArgs {
            module_id: id.to_string(),
            options,
        };
        match self.inner.wired.get() {
            Some(hooks) => hooks.start.call(args),
            None => Err(CoreError::NotInitialized {
                module_id: id.to_string(),
            }),
        }
    }

    fn start_module_raw(&self, args: &ModuleStartArgs) -> Result<(), CoreError> {
        let module_id = args.module_id.as_str();
        let instance_id = args.instance_id();
        let hooks = self.wired(module_id)?;

        let plan = self
            .inner
            .state
            .lock()
            .modules
            .begin_start(module_id, instance_id)?;
        let factory = match plan {
            StartPlan::Build(factory) => factory,
            StartPlan::Running(instance) => {
                self.update_props(hooks, module_id, instance_id, instance, &args.options);
                return Ok(());
            }
            StartPlan::Busy(slot) => {
                tracing::warn!(
                    module = module_id,
                    instance = instance_id,
                    slot,
                    "instance is busy, start ignored"
                );
                return Ok(());
            }
        };

        let sandbox = Sandbox::new(self.downgrade(), module_id, instance_id);
        let instance = match factory(sandbox.clone()) {
            Ok(instance) if instance.sandbox().same_as(&sandbox) => instance,
            Ok(_) => {
                self.inner
                    .state
                    .lock()
                    .modules
                    .abort_start(module_id, instance_id);
                tracing::error!(
                    module = module_id,
                    instance = instance_id,
                    "factory returned a module bound to a different sandbox"
                );
                return Ok(());
            }
            Err(e) => {
                self.inner
                    .state
                    .lock()
                    .modules
                    .abort_start(module_id, instance_id);
                tracing::error!(
                    module = module_id,
                    instance = instance_id,
                    error = %e,
                    "module factory failed"
                );
                return Ok(());
            }
        };

        let init = hooks.module_init.call(ModuleInitArgs {
            instance: instance.clone(),
            props: args.options.props.clone(),
        });
        match init {
            Ok(()) => {
                self.inner
                    .state
                    .lock()
                    .modules
                    .finish_start(module_id, instance_id, instance);
                tracing::info!(module = module_id, instance = instance_id, "module started");
            }
            Err(e) => {
                self.inner
                    .state
                    .lock()
                    .modules
                    .abort_start(module_id, instance_id);
                tracing::error!(
                    module = module_id,
                    instance = instance_id,
                    error = %e,
                    "\"{module_id}\" init failed"
                );
            }
        }
        Ok(())
    }

    fn update_props(
        &self,
        hooks: &CoreHooks,
        module_id: &str,
        instance_id: &str,
        instance: Arc<dyn Module>,
        options: &StartOptions,
    ) {
        if instance.as_props_receiver().is_none() {
            tracing::debug!(module = module_id, instance = instance_id, "already running");
            return;
        }
        let result = hooks.receive_props.call(ModuleInitArgs {
            instance,
            props: options.props.clone(),
        });
        if let Err(e) = result {
            tracing::error!(
                module = module_id,
                instance = instance_id,
                error = %e,
                "\"{module_id}\" props update failed"
            );
        }
    }

    /// Stop one instance. Unknown modules and idle instances only warn.
    pub fn stop_module(&self, id: &str, instance_id: Option<&str>) {
        let args = ModuleStopArgs {
            module_id: id.to_string(),
            instance_id: instance_id.map(str::to_string),
        };
        match self.inner.wired.get() {
            Some(hooks) => hooks.stop.call(args),
            None => self.stop_module_raw(&args),
        }
    }

    fn stop_module_raw(&self, args: &ModuleStopArgs) {
        let module_id = args.module_id.as_str();
        let instance_id = args.instance_id();

        let plan = self
            .inner
            .state
            .lock()
            .modules
            .begin_stop(module_id, instance_id);
        let instance = match plan {
            StopPlan::Destroy(instance) => instance,
            StopPlan::UnknownModule => {
                tracing::warn!(module = module_id, "cannot stop unknown module");
                return;
            }
            StopPlan::NotRunning => {
                tracing::warn!(
                    module = module_id,
                    instance = instance_id,
                    "instance is not running"
                );
                return;
            }
            StopPlan::Busy(slot) => {
                tracing::warn!(
                    module = module_id,
                    instance = instance_id,
                    slot,
                    "instance is busy, stop ignored"
                );
                return;
            }
        };

        let destroyed = match self.inner.wired.get() {
            Some(hooks) => hooks.module_destroy.call(ModuleArgs { instance }),
            None => instance.destroy(),
        };
        match destroyed {
            Ok(()) => {
                self.inner.state.lock().modules.finish_stop(module_id, instance_id);
                tracing::info!(module = module_id, instance = instance_id, "module stopped");
            }
            Err(e) => {
                self.inner.state.lock().modules.abort_stop(module_id, instance_id);
                tracing::error!(
                    module = module_id,
                    instance = instance_id,
                    error = %e,
                    "\"{module_id}\" destroy failed"
                );
            }
        }
    }

    /// Stop every running instance, most recently registered module first.
    pub fn stop_all_modules(&self) {
        let pairs = self.inner.state.lock().modules.running_pairs_rev();
        for (module_id, instance_id) in pairs {
            self.stop_module(&module_id, Some(&instance_id));
        }
    }

    fn wired(&self, module_id: &str) -> Result<&CoreHooks, CoreError> {
        self.inner
            .wired
            .get()
            .ok_or_else(|| CoreError::NotInitialized {
                module_id: module_id.to_string(),
            })
    }

    // ---- messaging ----

    pub fn on_message<F>(&self, message_type: &str, handler: F) -> Result<Unsubscribe, CoreError>
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_message_handler(message_type, Arc::new(handler))
    }

    pub fn on_message_handler(
        &self,
        message_type: &str,
        handler: MessageHandler,
    ) -> Result<Unsubscribe, CoreError> {
        let args = MessageSubscribeArgs {
            message_type: message_type.to_string(),
            handler,
        };
        match self.inner.wired.get() {
            Some(hooks) => hooks.subscribe.call(args),
            None => self.on_message_raw(&args),
        }
    }

    fn on_message_raw(&self, args: &MessageSubscribeArgs) -> Result<Unsubscribe, CoreError> {
        Ok(self
            .inner
            .bus
            .on_message(&args.message_type, args.handler.clone())?)
    }

    pub fn publish_async(&self, message: Message) -> Result<(), CoreError> {
        let args = MessagePublishArgs { message };
        match self.inner.wired.get() {
            Some(hooks) => hooks.publish.call(args),
            None => self.publish_raw(&args),
        }
    }

    fn publish_raw(&self, args: &MessagePublishArgs) -> Result<(), CoreError> {
        Ok(self.inner.bus.publish_async(args.message.clone())?)
    }

    // ---- views ----

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Names of registered extensions, in `use` order.
    pub fn extensions(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .extensions
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Registered module ids, in registration order.
    pub fn modules(&self) -> Vec<String> {
        self.inner.state.lock().modules.modules()
    }

    pub fn running_modules(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.state.lock().modules.running()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    pub fn services(&self) -> &ServiceLocator {
        &self.inner.services
    }

    pub fn hooks(&self) -> &HooksSystem {
        &self.inner.hooks
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn document(&self) -> &HostDocument {
        &self.inner.document
    }
}

fn fire_ready(core: &WeakCore) {
    let Some(core) = core.upgrade() else {
        return;
    };
    if let Some(hooks) = core.inner.wired.get() {
        hooks.core_init.call(());
    }
    core.inner.ready_tx.send_replace(ReadySignal::Fired);
    tracing::debug!("core ready");
}
