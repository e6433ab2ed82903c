//! Plugin registry and hook composition.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::{HookError, HookType};

/// Fixes the argument and output types of one hook type.
///
/// Plugins and methods registered for a [`HookType`] must all agree on
/// these types; the marker type carries that agreement at compile time.
pub trait HookSpec: Send + Sync + 'static {
    type Args: Send + Sync + 'static;
    type Output: 'static;

    fn hook_type() -> HookType;
}

/// The rest of the chain, as seen by a plugin. Arguments are already bound.
pub type Next<'a, H> = &'a dyn Fn() -> <H as HookSpec>::Output;

/// A middleware registered against a hook type.
pub type Plugin<H> =
    Arc<dyn Fn(Next<'_, H>, &<H as HookSpec>::Args) -> <H as HookSpec>::Output + Send + Sync>;

type Method<H> = Arc<dyn Fn(&<H as HookSpec>::Args) -> <H as HookSpec>::Output + Send + Sync>;

type ErasedPlugin = Arc<dyn Any + Send + Sync>;

/// Ordered plugins returned by [`Extension::install`](crate::Extension::install).
#[derive(Default)]
pub struct PluginMap {
    entries: Vec<(HookType, ErasedPlugin)>,
}

impl PluginMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin for `H`. Order of calls is kept when merged.
    pub fn on<H, F>(mut self, plugin: F) -> Self
    where
        H: HookSpec,
        F: Fn(Next<'_, H>, &H::Args) -> H::Output + Send + Sync + 'static,
    {
        let plugin: Plugin<H> = Arc::new(plugin);
        self.entries.push((H::hook_type(), Arc::new(plugin)));
        self
    }

    pub fn hook_types(&self) -> Vec<HookType> {
        self.entries.iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PluginMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginMap")
            .field("hook_types", &self.hook_types())
            .finish()
    }
}

/// Registry of plugins per hook type. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct HooksSystem {
    plugins: Arc<RwLock<HashMap<HookType, Vec<ErasedPlugin>>>>,
}

impl std::fmt::Debug for HooksSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugins = self.plugins.read();
        let counts: HashMap<String, usize> = plugins
            .iter()
            .map(|(t, list)| (t.to_string(), list.len()))
            .collect();
        f.debug_struct("HooksSystem").field("plugins", &counts).finish()
    }
}

impl HooksSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `method` into a hook of type `H`.
    pub fn create_hook<H, F>(&self, method: F) -> Result<Hook<H>, HookError>
    where
        H: HookSpec,
        F: Fn(&H::Args) -> H::Output + Send + Sync + 'static,
    {
        H::hook_type().validate()?;
        Ok(Hook {
            system: self.clone(),
            method: Arc::new(method),
        })
    }

    /// Append a plugin to the chain for `H`. There is no removal.
    pub fn add_plugin<H, F>(&self, plugin: F) -> Result<(), HookError>
    where
        H: HookSpec,
        F: Fn(Next<'_, H>, &H::Args) -> H::Output + Send + Sync + 'static,
    {
        let hook_type = H::hook_type();
        hook_type.validate()?;
        let plugin: Plugin<H> = Arc::new(plugin);
        self.push(hook_type, Arc::new(plugin));
        Ok(())
    }

    /// Merge every plugin of `map`, keeping its order.
    pub fn merge(&self, map: PluginMap) -> Result<(), HookError> {
        for (hook_type, _) in &map.entries {
            hook_type.validate()?;
        }
        for (hook_type, plugin) in map.entries {
            self.push(hook_type, plugin);
        }
        Ok(())
    }

    /// Handle that does not keep the registry alive.
    pub fn downgrade(&self) -> WeakHooksSystem {
        WeakHooksSystem {
            plugins: Arc::downgrade(&self.plugins),
        }
    }

    pub fn plugin_count(&self, hook_type: &HookType) -> usize {
        self.plugins.read().get(hook_type).map_or(0, Vec::len)
    }

    fn push(&self, hook_type: HookType, plugin: ErasedPlugin) {
        tracing::trace!(hook = %hook_type, "plugin registered");
        self.plugins.write().entry(hook_type).or_default().push(plugin);
    }

    fn chain_for<H: HookSpec>(&self) -> Vec<Plugin<H>> {
        let hook_type = H::hook_type();
        let plugins = self.plugins.read();
        let Some(list) = plugins.get(&hook_type) else {
            return Vec::new();
        };
        list.iter()
            .filter_map(|erased| match erased.downcast_ref::<Plugin<H>>() {
                Some(plugin) => Some(plugin.clone()),
                None => {
                    tracing::warn!(hook = %hook_type, "skipping plugin with mismatched signature");
                    None
                }
            })
            .collect()
    }
}

/// Non-owning [`HooksSystem`]; see [`HooksSystem::downgrade`].
#[derive(Clone, Debug, Default)]
pub struct WeakHooksSystem {
    plugins: Weak<RwLock<HashMap<HookType, Vec<ErasedPlugin>>>>,
}

impl WeakHooksSystem {
    pub fn upgrade(&self) -> Option<HooksSystem> {
        self.plugins.upgrade().map(|plugins| HooksSystem { plugins })
    }
}

/// A method wrapped into a named middleware chain.
pub struct Hook<H: HookSpec> {
    system: HooksSystem,
    method: Method<H>,
}

impl<H: HookSpec> Clone for Hook<H> {
    fn clone(&self) -> Self {
        Self {
            system: self.system.clone(),
            method: Arc::clone(&self.method),
        }
    }
}

impl<H: HookSpec> std::fmt::Debug for Hook<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("hook_type", &H::hook_type())
            .finish()
    }
}

impl<H: HookSpec> Hook<H> {
    /// Run the plugin chain registered at call time, ending in the method.
    pub fn call(&self, args: H::Args) -> H::Output {
        let chain = self.system.chain_for::<H>();
        run_chain::<H>(&chain, self.method.as_ref(), &args)
    }

    pub fn hook_type(&self) -> HookType {
        H::hook_type()
    }

    /// Handle for storing inside plugins of the same registry without
    /// keeping it alive.
    pub fn downgrade(&self) -> WeakHook<H> {
        WeakHook {
            system: self.system.downgrade(),
            method: Arc::clone(&self.method),
        }
    }

    /// Always true; lets callers holding a hook tell it apart from a bare method.
    pub fn is_pipeline(&self) -> bool {
        true
    }
}

/// A [`Hook`] whose registry may already be gone.
pub struct WeakHook<H: HookSpec> {
    system: WeakHooksSystem,
    method: Method<H>,
}

impl<H: HookSpec> Clone for WeakHook<H> {
    fn clone(&self) -> Self {
        Self {
            system: self.system.clone(),
            method: Arc::clone(&self.method),
        }
    }
}

impl<H: HookSpec> WeakHook<H> {
    pub fn upgrade(&self) -> Option<Hook<H>> {
        Some(Hook {
            system: self.system.upgrade()?,
            method: Arc::clone(&self.method),
        })
    }
}

// First plugin is outermost; the method is the terminal step.
fn run_chain<H: HookSpec>(
    chain: &[Plugin<H>],
    method: &(dyn Fn(&H::Args) -> H::Output + Send + Sync),
    args: &H::Args,
) -> H::Output {
    match chain.split_first() {
        None => method(args),
        Some((outer, rest)) => {
            let next = || run_chain::<H>(rest, method, args);
            outer(&next, args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Double;
    impl HookSpec for Double {
        type Args = i64;
        type Output = i64;
        fn hook_type() -> HookType {
            HookType::custom("double")
        }
    }

    struct Trace;
    impl HookSpec for Trace {
        type Args = Arc<Mutex<Vec<String>>>;
        type Output = ();
        fn hook_type() -> HookType {
            HookType::custom("trace")
        }
    }

    struct Nameless;
    impl HookSpec for Nameless {
        type Args = ();
        type Output = ();
        fn hook_type() -> HookType {
            HookType::custom("")
        }
    }

    #[test]
    fn no_plugins_calls_method_directly() {
        let hooks = HooksSystem::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook = hooks
            .create_hook::<Double, _>(move |x| {
                counter.fetch_add(1, Ordering::SeqCst);
                x * 2
            })
            .unwrap();

        assert_eq!(hook.call(21), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(hook.is_pipeline());
        assert_eq!(hook.hook_type(), HookType::custom("double"));
    }

    #[test]
    fn plugins_form_an_onion_in_registration_order() {
        let hooks = HooksSystem::new();
        let hook = hooks
            .create_hook::<Trace, _>(|log| log.lock().push("method".into()))
            .unwrap();

        hooks
            .add_plugin::<Trace, _>(|next, log| {
                log.lock().push("P1-before".into());
                next();
                log.lock().push("P1-after".into());
            })
            .unwrap();
        hooks
            .add_plugin::<Trace, _>(|next, log| {
                log.lock().push("P2-before".into());
                next();
                log.lock().push("P2-after".into());
            })
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        hook.call(log.clone());
        assert_eq!(
            *log.lock(),
            vec!["P1-before", "P2-before", "method", "P2-after", "P1-after"]
        );
    }

    #[test]
    fn plugin_can_short_circuit() {
        let hooks = HooksSystem::new();
        let hook = hooks.create_hook::<Double, _>(|x| x * 2).unwrap();
        hooks
            .add_plugin::<Double, _>(|_next, x| if *x < 0 { 0 } else { -1 })
            .unwrap();

        assert_eq!(hook.call(-5), 0);
        assert_eq!(hook.call(5), -1);
    }

    #[test]
    fn plugin_can_rewrite_result() {
        let hooks = HooksSystem::new();
        let hook = hooks.create_hook::<Double, _>(|x| x * 2).unwrap();
        hooks.add_plugin::<Double, _>(|next, _| next() + 1).unwrap();

        assert_eq!(hook.call(10), 21);
    }

    #[test]
    fn plugins_added_after_hook_creation_apply() {
        let hooks = HooksSystem::new();
        let hook = hooks.create_hook::<Double, _>(|x| x * 2).unwrap();
        assert_eq!(hook.call(1), 2);

        let map = PluginMap::new().on::<Double, _>(|next, _| next() * 10);
        hooks.merge(map).unwrap();

        assert_eq!(hook.call(1), 20);
        assert_eq!(hooks.plugin_count(&HookType::custom("double")), 1);
    }

    #[test]
    fn empty_custom_type_is_rejected() {
        let hooks = HooksSystem::new();
        let err = hooks.create_hook::<Nameless, _>(|_| ()).unwrap_err();
        assert!(matches!(err, HookError::InvalidHookType(_)));
        assert!(hooks.add_plugin::<Nameless, _>(|next, _| next()).is_err());
    }

    #[test]
    fn mismatched_plugin_signature_is_skipped() {
        struct AlsoDouble;
        impl HookSpec for AlsoDouble {
            type Args = String;
            type Output = String;
            fn hook_type() -> HookType {
                HookType::custom("double")
            }
        }

        let hooks = HooksSystem::new();
        hooks
            .add_plugin::<AlsoDouble, _>(|_next, _| "hijacked".to_string())
            .unwrap();
        let hook = hooks.create_hook::<Double, _>(|x| x * 2).unwrap();

        assert_eq!(hook.call(4), 8);
    }

    #[test]
    fn plugins_holding_weak_hooks_do_not_pin_the_registry() {
        let hooks = HooksSystem::new();
        let inner = hooks.create_hook::<Double, _>(|x| x * 2).unwrap().downgrade();
        hooks
            .add_plugin::<Trace, _>(move |next, log| {
                if let Some(inner) = inner.upgrade() {
                    log.lock().push(format!("inner {}", inner.call(3)));
                }
                next()
            })
            .unwrap();
        let trace = hooks.create_hook::<Trace, _>(|_| ()).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        trace.call(log.clone());
        assert_eq!(*log.lock(), vec!["inner 6"]);

        let registry = hooks.downgrade();
        drop(trace);
        drop(hooks);
        assert!(registry.upgrade().is_none());
    }
}
