//! Service locator: named, lazily built, memoized singletons.
//!
//! Factories receive the locator so they can resolve their own
//! dependencies; a resolution chain that comes back to a key already being
//! built fails with [`ServiceError::Cycle`] instead of recursing.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;

/// A resolved service instance.
pub type ServiceRef = Arc<dyn Any + Send + Sync>;

type ServiceFactory = Arc<dyn Fn(&ServiceLocator) -> anyhow::Result<ServiceRef> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service key must be a non-empty string")]
    EmptyKey,
    #[error("service '{0}' is already registered")]
    DuplicateService(String),
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("circular service dependency: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("factory for service '{key}' failed")]
    Factory {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("service '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyKey => "services.empty_key",
            Self::DuplicateService(_) => "services.duplicate",
            Self::UnknownService(_) => "services.unknown",
            Self::Cycle { .. } => "services.cycle",
            Self::Factory { .. } => "services.factory_failed",
            Self::TypeMismatch { .. } => "services.type_mismatch",
        }
    }
}

struct ServiceEntry {
    factory: ServiceFactory,
    instance: Option<ServiceRef>,
}

#[derive(Default)]
pub struct ServiceLocator {
    entries: Mutex<HashMap<String, ServiceEntry>>,
    // Keys currently being built, outermost first. Held by one thread for a
    // whole build; factories on that thread re-enter it.
    resolving: ReentrantMutex<RefCell<Vec<String>>>,
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("services", &self.keys())
            .finish()
    }
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`. Nothing is built until first lookup.
    pub fn add_service<T, F>(&self, key: &str, factory: F) -> Result<(), ServiceError>
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceLocator) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        if key.is_empty() {
            return Err(ServiceError::EmptyKey);
        }
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return Err(ServiceError::DuplicateService(key.to_string()));
        }
        let factory: ServiceFactory = Arc::new(move |locator: &ServiceLocator| {
            factory(locator).map(|svc| Arc::new(svc) as ServiceRef)
        });
        entries.insert(
            key.to_string(),
            ServiceEntry {
                factory,
                instance: None,
            },
        );
        tracing::debug!(service = key, "service registered");
        Ok(())
    }

    /// Resolve `key`, building it on first use.
    ///
    /// Builds are serialized across threads: a concurrent lookup of a key
    /// that is being built waits for it and gets the same instance.
    pub fn get_service(&self, key: &str) -> Result<ServiceRef, ServiceError> {
        if let Some(instance) = self.cached(key)? {
            return Ok(instance);
        }

        let stack = self.resolving.lock();
        // another thread may have finished the build while we waited
        let factory = {
            let entries = self.entries.lock();
            let entry = entries
                .get(key)
                .ok_or_else(|| ServiceError::UnknownService(key.to_string()))?;
            if let Some(instance) = &entry.instance {
                return Ok(instance.clone());
            }
            entry.factory.clone()
        };

        let _guard = ResolutionGuard::enter(&stack, key)?;
        let built = factory(self).map_err(|source| match source.downcast::<ServiceError>() {
            Ok(cycle @ ServiceError::Cycle { .. }) => cycle,
            Ok(other) => ServiceError::Factory {
                key: key.to_string(),
                source: other.into(),
            },
            Err(source) => ServiceError::Factory {
                key: key.to_string(),
                source,
            },
        })?;

        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| ServiceError::UnknownService(key.to_string()))?;
        tracing::debug!(service = key, "service instantiated");
        Ok(entry.instance.get_or_insert(built).clone())
    }

    fn cached(&self, key: &str) -> Result<Option<ServiceRef>, ServiceError> {
        let entries = self.entries.lock();
        let entry = entries
            .get(key)
            .ok_or_else(|| ServiceError::UnknownService(key.to_string()))?;
        Ok(entry.instance.clone())
    }

    /// Resolve `key` and downcast it to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, ServiceError> {
        self.get_service(key)?
            .downcast::<T>()
            .map_err(|_| ServiceError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Marks `key` as being built on the current thread; unmarks it on drop,
/// including on error paths.
struct ResolutionGuard<'a> {
    stack: &'a RefCell<Vec<String>>,
    depth: usize,
}

impl<'a> ResolutionGuard<'a> {
    fn enter(
        stack: &'a ReentrantMutexGuard<'_, RefCell<Vec<String>>>,
        key: &str,
    ) -> Result<Self, ServiceError> {
        let stack: &'a RefCell<Vec<String>> = stack;
        let mut resolving = stack.borrow_mut();
        if resolving.iter().any(|k| k == key) {
            let mut path = resolving.clone();
            path.push(key.to_string());
            return Err(ServiceError::Cycle { path });
        }
        let depth = resolving.len();
        resolving.push(key.to_string());
        Ok(Self { stack, depth })
    }
}

impl Drop for ResolutionGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().truncate(self.depth);
    }
}
