//! Built-in extensions.

mod autosubscribe;
mod lifecycle_logger;

pub use autosubscribe::{ModuleAutoSubscribe, AUTOSUBSCRIBE_EXTENSION};
pub use lifecycle_logger::{LifecycleLogger, LIFECYCLE_LOGGER_EXTENSION};

use std::sync::Arc;

use crate::contracts::Extension;

/// Names accepted by [`builtin`].
pub const BUILTIN_EXTENSIONS: &[&str] = &[AUTOSUBSCRIBE_EXTENSION, LIFECYCLE_LOGGER_EXTENSION];

/// Look up a built-in extension by name, e.g. from configuration.
pub fn builtin(name: &str) -> Option<Arc<dyn Extension>> {
    match name {
        AUTOSUBSCRIBE_EXTENSION => Some(Arc::new(ModuleAutoSubscribe::new())),
        LIFECYCLE_LOGGER_EXTENSION => Some(Arc::new(LifecycleLogger::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_resolve() {
        for name in BUILTIN_EXTENSIONS {
            let ext = builtin(name).unwrap();
            assert_eq!(ext.name(), *name);
        }
        assert!(builtin("nope").is_none());
    }
}
