//! Hook pipeline: named extension points wrapped in ordered middleware.

mod point;
mod spec;
mod system;

pub use point::HookType;
pub use spec::*;
pub use system::{
    Hook, HookSpec, HooksSystem, Next, Plugin, PluginMap, WeakHook, WeakHooksSystem,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("invalid hook type '{0}': must be a non-empty name")]
    InvalidHookType(String),
}

impl HookError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidHookType(_) => "hooks.invalid_type",
        }
    }
}
