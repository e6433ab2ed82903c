//! Hook types: the named extension points of the Core.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use super::HookError;

/// Every point where extensions can plug middleware in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookType {
    // ── Core ─────────────────────────────────────────────────
    /// The deferred "ready" callback passed to `Core::init_with`.
    OnCoreInit,

    // ── Module lifecycle ─────────────────────────────────────
    OnModuleAdd,
    OnModuleStart,
    /// Wraps `Module::init`.
    OnModuleInit,
    OnModuleStop,
    /// Wraps `Module::destroy`.
    OnModuleDestroy,
    /// Wraps `PropsReceiver::module_did_receive_props`.
    OnModuleReceiveProps,
    /// Wraps `SubscribingModule::module_will_subscribe`.
    OnModuleSubscribe,
    /// Wraps `MessageReceiver::module_did_receive_message`.
    OnModuleReceiveMessage,

    // ── Message bus ──────────────────────────────────────────
    OnMessageSubscribe,
    OnMessagePublish,

    /// Host-defined hook. The name must not be empty.
    Custom(Cow<'static, str>),
}

impl HookType {
    /// Built-in hook types, in declaration order.
    pub const BUILTIN: &'static [HookType] = &[
        HookType::OnCoreInit,
        HookType::OnModuleAdd,
        HookType::OnModuleStart,
        HookType::OnModuleInit,
        HookType::OnModuleStop,
        HookType::OnModuleDestroy,
        HookType::OnModuleReceiveProps,
        HookType::OnModuleSubscribe,
        HookType::OnModuleReceiveMessage,
        HookType::OnMessageSubscribe,
        HookType::OnMessagePublish,
    ];

    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Custom(name.into())
    }

    /// Returns the canonical tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OnCoreInit => "onCoreInit",
            Self::OnModuleAdd => "onModuleAdd",
            Self::OnModuleStart => "onModuleStart",
            Self::OnModuleInit => "onModuleInit",
            Self::OnModuleStop => "onModuleStop",
            Self::OnModuleDestroy => "onModuleDestroy",
            Self::OnModuleReceiveProps => "onModuleReceiveProps",
            Self::OnModuleSubscribe => "onModuleSubscribe",
            Self::OnModuleReceiveMessage => "onModuleReceiveMessage",
            Self::OnMessageSubscribe => "onMessageSubscribe",
            Self::OnMessagePublish => "onMessagePublish",
            Self::Custom(name) => name,
        }
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    pub(crate) fn validate(&self) -> Result<(), HookError> {
        match self {
            Self::Custom(name) if name.trim().is_empty() => {
                Err(HookError::InvalidHookType(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for HookType {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(builtin) = Self::BUILTIN.iter().find(|t| t.as_str() == s) {
            return Ok(builtin.clone());
        }
        let custom = Self::Custom(Cow::Owned(s.to_string()));
        custom.validate()?;
        Ok(custom)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
