use thiserror::Error;

use crate::bus::BusError;
use crate::hooks::HookError;
use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("core is already initialized")]
    AlreadyInitialized,
    #[error("cannot start '{module_id}': core is not initialized")]
    NotInitialized { module_id: String },
    #[error("module id must be a non-empty string")]
    InvalidModuleId,
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("extension name must be a non-empty string")]
    InvalidExtensionName,
    #[error("extension '{0}' is already in use")]
    DuplicateExtension(String),
    #[error("extension '{name}' failed to install")]
    ExtensionInstall {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("module '{module_id}' (instance '{instance_id}') subscribes to messages but cannot receive them")]
    MissingMessageReceiver {
        module_id: String,
        instance_id: String,
    },
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("core init failed; the core cannot become ready")]
    InitAborted,
    #[error("core has been dropped")]
    CoreDropped,
    #[error("core must be initialized inside a tokio runtime")]
    NoRuntime,
}

impl CoreError {
    /// Stable short code; nested errors report their own.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "core.already_initialized",
            Self::NotInitialized { .. } => "core.not_initialized",
            Self::InvalidModuleId => "core.invalid_module_id",
            Self::DuplicateModule(_) => "core.duplicate_module",
            Self::UnknownModule(_) => "core.unknown_module",
            Self::InvalidExtensionName => "core.invalid_extension",
            Self::DuplicateExtension(_) => "core.duplicate_extension",
            Self::ExtensionInstall { .. } => "core.extension_install",
            Self::MissingMessageReceiver { .. } => "core.missing_message_receiver",
            Self::Hook(e) => e.code(),
            Self::Bus(e) => e.code(),
            Self::Service(e) => e.code(),
            Self::InitAborted => "core.init_aborted",
            Self::CoreDropped => "core.dropped",
            Self::NoRuntime => "core.no_runtime",
        }
    }
}
