//! Host-side plumbing for spakit: layered configuration, logging and shutdown signals.

pub mod config;
pub mod config_provider;
pub mod logging;
pub mod signals;

pub use config::*;
pub use config_provider::*;
pub use logging::*;
pub use signals::*;
