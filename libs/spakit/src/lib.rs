//! # spakit - Module Micro-Kernel
//!
//! A small core that lets independently written modules register, start,
//! stop and talk to each other without holding references to one another.
//!
//! ## Features
//!
//! - **Lifecycle**: modules are built by factories, get a [`Sandbox`], and
//!   go through `init`/`destroy`; several instances per module are allowed
//! - **Hooks**: every mutating Core operation runs through an ordered plugin
//!   chain that extensions contribute to
//! - **Message bus**: deferred, fault-isolated publish/subscribe with
//!   per-subscription cancellation
//! - **Services**: lazy, memoized, cycle-checked named singletons
//!
//! ## Basic Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spakit::{extensions::ModuleAutoSubscribe, Core, Message, Module, Sandbox, StartOptions};
//!
//! struct Greeter {
//!     sandbox: Sandbox,
//! }
//!
//! impl Module for Greeter {
//!     fn init(&self, _props: Option<&spakit::Props>) -> anyhow::Result<()> {
//!         self.sandbox.publish_async(Message::new("greeter.ready"))?;
//!         Ok(())
//!     }
//!     fn destroy(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!     fn sandbox(&self) -> &Sandbox {
//!         &self.sandbox
//!     }
//! }
//!
//! let core = Core::new();
//! core.use_extensions([Arc::new(ModuleAutoSubscribe::new()) as Arc<dyn spakit::Extension>])?;
//! core.add_module("greeter", |sandbox| Ok(Greeter { sandbox }))?;
//! core.init()?;
//! core.start_module("greeter", StartOptions::new())?;
//! ```

pub use anyhow::Result;

pub mod bus;
pub mod contracts;
pub mod extensions;
pub mod hooks;
pub mod kernel;
pub mod sandbox;
pub mod services;

pub use bus::{BusError, Message, MessageBus, MessageHandler, SubscriptionId, Unsubscribe};
pub use contracts::*;
pub use hooks::{
    Hook, HookError, HookSpec, HookType, HooksSystem, Next, Plugin, PluginMap, WeakHook,
    WeakHooksSystem,
};
pub use kernel::{Core, CoreBuilder, CoreError, HostDocument, ReadyState, StartOptions, WeakCore};
pub use sandbox::Sandbox;
pub use services::{ServiceError, ServiceLocator, ServiceRef};
