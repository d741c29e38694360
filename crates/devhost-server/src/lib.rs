//! Dev service host — registry, dispatch and lifecycle.
//!
//! A [`Host`] owns a registry of named services and can expose them over one
//! HTTP port, routed by the `X-Service` header. Every host starts with two
//! built-in services: `__hotload`, which registers services from module
//! references through the host's [`ModuleLoader`], and `__shutdown`, which
//! closes the listener.

mod builtins;
pub mod host;
pub mod loader;
pub mod registry;
pub mod service;

pub use host::{Host, HostConfig, HostError, HostHandle};
pub use loader::{ChainLoader, CommandHandler, CommandLoader, LoadError, ModuleLoader, PluginTable};
pub use registry::{Registry, Service, ServiceDescriptor, ServiceSource};
pub use service::{BoxFuture, Handler, ServiceContext, SyncHandler, sync_handler};
