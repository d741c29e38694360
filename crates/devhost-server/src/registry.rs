//! Service registry — the host's live mapping from name to service.

use std::collections::HashMap;
use std::sync::Arc;

use devhost_protocol::ServiceResult;
use parking_lot::RwLock;
use serde_json::Value;

use crate::host::HostHandle;
use crate::service::{BoxFuture, Handler, ServiceContext};

/// A named handler bound to the host that registered it.
pub struct Service {
    name: Arc<str>,
    handler: Arc<dyn Handler>,
    host: HostHandle,
}

impl Service {
    pub(crate) fn new(name: &str, handler: Arc<dyn Handler>, host: HostHandle) -> Self {
        Self {
            name: Arc::from(name),
            handler,
            host,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The host this service was registered with.
    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    /// Run the handler. Nothing here catches a panicking handler.
    pub fn invoke(&self, payload: Value) -> BoxFuture<'static, ServiceResult> {
        let ctx = ServiceContext::new(self.name.clone(), self.host.clone());
        self.handler.call(payload, ctx)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Where a new service's handler comes from.
#[derive(Clone)]
pub enum ServiceSource {
    /// A handler supplied directly.
    Handler(Arc<dyn Handler>),
    /// A module reference resolved through the host's loader.
    Module(String),
}

/// Input to [`Host::add_service`](crate::Host::add_service).
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub source: ServiceSource,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            source: ServiceSource::Handler(handler),
        }
    }

    /// Build a descriptor from any async handler closure.
    pub fn from_fn<H: Handler>(name: impl Into<String>, handler: H) -> Self {
        Self::new(name, Arc::new(handler))
    }

    pub fn from_module(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ServiceSource::Module(reference.into()),
        }
    }
}

/// Name → service map.
///
/// Entries are `Arc<Service>` and are only ever swapped whole, so a lookup
/// sees either the old or the new service for a name. The lock is never held
/// while a handler runs.
#[derive(Default)]
pub struct Registry {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the service previously under that name.
    pub(crate) fn insert(&self, service: Service) -> Option<Arc<Service>> {
        let name = service.name().to_string();
        self.services.write().insert(name, Arc::new(service))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
