//! Host — owns the registry, the configuration and the optional listener.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use devhost_protocol::wire::listening_line;
use devhost_protocol::{ServiceError, ServiceResult};
use devhost_transport::{
    ListenerCloser, RequestHandler, TransportConfig, TransportError, TransportServer,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::builtins;
use crate::loader::{CommandLoader, LoadError, ModuleLoader};
use crate::registry::{Registry, Service, ServiceDescriptor, ServiceSource};
use crate::service::Handler;

/// Per-host options. Every host owns its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    /// Print the readiness line to stdout once listening.
    pub output_on_listen: bool,
    /// Address to bind.
    pub host: String,
    /// Port to bind (0 for OS-assigned).
    pub port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            output_on_listen: true,
            host: "127.0.0.1".into(),
            port: 63578,
        }
    }
}

/// Host errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("service name must be a non-empty string")]
    InvalidName,
    #[error("cannot load module `{reference}` for service `{name}`: {source}")]
    Module {
        name: String,
        reference: String,
        #[source]
        source: LoadError,
    },
    #[error("already listening on {0}")]
    AlreadyListening(SocketAddr),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Where the listener is bound.
#[derive(Debug, Clone)]
struct Binding {
    host: String,
    addr: SocketAddr,
    closer: ListenerCloser,
}

struct HostInner {
    config: RwLock<HostConfig>,
    registry: Registry,
    loader: Arc<dyn ModuleLoader>,
    listener: Mutex<Option<TransportServer>>,
    /// `Some` while listening.
    state: watch::Sender<Option<Binding>>,
}

/// The service host. Cloning yields another handle to the same host.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

/// Non-owning reference to a [`Host`], handed to services.
#[derive(Clone)]
pub struct HostHandle {
    inner: Weak<HostInner>,
}

impl HostHandle {
    /// The host, if it is still alive.
    pub fn upgrade(&self) -> Option<Host> {
        self.inner.upgrade().map(|inner| Host { inner })
    }

    /// Whether this handle refers to `host`.
    pub fn is(&self, host: &Host) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&host.inner))
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Host {
    /// Create a host that loads modules as executables relative to the
    /// working directory.
    pub fn new(config: HostConfig) -> Self {
        Self::with_loader(config, Arc::new(CommandLoader::current_dir()))
    }

    /// Create a host with a custom module loader.
    pub fn with_loader(config: HostConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let (state, _) = watch::channel(None);
        let host = Self {
            inner: Arc::new(HostInner {
                config: RwLock::new(config),
                registry: Registry::new(),
                loader,
                listener: Mutex::new(None),
                state,
            }),
        };
        builtins::register(&host);
        host
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> HostConfig {
        self.inner.config.read().clone()
    }

    /// Change the configuration. Bind settings apply on the next `listen`.
    pub fn update_config(&self, f: impl FnOnce(&mut HostConfig)) {
        f(&mut self.inner.config.write());
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two values are handles to the same host.
    pub fn ptr_eq(&self, other: &Host) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a service, replacing any service with the same name.
    pub fn add_service(&self, descriptor: ServiceDescriptor) -> Result<(), HostError> {
        let ServiceDescriptor { name, source } = descriptor;
        if name.is_empty() {
            return Err(HostError::InvalidName);
        }

        let handler = match source {
            ServiceSource::Handler(handler) => handler,
            ServiceSource::Module(reference) => {
                self.inner
                    .loader
                    .resolve(&reference)
                    .map_err(|source| HostError::Module {
                        name: name.clone(),
                        reference,
                        source,
                    })?
            }
        };

        self.install(&name, handler);
        Ok(())
    }

    pub(crate) fn install(&self, name: &str, handler: Arc<dyn Handler>) {
        let service = Service::new(name, handler, self.handle());
        if self.inner.registry.insert(service).is_some() {
            info!("Replaced service: {name}");
        } else {
            info!("Registered service: {name}");
        }
    }

    /// Dispatch `payload` to the service registered as `name`.
    ///
    /// A handler that panics is not caught; the panic reaches the caller.
    pub async fn call_service(&self, name: &str, payload: Value) -> ServiceResult {
        let Some(service) = self.inner.registry.get(name) else {
            return Err(ServiceError::not_found(name, self.inner.registry.names()));
        };
        debug!("Calling service: {name}");
        service.invoke(payload).await
    }

    /// Bind the configured address and start serving HTTP.
    ///
    /// Resolves once connections are accepted. While listening, the serving
    /// task keeps the host alive until [`stop_listening`](Self::stop_listening).
    pub async fn listen(&self) -> Result<SocketAddr, HostError> {
        let mut slot = self.inner.listener.lock().await;
        if let Some(server) = slot.as_ref() {
            return Err(HostError::AlreadyListening(server.local_addr()));
        }

        let config = self.config();
        let transport_config = TransportConfig {
            hostname: config.host.clone(),
            port: config.port,
        };
        let server = TransportServer::start(transport_config, Arc::new(self.clone())).await?;
        let addr = server.local_addr();
        let closer = server.closer();
        *slot = Some(server);

        // Published before the slot lock is released, so a concurrent stop
        // always sees this binding.
        self.inner.state.send_replace(Some(Binding {
            host: config.host.clone(),
            addr,
            closer,
        }));
        drop(slot);

        if config.output_on_listen {
            println!("{}", listening_line(&config.host, addr.port()));
        }
        info!("Host listening at {addr}");
        Ok(addr)
    }

    /// Close the listener and wait for in-flight requests. No-op when idle.
    ///
    /// The socket is closed before the drain starts. A `listen` made during
    /// the drain binds a fresh listener and is not undone when the drain ends.
    pub async fn stop_listening(&self) {
        let server = self.inner.listener.lock().await.take();
        let Some(mut server) = server else {
            debug!("stop_listening called while idle");
            return;
        };
        let closer = server.closer();
        server.stop().await;

        let cleared = self.inner.state.send_if_modified(|state| {
            let ours = state
                .as_ref()
                .is_some_and(|binding| binding.closer.same_listener(&closer));
            if ours {
                *state = None;
            }
            ours
        });
        if cleared {
            info!("Host stopped listening");
        } else {
            debug!("Listener stopped; host already listening elsewhere");
        }
    }

    /// Close the listening socket now, without waiting for in-flight requests.
    ///
    /// New connections are refused as soon as this returns. The host still
    /// reports itself as listening until [`stop_listening`](Self::stop_listening)
    /// finishes the drain.
    pub fn close_listener(&self) {
        let closer = self
            .inner
            .state
            .borrow()
            .as_ref()
            .map(|binding| binding.closer.clone());
        if let Some(closer) = closer {
            closer.close();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner.state.borrow().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.state.borrow().as_ref().map(|b| b.addr)
    }

    /// Base URL of the active listener, e.g. `http://127.0.0.1:63578/`.
    pub fn get_url(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .as_ref()
            .map(|b| format!("http://{}:{}/", b.host, b.addr.port()))
    }

    /// Resolves once the host is not listening.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(Option::is_none).await;
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config())
            .field("services", &self.inner.registry.names())
            .field("listening", &self.local_addr())
            .finish()
    }
}

impl RequestHandler for Host {
    async fn handle_request(&self, service: Option<&str>, payload: Value) -> ServiceResult {
        match service {
            Some(name) => self.call_service(name, payload).await,
            None => Err(ServiceError::missing_service(self.inner.registry.names())),
        }
    }
}
