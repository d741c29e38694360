//! Handler model — what a service runs when it is called.
//!
//! A handler takes the decoded payload and a [`ServiceContext`] and returns a
//! future that resolves to the call's single completion. Async closures are
//! handlers as-is; [`sync_handler`] adapts plain functions that finish before
//! returning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use devhost_protocol::ServiceResult;
use serde_json::Value;

use crate::host::HostHandle;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for service handlers.
pub trait Handler: Send + Sync + 'static {
    /// Start handling `payload`. The returned future is the completion.
    fn call(&self, payload: Value, ctx: ServiceContext) -> BoxFuture<'static, ServiceResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value, ServiceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult> + Send + 'static,
{
    fn call(&self, payload: Value, ctx: ServiceContext) -> BoxFuture<'static, ServiceResult> {
        Box::pin((self)(payload, ctx))
    }
}

/// Handler that runs to completion inside [`Handler::call`].
pub struct SyncHandler<F> {
    f: F,
}

impl<F> Handler for SyncHandler<F>
where
    F: Fn(Value, ServiceContext) -> ServiceResult + Send + Sync + 'static,
{
    fn call(&self, payload: Value, ctx: ServiceContext) -> BoxFuture<'static, ServiceResult> {
        let result = (self.f)(payload, ctx);
        Box::pin(std::future::ready(result))
    }
}

/// Wrap a synchronous function as a handler.
///
/// A panic in `f` surfaces at the call site, not as an error completion.
pub fn sync_handler<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value, ServiceContext) -> ServiceResult + Send + Sync + 'static,
{
    Arc::new(SyncHandler { f })
}

/// Per-call context handed to a handler.
#[derive(Clone)]
pub struct ServiceContext {
    service: Arc<str>,
    host: HostHandle,
}

impl ServiceContext {
    pub(crate) fn new(service: Arc<str>, host: HostHandle) -> Self {
        Self { service, host }
    }

    /// Name the service was called under.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Non-owning handle to the host that owns the service.
    pub fn host(&self) -> &HostHandle {
        &self.host
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
