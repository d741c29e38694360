//! Built-in services registered on every host.

use std::sync::Arc;

use devhost_protocol::{
    HOTLOAD_SERVICE, HOTLOAD_SUCCESS, HotloadRequest, SHUTDOWN_REPLY, SHUTDOWN_SERVICE,
    ServiceError, ServiceResult,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::host::{Host, HostError};
use crate::registry::ServiceDescriptor;
use crate::service::ServiceContext;

pub(crate) fn register(host: &Host) {
    host.install(HOTLOAD_SERVICE, Arc::new(hotload));
    host.install(SHUTDOWN_SERVICE, Arc::new(shutdown));
}

/// `__hotload` — register each `{name, file}` in order.
///
/// Stops at the first module that fails to resolve. Services registered
/// before that stay registered.
async fn hotload(payload: Value, ctx: ServiceContext) -> ServiceResult {
    let request: HotloadRequest = serde_json::from_value(payload)
        .map_err(|e| ServiceError::invalid_payload(format!("Invalid hot-load request: {e}")))?;
    let host = ctx
        .host()
        .upgrade()
        .ok_or_else(|| ServiceError::internal("Host is no longer available"))?;

    let total = request.services.len();
    for (loaded, module) in request.services.into_iter().enumerate() {
        let descriptor = ServiceDescriptor::from_module(module.name, module.file);
        // Loaders may touch the filesystem.
        let registering = host.clone();
        let outcome = tokio::task::spawn_blocking(move || registering.add_service(descriptor))
            .await
            .map_err(|e| ServiceError::internal(format!("Module loader failed: {e}")))?;
        if let Err(e) = outcome {
            warn!("Hot-load stopped after {loaded} of {total} service(s): {e}");
            return Err(if matches!(e, HostError::Module { .. }) {
                ServiceError::module_resolution(e.to_string())
            } else {
                ServiceError::invalid_payload(e.to_string())
            });
        }
    }

    info!("Hot-loaded {total} service(s)");
    Ok(json!(HOTLOAD_SUCCESS))
}

/// `__shutdown` — close the socket, reply, then drain.
///
/// The socket is gone before the reply is written, so any connection opened
/// after the reply is refused. The drain runs on its own task because it
/// waits for in-flight requests, including this one.
async fn shutdown(_payload: Value, ctx: ServiceContext) -> ServiceResult {
    if let Some(host) = ctx.host().upgrade() {
        info!("Shutdown requested");
        host.close_listener();
        tokio::spawn(async move {
            host.stop_listening().await;
        });
    }
    Ok(json!(SHUTDOWN_REPLY))
}
