//! HTTP transport server using Axum.
//!
//! Every request, whatever its path or method, goes to one dispatch handler.
//! The target service comes from the `X-Service` header and the JSON body is
//! the payload.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use devhost_protocol::{SERVICE_HEADER, ServiceError, ServiceResult};
use serde_json::Value;
use tokio::sync::mpsc;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, info, warn};

use crate::listener::{ClosableListener, ListenerCloser};

/// Trait implemented by the host to handle dispatched requests.
/// The transport layer calls this once per HTTP request.
pub trait RequestHandler: Send + Sync + 'static {
    /// Dispatch `payload` to `service`. `None` means the request named no
    /// service.
    fn handle_request(
        &self,
        service: Option<&str>,
        payload: Value,
    ) -> impl std::future::Future<Output = ServiceResult> + Send;
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read bound address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 63578,
            hostname: "127.0.0.1".into(),
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: RequestHandler> {
    handler: Arc<H>,
    closer: ListenerCloser,
}

/// The transport server — owns the listener task and its shutdown signal.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
    /// Closes the listening socket ahead of the drain
    closer: ListenerCloser,
}

impl TransportServer {
    /// Bind the configured address and start serving `handler`.
    ///
    /// Returns once the socket is accepting connections.
    pub async fn start<H: RequestHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let listener = tokio::net::TcpListener::bind((config.hostname.as_str(), config.port))
            .await
            .map_err(|source| TransportError::Bind {
                addr: format!("{}:{}", config.hostname, config.port),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::LocalAddr)?;
        let (listener, closer) = ClosableListener::new(listener, local_addr);

        let state = Arc::new(AppState {
            handler,
            closer: closer.clone(),
        });

        let app = Router::new()
            .fallback(dispatch_handler::<H>)
            .layer(CatchPanicLayer::new())
            .with_state(state);

        info!("Transport listening on http://{local_addr}/");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
            closer,
        })
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that closes the listening socket without waiting for the drain.
    pub fn closer(&self) -> ListenerCloser {
        self.closer.clone()
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    ///
    /// The listening socket is closed before this first yields, so new
    /// connection attempts are refused while earlier responses drain.
    pub async fn stop(&mut self) {
        self.closer.close();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Transport server stopped ({})", self.local_addr);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn dispatch_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let service = service_name(&headers);

    let payload = match decode_payload(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(%request_id, "Rejected request body: {}", e.message);
            return error_response(e);
        }
    };

    debug!(
        %request_id,
        service = service.as_deref().unwrap_or("-"),
        "Dispatching request"
    );

    let mut response = match state.handler.handle_request(service.as_deref(), payload).await {
        Ok(result) => success_response(result),
        Err(e) => {
            if e.is_not_found() {
                debug!(%request_id, "Service lookup failed: {}", e.message);
            } else {
                warn!(%request_id, "Service call failed: {e}");
            }
            error_response(e)
        }
    };

    // No keep-alive once the socket is gone: the next request must reconnect.
    if state.closer.is_closed() {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn service_name(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SERVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

/// An empty body is an empty object; anything else must be JSON.
fn decode_payload(body: &[u8]) -> Result<Value, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::invalid_payload(format!("Request body is not valid JSON: {e}")))
}

/// Strings go out raw, everything else as JSON.
fn success_response(result: Value) -> Response {
    match result {
        Value::String(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        other => (StatusCode::OK, Json(other)).into_response(),
    }
}

/// Only 4xx and 5xx are sent as-is; anything else becomes 500.
fn error_response(error: ServiceError) -> Response {
    let status = StatusCode::from_u16(error.status)
        .ok()
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        error.message,
    )
        .into_response()
}
