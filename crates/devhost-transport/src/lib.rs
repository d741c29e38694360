//! Dev service host — HTTP transport
//!
//! A single endpoint that hands every request to a [`RequestHandler`]:
//! - routing by the `X-Service` header instead of URL paths
//! - JSON request bodies, raw-or-JSON response bodies
//! - status codes derived from the handler's error
//! - graceful stop that refuses new connections while responses drain
//! - a [`ListenerCloser`] that drops the socket before the drain starts
//!
//! The transport is decoupled from the registry via the `RequestHandler` trait.

mod listener;
pub mod server;

pub use listener::ListenerCloser;
pub use server::{RequestHandler, TransportConfig, TransportError, TransportServer};
