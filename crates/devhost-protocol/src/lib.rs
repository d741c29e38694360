//! Dev service host — protocol types
//!
//! Names and shapes every part of the host agrees on: the routing header,
//! the built-in service names and their literal replies, the hot-load
//! payload, and the error model that the HTTP front-end turns into status
//! codes.

pub mod error;
pub mod wire;

pub use error::{ServiceError, ServiceErrorCode};
pub use wire::{
    HOTLOAD_SERVICE, HOTLOAD_SUCCESS, HotloadRequest, ModuleRef, SERVICE_HEADER,
    SHUTDOWN_REPLY, SHUTDOWN_SERVICE,
};

/// Result of a service call: the success payload or a service error.
pub type ServiceResult = Result<serde_json::Value, ServiceError>;
