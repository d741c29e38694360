//! Wire-level names and payload shapes shared by the host and its clients.

use serde::{Deserialize, Serialize};

/// Request header that selects the target service.
pub const SERVICE_HEADER: &str = "X-Service";

/// Built-in service that registers services from module references.
pub const HOTLOAD_SERVICE: &str = "__hotload";

/// Built-in service that closes the listener.
pub const SHUTDOWN_SERVICE: &str = "__shutdown";

/// Reply of a fully successful hot-load.
pub const HOTLOAD_SUCCESS: &str = "Success";

/// Reply of `__shutdown`, sent before the listener closes.
pub const SHUTDOWN_REPLY: &str = "Shutting down...";

/// One `{name, file}` entry of a hot-load batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub file: String,
}

/// Payload of `__hotload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotloadRequest {
    pub services: Vec<ModuleRef>,
}

impl HotloadRequest {
    pub fn new(services: Vec<ModuleRef>) -> Self {
        Self { services }
    }
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }
}

/// The readiness line written to stdout once the listener accepts.
pub fn listening_line(host: &str, port: u16) -> String {
    format!("Server listening at {host}:{port}")
}
