//! Service error types and their HTTP status mapping.

use serde::{Deserialize, Serialize};

/// Failure categories a dispatch can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorCode {
    /// No service is registered under the requested name.
    NotFound,
    /// The request did not name a service at all.
    MissingService,
    /// The payload could not be decoded or has the wrong shape.
    InvalidPayload,
    /// A hot-load module reference could not be resolved.
    ModuleResolution,
    /// The handler completed with an error.
    HandlerFailed,
    /// Anything else that went wrong inside the host.
    Internal,

    /// Handler-chosen HTTP status.
    Status(u16),
}

impl ServiceErrorCode {
    /// HTTP status used when the error crosses the front-end.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound | Self::MissingService => 404,
            Self::InvalidPayload => 400,
            Self::ModuleResolution => 422,
            Self::HandlerFailed | Self::Internal => 500,
            Self::Status(s) => *s,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::MissingService => "missing_service",
            Self::InvalidPayload => "invalid_payload",
            Self::ModuleResolution => "module_resolution",
            Self::HandlerFailed => "handler_failed",
            Self::Internal => "internal",
            Self::Status(_) => "status",
        }
    }
}

/// Error outcome of a service call.
///
/// Lookup failures carry the names that *are* registered so the caller can
/// tell what it could have asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    pub status: u16,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

impl ServiceError {
    pub fn new(code: ServiceErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            kind: code.tag().to_string(),
            message: message.into(),
            available: Vec::new(),
        }
    }

    /// Lookup failure for `name`, listing everything currently registered.
    pub fn not_found(name: &str, available: Vec<String>) -> Self {
        let message = format!(
            "Service not found: {name}. Services available: {}",
            list_names(&available)
        );
        Self {
            available,
            ..Self::new(ServiceErrorCode::NotFound, message)
        }
    }

    /// Lookup failure for a request that named no service.
    pub fn missing_service(available: Vec<String>) -> Self {
        let message = format!(
            "No service requested (set the {} header). Services available: {}",
            crate::wire::SERVICE_HEADER,
            list_names(&available)
        );
        Self {
            available,
            ..Self::new(ServiceErrorCode::MissingService, message)
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorCode::InvalidPayload, message)
    }

    pub fn module_resolution(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorCode::ModuleResolution, message)
    }

    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorCode::HandlerFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorCode::Internal, message)
    }

    /// Handler error with an explicit HTTP status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorCode::Status(status), message)
    }

    pub fn error_code(&self) -> ServiceErrorCode {
        match self.kind.as_str() {
            "not_found" => ServiceErrorCode::NotFound,
            "missing_service" => ServiceErrorCode::MissingService,
            "invalid_payload" => ServiceErrorCode::InvalidPayload,
            "module_resolution" => ServiceErrorCode::ModuleResolution,
            "handler_failed" => ServiceErrorCode::HandlerFailed,
            "internal" => ServiceErrorCode::Internal,
            _ => ServiceErrorCode::Status(self.status),
        }
    }

    /// True for both flavours of lookup failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.error_code(),
            ServiceErrorCode::NotFound | ServiceErrorCode::MissingService
        )
    }
}

fn list_names(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Service Error [{}]: {}", self.status, self.message)
    }
}

impl std::error::Error for ServiceError {}
