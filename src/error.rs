// src/error.rs - Gateway error taxonomy
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main gateway error type
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid target '{target}' for backend '{backend}': {reason}")]
    InvalidTarget {
        backend: String,
        target: String,
        reason: String,
    },

    #[error("Invalid weight {weight} for backend '{backend}': weight must be at least 1")]
    InvalidWeight { backend: String, weight: i64 },

    #[error("Backend '{backend}' is already registered")]
    DuplicateBackend { backend: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Failed to parse {format} configuration: {message}")]
    Parse { format: String, message: String },

    // Request path errors
    #[error("No route found for {path}")]
    RouteNotFound { path: String },

    #[error("No backend available for route {route}")]
    NoBackendAvailable { route: String },

    #[error("Upstream error from backend '{backend}': {message}")]
    Upstream { backend: String, message: String },

    #[error("Backend '{backend}' timed out after {timeout_ms}ms")]
    UpstreamTimeout { backend: String, timeout_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Server errors
    #[error("Failed to bind to address '{address}': {reason}")]
    Bind { address: String, reason: String },

    #[error("Server error: {message}")]
    Server { message: String },

    #[error("Metrics error: {message}")]
    Metrics { message: String },
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl GatewayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GatewayError::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        GatewayError::Internal {
            message: message.into(),
        }
    }

    /// Create a server error
    pub fn server<S: Into<String>>(message: S) -> Self {
        GatewayError::Server {
            message: message.into(),
        }
    }

    /// Whether the error prevents the gateway from starting.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GatewayError::Config { .. }
                | GatewayError::InvalidTarget { .. }
                | GatewayError::InvalidWeight { .. }
                | GatewayError::DuplicateBackend { .. }
                | GatewayError::Io { .. }
                | GatewayError::Parse { .. }
        )
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::RouteNotFound { .. } => 404,
            GatewayError::Upstream { .. } | GatewayError::UpstreamTimeout { .. } => 502,
            GatewayError::NoBackendAvailable { .. } => 503,
            _ => 500,
        }
    }

    /// Get the log level for this error
    pub fn log_level(&self) -> LogLevel {
        match self {
            GatewayError::RouteNotFound { .. } => LogLevel::Debug,
            GatewayError::NoBackendAvailable { .. } => LogLevel::Info,
            GatewayError::Upstream { .. } | GatewayError::UpstreamTimeout { .. } => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }

    /// Body sent back to the client.
    pub fn user_message(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "route not found",
            GatewayError::NoBackendAvailable { .. } => "no backend available",
            GatewayError::Upstream { .. } | GatewayError::UpstreamTimeout { .. } => "backend error",
            _ => "internal error",
        }
    }

    /// Emit the error through `tracing` at its own level.
    pub fn log(&self) {
        match self.log_level() {
            LogLevel::Error => tracing::error!(error = %self, "request failed"),
            LogLevel::Warn => tracing::warn!(error = %self, "request failed"),
            LogLevel::Info => tracing::info!(error = %self, "request failed"),
            LogLevel::Debug => tracing::debug!(error = %self, "request failed"),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Parse {
            format: "YAML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Parse {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Parse {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}
