use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the drouter front door and client.
#[derive(Error, Debug, Clone)]
pub enum DrouterError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network related errors (connect failures, resets)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Load balancer errors
    #[error("Load balancer error: {message}")]
    Balancer { message: String },

    /// Proxy forwarding errors
    #[error("Proxy error: {message}")]
    Proxy { message: String },

    /// Route registration validation errors
    #[error("{message}")]
    Validation { message: String },

    /// Circuit breaker rejected the call
    #[error("circuit breaker open for {target}")]
    CircuitOpen { target: String },

    /// Upstream answered with a server error status
    #[error("server fail")]
    ServerFail { status: u16 },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// TLS/SSL related errors
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DrouterError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a load balancer error
    pub fn balancer<S: Into<String>>(message: S) -> Self {
        Self::Balancer {
            message: message.into(),
        }
    }

    /// Create a proxy error
    pub fn proxy<S: Into<String>>(message: S) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a circuit breaker rejection error
    pub fn circuit_open<S: Into<String>>(target: S) -> Self {
        Self::CircuitOpen {
            target: target.into(),
        }
    }

    /// Create a server fail error for an upstream 5xx status
    pub fn server_fail(status: u16) -> Self {
        Self::ServerFail { status }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create a TLS error
    pub fn tls<S: Into<String>>(message: S) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DrouterError::Network { .. }
                | DrouterError::ServerFail { .. }
                | DrouterError::Timeout { .. }
        )
    }

    /// Check if the error should count as a circuit breaker failure
    pub fn should_trip_breaker(&self) -> bool {
        matches!(
            self,
            DrouterError::Network { .. }
                | DrouterError::ServerFail { .. }
                | DrouterError::Timeout { .. }
        )
    }

    /// Check if the error is a refused outbound connection. The client
    /// re-register loop retries these forever with a constant delay.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            DrouterError::Network { message } => {
                message.to_ascii_lowercase().contains("connection refused")
            }
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DrouterError::Config { .. } => ErrorSeverity::Critical,
            DrouterError::Tls { .. } => ErrorSeverity::High,
            DrouterError::Internal { .. } => ErrorSeverity::High,
            DrouterError::Balancer { .. } => ErrorSeverity::High,
            DrouterError::CircuitOpen { .. } => ErrorSeverity::Medium,
            DrouterError::Network { .. } => ErrorSeverity::Medium,
            DrouterError::ServerFail { .. } => ErrorSeverity::Medium,
            DrouterError::Timeout { .. } => ErrorSeverity::Medium,
            DrouterError::Io { .. } => ErrorSeverity::Medium,
            DrouterError::Proxy { .. } => ErrorSeverity::Low,
            DrouterError::Validation { .. } => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for drouter operations
pub type DrouterResult<T> = Result<T, DrouterError>;

/// Convert from std::io::Error to DrouterError
impl From<std::io::Error> for DrouterError {
    fn from(err: std::io::Error) -> Self {
        DrouterError::io(format!("IO error: {}", err))
    }
}

/// Convert from hyper::Error to DrouterError
impl From<hyper::Error> for DrouterError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            DrouterError::timeout(Duration::from_secs(30), "HTTP request")
        } else if err.is_connect() {
            DrouterError::network(format!("Connection error: {}", err))
        } else {
            DrouterError::network(format!("HTTP error: {}", err))
        }
    }
}

/// Convert from toml::de::Error to DrouterError
impl From<toml::de::Error> for DrouterError {
    fn from(err: toml::de::Error) -> Self {
        DrouterError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from serde_json::Error to DrouterError
impl From<serde_json::Error> for DrouterError {
    fn from(err: serde_json::Error) -> Self {
        DrouterError::internal(format!("JSON serialization error: {}", err))
    }
}

/// Convert from hyper::http::uri::InvalidUri to DrouterError
impl From<hyper::http::uri::InvalidUri> for DrouterError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        DrouterError::proxy(format!("Invalid URI: {}", err))
    }
}

/// Convert from hyper::http::Error to DrouterError
impl From<hyper::http::Error> for DrouterError {
    fn from(err: hyper::http::Error) -> Self {
        DrouterError::network(format!("HTTP error: {}", err))
    }
}

/// Convert from tokio::time::Elapsed to DrouterError
impl From<tokio::time::error::Elapsed> for DrouterError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DrouterError::timeout(Duration::from_secs(30), "operation")
    }
}
