//! Error types for warehouse-relay
//!
//! This module defines the error hierarchy for both halves of the pipeline.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for warehouse-relay
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Protocol Errors
    // ============================================================================
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Message is missing required key '{key}': {line}")]
    MissingKey { key: String, line: String },

    #[error("Unknown message type '{message_type}'")]
    UnknownMessageType { message_type: String },

    #[error("Commingled streams: record for {found} while {expected} is active")]
    CommingledStreams { expected: String, found: String },

    #[error("Record for stream '{stream}' encountered before its schema")]
    SchemaNotSeen { stream: String },

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Record failed validation for stream '{stream}': {message}")]
    Validation { stream: String, message: String },

    #[error("Field mapping failed for stream '{stream}': {message}")]
    Mapping { stream: String, message: String },

    // ============================================================================
    // Source Errors
    // ============================================================================
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Query failed for stream '{stream}': {message}")]
    Query { stream: String, message: String },

    #[error("Key filter unavailable for stream '{stream}': {message}")]
    KeyFilter { stream: String, message: String },

    #[error("Stream '{stream}' not found in catalog")]
    StreamNotFound { stream: String },

    // ============================================================================
    // HTTP Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Max attempts ({max_attempts}) exceeded: {last_error}")]
    MaxAttemptsExceeded {
        max_attempts: u32,
        last_error: String,
    },

    #[error("Delivery failed for stream '{stream}': {message}")]
    Delivery { stream: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    #[error("Run ended before all streams completed; missing: {}", missing.join(", "))]
    IncompleteRun { missing: Vec<String> },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a missing key error for a message line
    pub fn missing_key(key: impl Into<String>, line: impl Into<String>) -> Self {
        Self::MissingKey {
            key: key.into(),
            line: line.into(),
        }
    }

    /// Create a validation error
    pub fn validation(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a mapping error
    pub fn mapping(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a key filter error
    pub fn key_filter(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyFilter {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Check if this error is retryable (network failure or 5xx)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this error is a permanent client-side rejection (4xx)
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::HttpStatus { status, .. } if (400..500).contains(status))
    }

    /// Check if this error is a violation of the message protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. }
                | Error::MissingKey { .. }
                | Error::UnknownMessageType { .. }
                | Error::CommingledStreams { .. }
                | Error::SchemaNotSeen { .. }
        )
    }
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

/// Result type alias for warehouse-relay
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
