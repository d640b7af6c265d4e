//! Error type definitions
//!
//! A hierarchical error system: a top-level [`AppError`] for everything the
//! crate surfaces, with a scoped [`SourceError`] for ingestion-facing
//! failures. Pipeline stage execution has its own error type in
//! `crate::pipeline::error`.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Source handling errors (fetch, parse, validation)
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Validation errors outside the source scope
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// An ingestion for the same source is already running
    #[error("Ingestion already in progress for source {source_id}")]
    AlreadyInProgress { source_id: String },

    /// Operation aborted by cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// A per-item consumer callback returned an error and aborted the run
    #[error("Callback aborted: {message}")]
    CallbackAborted { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Source handling specific errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Invalid source configuration (missing URL, credentials, wrong type)
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    /// URL scheme outside http / https / file
    #[error("Unsupported URL scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// Transport failure or non-200 HTTP status
    #[error("Fetch failed{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    FetchFailed { status: Option<u16>, message: String },

    /// Malformed payload that prevents any progress
    #[error("Parse failure: {format} - {message}")]
    ParseFailure { format: String, message: String },

    /// Timezone offset string outside the accepted grammar
    #[error("Invalid timezone offset: {value}")]
    InvalidOffset { value: String },

    /// Authentication against a remote API failed
    #[error("Authentication failed: {source_type} - {message}")]
    AuthenticationFailed {
        source_type: String,
        message: String,
    },

    /// The manual source handler was constructed without a repository
    #[error("No repository configured for manual sources")]
    NoRepositoryConfigured,
}

impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a callback-aborted error
    pub fn callback_aborted<S: Into<String>>(message: S) -> Self {
        Self::CallbackAborted {
            message: message.into(),
        }
    }

    /// Whether this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl SourceError {
    /// Create an invalid-configuration error
    pub fn invalid_config<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a fetch-failed error without an HTTP status
    pub fn fetch_failed<M: Into<String>>(message: M) -> Self {
        Self::FetchFailed {
            status: None,
            message: message.into(),
        }
    }

    /// Create a fetch-failed error for a rejected HTTP status
    pub fn fetch_status<M: Into<String>>(status: u16, message: M) -> Self {
        Self::FetchFailed {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a parse-failure error
    pub fn parse_failure<F: Into<String>, M: Into<String>>(format: F, message: M) -> Self {
        Self::ParseFailure {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create an authentication-failed error
    pub fn auth_failed<S: Into<String>, M: Into<String>>(source_type: S, message: M) -> Self {
        Self::AuthenticationFailed {
            source_type: source_type.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failed_display_includes_status() {
        let e = SourceError::fetch_status(503, "upstream unavailable");
        assert_eq!(
            e.to_string(),
            "Fetch failed (status 503): upstream unavailable"
        );
        let e = SourceError::fetch_failed("connection refused");
        assert_eq!(e.to_string(), "Fetch failed: connection refused");
    }

    #[test]
    fn cancelled_is_detectable_through_source_wrapping() {
        assert!(AppError::Cancelled.is_cancelled());
        assert!(!AppError::validation("nope").is_cancelled());
    }
}
