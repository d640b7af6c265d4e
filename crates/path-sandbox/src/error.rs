//! Error types for sandboxed filesystem operations.

use std::path::PathBuf;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while operating inside a [`crate::PathSandbox`].
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Path validation failed - the path would leave the sandbox
    #[error("Path validation failed: {path:?} - {reason}")]
    PathValidation { path: PathBuf, reason: String },

    /// Directory creation failed
    #[error("Failed to create directory: {path:?} - {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Atomic promotion failed; the destination is untouched
    #[error("Promotion failed: {source_path:?} -> {dest:?} - {reason}")]
    Promotion {
        source_path: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    /// Operation cancelled mid-copy; the partial `.tmp` file was removed
    #[error("Promotion cancelled: {dest:?}")]
    Cancelled { dest: PathBuf },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}
