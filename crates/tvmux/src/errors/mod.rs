//! Application error handling
//!
//! Re-exports the error types and defines the `AppResult` alias used across
//! the crate.

pub mod types;

pub use types::{AppError, SourceError};

/// Convenience result alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;
