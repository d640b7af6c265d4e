//! Pipeline error types
//!
//! Stage execution has its own error type: a stage error is fatal for the
//! run (remaining stages are skipped, cleanups still fire), while non-fatal
//! problems travel in `PipelineState::errors` instead of here.

use thiserror::Error;

use crate::errors::AppError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Filesystem operation failed
    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// Stage execution failed
    #[error("Stage '{stage}' execution failed: {message}")]
    StageExecution { stage: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The ingestion guard gave up waiting for active ingestions
    #[error("Timed out waiting for ingestions to finish; still active: {}", .still_active.join(", "))]
    IngestionWaitTimeout { still_active: Vec<String> },

    /// Atomic publication failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The run was cancelled
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An application error crossing into the pipeline
    #[error(transparent)]
    App(AppError),
}

impl PipelineError {
    /// Create a stage execution error
    pub fn stage_error(stage: &str, message: impl Into<String>) -> Self {
        PipelineError::StageExecution {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled | PipelineError::App(AppError::Cancelled)
        )
    }
}

impl From<AppError> for PipelineError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::App(other),
        }
    }
}

impl From<path_sandbox::SandboxError> for PipelineError {
    fn from(error: path_sandbox::SandboxError) -> Self {
        match error {
            path_sandbox::SandboxError::Cancelled { .. } => PipelineError::Cancelled,
            other => PipelineError::PublishFailed(other.to_string()),
        }
    }
}
