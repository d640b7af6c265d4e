//! Pipeline contracts
//!
//! The stage interface, the progress seam, the dependency bundle stages are
//! constructed from, and the evaluator seam for the external expression
//! engine.

use std::sync::Arc;

use async_trait::async_trait;
use path_sandbox::PathSandbox;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::ingestor::state_manager::IngestionStateView;
use crate::models::{Channel, DataMappingRule};
use crate::repositories::{ChannelRepository, EpgProgramRepository, ProxyConfigRepository};

use super::artifacts::Artifact;
use super::error::PipelineError;
use super::state::PipelineState;

/// Outcome of one executed stage. Artifacts are appended to the shared
/// state by the orchestrator.
#[derive(Debug, Default)]
pub struct StageResult {
    pub records_processed: usize,
    pub message: String,
    pub artifacts: Vec<Artifact>,
}

impl StageResult {
    pub fn new(records_processed: usize, message: impl Into<String>) -> Self {
        Self {
            records_processed,
            message: message.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// One step of the generation pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stable identifier used in progress reporting and error records.
    fn stage_id(&self) -> &'static str;

    /// Human-readable name.
    fn stage_name(&self) -> &'static str;

    /// Run the stage against the shared state. A returned error aborts the
    /// pipeline; non-fatal problems belong in `state.errors`.
    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError>;

    /// Release any resources. Invoked for every constructed stage in
    /// reverse order, also when an earlier stage failed.
    async fn cleanup(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Progress reporting seam. The default implementation logs via `tracing`;
/// embedding applications plug their own fan-out here.
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, stage_id: &str, fraction: f64, message: &str);

    fn report_item_progress(&self, stage_id: &str, current: usize, total: usize, item: &str) {
        let fraction = if total > 0 {
            (current as f64 / total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.report_progress(stage_id, fraction, item);
    }
}

/// Logger-backed progress reporter.
#[derive(Debug, Default)]
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn report_progress(&self, stage_id: &str, fraction: f64, message: &str) {
        debug!(
            "stage {stage_id}: {:>3.0}% - {message}",
            fraction * 100.0
        );
    }
}

/// Seam to the external expression engine. The filter / mapping DSL lives
/// outside this crate; the pipeline only tests expressions and applies a
/// rule's SET clauses through this trait.
pub trait RuleEvaluator: Send + Sync {
    /// Does `expression` match the channel?
    fn test(&self, expression: &str, channel: &Channel) -> AppResult<bool>;

    /// Apply the rule to the channel (mutating it through its SET clauses
    /// when the expression matches). Returns whether it matched.
    fn apply(&self, rule: &DataMappingRule, channel: &mut Channel) -> AppResult<bool>;
}

/// Everything stages are built from.
#[derive(Clone)]
pub struct StageDependencies {
    pub config: AppConfig,
    pub proxy_config: Arc<dyn ProxyConfigRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub programs: Arc<dyn EpgProgramRepository>,
    pub evaluator: Option<Arc<dyn RuleEvaluator>>,
    pub ingestion_state: Option<Arc<dyn IngestionStateView>>,
    pub output_sandbox: PathSandbox,
    pub progress: Arc<dyn ProgressReporter>,
}
