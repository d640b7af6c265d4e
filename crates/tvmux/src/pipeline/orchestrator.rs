//! Pipeline orchestrator
//!
//! Runs stages strictly in order against one shared state. The first stage
//! error aborts the run (remaining stages are skipped) but `cleanup` still
//! fires on every constructed stage, in reverse order, and the temp
//! directory is removed either way. Non-fatal problems collected in the
//! state travel into the final report.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::artifacts::Artifact;
use super::error::PipelineError;
use super::stages::{
    ChannelLoadStage, DataMappingStage, EpgLoadStage, FilteringStage, GenerateM3uStage,
    GenerateXmltvStage, IngestionGuardStage, PublishStage,
};
use super::state::{PipelineState, StageError};
use super::traits::{PipelineStage, StageDependencies};

/// Outcome of a full pipeline run.
#[derive(Debug)]
pub struct PipelineExecution {
    pub success: bool,
    pub stage_failed: Option<String>,
    pub error_message: Option<String>,
    pub non_fatal_errors: Vec<StageError>,
    pub artifacts: Vec<Artifact>,
    pub duration: Duration,
}

impl PipelineExecution {
    pub fn was_cancelled(&self) -> bool {
        self.error_message
            .as_deref()
            .is_some_and(|msg| msg.contains("cancelled"))
    }
}

/// A sequence of stages bound to one proxy generation run.
pub struct Pipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self { stages }
    }

    /// The standard stage sequence.
    pub fn standard(deps: &StageDependencies) -> Self {
        Self::new(vec![
            Box::new(IngestionGuardStage::new(
                deps.ingestion_state.clone(),
                deps.config.ingestion_guard.clone(),
                deps.progress.clone(),
            )),
            Box::new(ChannelLoadStage::new(
                deps.proxy_config.clone(),
                deps.channels.clone(),
                deps.progress.clone(),
            )),
            Box::new(DataMappingStage::new(
                deps.proxy_config.clone(),
                deps.evaluator.clone(),
                deps.progress.clone(),
            )),
            Box::new(FilteringStage::new(
                deps.proxy_config.clone(),
                deps.evaluator.clone(),
                deps.progress.clone(),
            )),
            Box::new(EpgLoadStage::new(
                deps.proxy_config.clone(),
                deps.programs.clone(),
                deps.config.epg.clone(),
                deps.progress.clone(),
            )),
            Box::new(GenerateM3uStage::new(deps.progress.clone())),
            Box::new(GenerateXmltvStage::new(deps.progress.clone())),
            Box::new(PublishStage::new(
                deps.output_sandbox.clone(),
                deps.progress.clone(),
            )),
        ])
    }

    /// Run the pipeline to completion (or first failure), clean up, and
    /// report.
    pub async fn execute(
        mut self,
        token: &CancellationToken,
        mut state: PipelineState,
    ) -> PipelineExecution {
        let started = Instant::now();
        let mut failure: Option<(String, PipelineError)> = None;

        for stage in self.stages.iter_mut() {
            if token.is_cancelled() {
                failure = Some((stage.stage_id().to_string(), PipelineError::Cancelled));
                break;
            }
            info!("executing stage '{}'", stage.stage_name());
            match stage.execute(token, &mut state).await {
                Ok(result) => {
                    info!(
                        "stage '{}' done: {} ({} records)",
                        stage.stage_name(),
                        result.message,
                        result.records_processed
                    );
                    state.artifacts.extend(result.artifacts);
                }
                Err(e) => {
                    warn!("stage '{}' failed: {e}", stage.stage_name());
                    failure = Some((stage.stage_id().to_string(), e));
                    break;
                }
            }
        }

        for stage in self.stages.iter_mut().rev() {
            if let Err(e) = stage.cleanup().await {
                warn!("cleanup of stage '{}' failed: {e}", stage.stage_name());
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&state.temp_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "failed to remove temp dir {}: {e}",
                    state.temp_dir.display()
                );
            }
        }

        let (stage_failed, error_message) = match &failure {
            Some((stage, error)) => (Some(stage.clone()), Some(error.to_string())),
            None => (None, None),
        };

        PipelineExecution {
            success: failure.is_none(),
            stage_failed,
            error_message,
            non_fatal_errors: state.errors,
            artifacts: state.artifacts,
            duration: started.elapsed(),
        }
    }
}
