//! Ingestion guard stage
//!
//! Gate before any real work: gives in-flight ingestions time to finish so
//! the pipeline observes a settled snapshot of the channel and program
//! stores. Polls the ingestion state at a configurable interval under a
//! deadline; on expiry the run fails with the names of the sources still
//! ingesting.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IngestionGuardConfig;
use crate::ingestor::state_manager::IngestionStateView;
use crate::models::IngestionStatus;
use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, StageResult};

pub struct IngestionGuardStage {
    view: Option<Arc<dyn IngestionStateView>>,
    config: IngestionGuardConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl IngestionGuardStage {
    pub fn new(
        view: Option<Arc<dyn IngestionStateView>>,
        config: IngestionGuardConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            view,
            config,
            progress,
        }
    }

    async fn still_active_names(view: &Arc<dyn IngestionStateView>) -> Vec<String> {
        view.get_all_states()
            .await
            .into_iter()
            .filter(|s| s.status == IngestionStatus::Ingesting)
            .map(|s| s.source_name)
            .collect()
    }
}

#[async_trait]
impl PipelineStage for IngestionGuardStage {
    fn stage_id(&self) -> &'static str {
        "ingestion_guard"
    }

    fn stage_name(&self) -> &'static str {
        "Ingestion Guard"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        _state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let Some(view) = self.view.clone().filter(|_| self.config.enabled) else {
            debug!("ingestion guard disabled; continuing immediately");
            return Ok(StageResult::new(0, "guard disabled"));
        };

        let started = Instant::now();
        let active_at_start = view.active_ingestion_count().await;
        if active_at_start == 0 {
            info!("no active ingestion detected; continuing immediately");
            return Ok(StageResult::new(0, "no ingestion active"));
        }

        info!(
            "{active_at_start} active ingestion(s); waiting up to {:?}",
            self.config.max_wait
        );

        loop {
            if started.elapsed() >= self.config.max_wait {
                let still_active = Self::still_active_names(&view).await;
                warn!(
                    "gave up waiting after {:?}; still active: {}",
                    self.config.max_wait,
                    still_active.join(", ")
                );
                return Err(PipelineError::IngestionWaitTimeout { still_active });
            }

            tokio::select! {
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if !view.is_any_ingesting().await {
                break;
            }
            let fraction = (started.elapsed().as_secs_f64()
                / self.config.max_wait.as_secs_f64())
            .clamp(0.0, 1.0);
            self.progress
                .report_progress(self.stage_id(), fraction, "waiting for ingestions");
        }

        let waited = started.elapsed();
        info!("ingestions settled after {waited:?}");
        let artifact = Artifact::new(ArtifactKind::Channels, ArtifactStage::Raw, self.stage_id())
            .with_metadata(
                "wait_ms",
                serde_json::json!(waited.as_millis() as u64),
            )
            .with_metadata("active_at_start", serde_json::json!(active_at_start));

        Ok(StageResult::new(0, format!("waited {waited:?}")).with_artifact(artifact))
    }
}
