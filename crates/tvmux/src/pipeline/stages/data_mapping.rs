//! Data mapping stage
//!
//! Applies the proxy's enabled mapping rules to every channel, ascending by
//! rule priority. A matching rule's SET clauses are applied through the
//! external evaluator; `stop_on_match` short-circuits the remaining rules
//! for that channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::FilterSourceType;
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, RuleEvaluator, StageResult};
use crate::repositories::ProxyConfigRepository;

pub struct DataMappingStage {
    proxy_config: Arc<dyn ProxyConfigRepository>,
    evaluator: Option<Arc<dyn RuleEvaluator>>,
    progress: Arc<dyn ProgressReporter>,
}

impl DataMappingStage {
    pub fn new(
        proxy_config: Arc<dyn ProxyConfigRepository>,
        evaluator: Option<Arc<dyn RuleEvaluator>>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            proxy_config,
            evaluator,
            progress,
        }
    }
}

#[async_trait]
impl PipelineStage for DataMappingStage {
    fn stage_id(&self) -> &'static str {
        "apply_data_mapping"
    }

    fn stage_name(&self) -> &'static str {
        "Apply Data Mapping"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let Some(evaluator) = self.evaluator.clone() else {
            debug!("no rule evaluator configured; skipping data mapping");
            return Ok(StageResult::new(0, "no evaluator configured"));
        };

        let mut assigned = self.proxy_config.rules_for_proxy(state.proxy.id).await?;
        assigned.retain(|a| {
            a.rule.is_enabled && a.rule.source_type == FilterSourceType::Stream
        });
        assigned.sort_by_key(|a| a.rule.priority);

        if assigned.is_empty() {
            return Ok(StageResult::new(0, "no mapping rules assigned"));
        }

        let total = state.channels.len();
        let mut matched_total = 0usize;
        let mut eval_failures = 0usize;

        for (index, channel) in state.channels.iter_mut().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            for assignment in &assigned {
                match evaluator.apply(&assignment.rule, channel) {
                    Ok(true) => {
                        matched_total += 1;
                        if assignment.rule.stop_on_match {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        eval_failures += 1;
                        state.errors.push(crate::pipeline::state::StageError {
                            stage: "apply_data_mapping".to_string(),
                            message: format!(
                                "rule '{}' failed on channel '{}': {e}",
                                assignment.rule.name, channel.channel_name
                            ),
                        });
                    }
                }
            }
            if index % 500 == 0 {
                self.progress
                    .report_item_progress(self.stage_id(), index, total, &channel.channel_name);
            }
        }

        info!(
            "applied {} mapping rules across {total} channels ({matched_total} matches, {eval_failures} failures)",
            assigned.len()
        );
        Ok(StageResult::new(
            total,
            format!("{matched_total} rule matches across {total} channels"),
        ))
    }
}
