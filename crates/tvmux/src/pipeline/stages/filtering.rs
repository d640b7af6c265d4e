//! Filtering stage
//!
//! Evaluates the proxy's active filter assignments in order. Include
//! filters compose by union (no include filters means "include all");
//! exclude filters then subtract their matches.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::models::{FilterAction, FilterSourceType};
use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, RuleEvaluator, StageResult};
use crate::repositories::{AssignedFilter, ProxyConfigRepository};

pub struct FilteringStage {
    proxy_config: Arc<dyn ProxyConfigRepository>,
    evaluator: Option<Arc<dyn RuleEvaluator>>,
    progress: Arc<dyn ProgressReporter>,
}

impl FilteringStage {
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
impl PipelineStage for FilteringStage {
    fn stage_id(&self) -> &'static str {
        "apply_filters"
    }

    fn stage_name(&self) -> &'static str {
        "Apply Filters"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let Some(evaluator) = self.evaluator.clone() else {
            return Ok(StageResult::new(state.channels.len(), "no evaluator configured"));
        };

        let assigned: Vec<AssignedFilter> = self
            .proxy_config
            .filters_for_proxy(state.proxy.id)
            .await?
            .into_iter()
            .filter(|a| a.is_active && a.filter.source_type == FilterSourceType::Stream)
            .collect();

        if assigned.is_empty() {
            return Ok(StageResult::new(state.channels.len(), "no active filters"));
        }

        let includes: Vec<&AssignedFilter> = assigned
            .iter()
            .filter(|a| a.filter.action == FilterAction::Include)
            .collect();
        let excludes: Vec<&AssignedFilter> = assigned
            .iter()
            .filter(|a| a.filter.action == FilterAction::Exclude)
            .collect();

        let before = state.channels.len();
        let channels = std::mem::take(&mut state.channels);
        let mut kept = Vec::with_capacity(channels.len());
        let mut eval_failures = 0usize;

        for (index, channel) in channels.into_iter().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if index % 500 == 0 {
                self.progress.report_item_progress(
                    self.stage_id(),
                    index,
                    before,
                    &channel.channel_name,
                );
            }

            // An empty include set means everything is included.
            let mut included = includes.is_empty();
            for assignment in &includes {
                match evaluator.test(&assignment.filter.expression, &channel) {
                    Ok(true) => {
                        included = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        eval_failures += 1;
                        state.errors.push(crate::pipeline::state::StageError {
                            stage: "apply_filters".to_string(),
                            message: format!(
                                "filter '{}' failed on channel '{}': {e}",
                                assignment.filter.name, channel.channel_name
                            ),
                        });
                    }
                }
            }
            if !included {
                continue;
            }

            let mut excluded = false;
            for assignment in &excludes {
                match evaluator.test(&assignment.filter.expression, &channel) {
                    Ok(true) => {
                        excluded = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        eval_failures += 1;
                        state.errors.push(crate::pipeline::state::StageError {
                            stage: "apply_filters".to_string(),
                            message: format!(
                                "filter '{}' failed on channel '{}': {e}",
                                assignment.filter.name, channel.channel_name
                            ),
                        });
                    }
                }
            }
            if !excluded {
                kept.push(channel);
            }
        }

        let after = kept.len();
        state.channels = kept;
        info!(
            "filtering kept {after}/{before} channels ({} filters, {eval_failures} eval failures)",
            assigned.len()
        );

        let artifact = Artifact::new(ArtifactKind::Channels, ArtifactStage::Raw, self.stage_id())
            .with_record_count(after)
            .with_metadata("removed", serde_json::json!(before - after));
        Ok(StageResult::new(after, format!("{after}/{before} channels kept")).with_artifact(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppResult;
    use crate::models::{Channel, DataMappingRule, Filter, StreamProxy};
    use crate::pipeline::state::test_support;
    use crate::pipeline::traits::LogProgressReporter;
    use crate::repositories::InMemoryRepository;
    use ulid::Ulid;

    struct SubstringEvaluator;

    impl RuleEvaluator for SubstringEvaluator {
        fn test(&self, expression: &str, channel: &Channel) -> AppResult<bool> {
            Ok(channel.channel_name.contains(expression))
        }

        fn apply(&self, _rule: &DataMappingRule, _channel: &mut Channel) -> AppResult<bool> {
            Ok(false)
        }
    }

    fn filter(name: &str, action: FilterAction, expression: &str) -> Filter {
        Filter {
            id: Ulid::new(),
            name: name.to_string(),
            source_type: FilterSourceType::Stream,
            action,
            expression: expression.to_string(),
            is_system: false,
        }
    }

    async fn run_with_filters(
        filters: Vec<(Filter, bool)>,
        names: &[&str],
    ) -> Vec<String> {
        let repo = InMemoryRepository::new();
        let proxy = StreamProxy::new("p");
        for (order, (f, active)) in filters.into_iter().enumerate() {
            repo.insert_filter(f.clone()).await;
            repo.assign_filter(proxy.id, f.id, order as i32, active).await;
        }

        let source_id = Ulid::new();
        let mut state = PipelineState::new(proxy, std::env::temp_dir(), "");
        state.channels = names
            .iter()
            .map(|name| test_support::channel(source_id, "", name))
            .collect();

        let mut stage = FilteringStage::new(
            Arc::new(repo),
            Some(Arc::new(SubstringEvaluator)),
            Arc::new(LogProgressReporter),
        );
        stage
            .execute(&CancellationToken::new(), &mut state)
            .await
            .unwrap();
        state
            .channels
            .iter()
            .map(|c| c.channel_name.clone())
            .collect()
    }

    #[tokio::test]
    async fn include_filters_union() {
        let kept = run_with_filters(
            vec![
                (filter("news", FilterAction::Include, "News"), true),
                (filter("sport", FilterAction::Include, "Sport"), true),
            ],
            &["News One", "Sport Two", "Movies Three"],
        )
        .await;
        assert_eq!(kept, vec!["News One", "Sport Two"]);
    }

    #[tokio::test]
    async fn exclude_subtracts_from_include_all() {
        let kept = run_with_filters(
            vec![(filter("no-movies", FilterAction::Exclude, "Movies"), true)],
            &["News One", "Movies Three"],
        )
        .await;
        assert_eq!(kept, vec!["News One"]);
    }

    #[tokio::test]
    async fn inactive_assignments_do_not_apply() {
        let kept = run_with_filters(
            vec![(filter("no-movies", FilterAction::Exclude, "Movies"), false)],
            &["News One", "Movies Three"],
        )
        .await;
        assert_eq!(kept, vec!["News One", "Movies Three"]);
    }

    #[tokio::test]
    async fn include_and_exclude_compose() {
        let kept = run_with_filters(
            vec![
                (filter("hd-only", FilterAction::Include, "HD"), true),
                (filter("no-adult", FilterAction::Exclude, "XXX"), true),
            ],
            &["News HD", "News SD", "XXX HD"],
        )
        .await;
        assert_eq!(kept, vec!["News HD"]);
    }
}
