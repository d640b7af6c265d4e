//! EPG load & prune stage
//!
//! Loads guide programs for the proxy's EPG sources within the configured
//! horizon and prunes everything the output cannot use: programs for
//! channels that did not survive filtering, programs with non-positive
//! duration, and duplicates across sources (earlier-priority source wins).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EpgConfig;
use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, StageResult};
use crate::repositories::{EpgProgramRepository, ProxyConfigRepository};

pub struct EpgLoadStage {
    proxy_config: Arc<dyn ProxyConfigRepository>,
    programs: Arc<dyn EpgProgramRepository>,
    config: EpgConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl EpgLoadStage {
    pub fn new(
        proxy_config: Arc<dyn ProxyConfigRepository>,
        programs: Arc<dyn EpgProgramRepository>,
        config: EpgConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            proxy_config,
            programs,
            config,
            progress,
        }
    }
}

#[async_trait]
impl PipelineStage for EpgLoadStage {
    fn stage_id(&self) -> &'static str {
        "epg_load"
    }

    fn stage_name(&self) -> &'static str {
        "EPG Load"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let referenced: HashSet<&str> = state
            .channels
            .iter()
            .filter_map(|c| c.tvg_id.as_deref())
            .filter(|id| !id.is_empty())
            .collect();

        let sources = self
            .proxy_config
            .epg_sources_for_proxy(state.proxy.id)
            .await?;
        let total = sources.len();

        let from = Utc::now();
        let to = from + Duration::days(self.config.days_to_fetch as i64);

        let mut kept = Vec::new();
        let mut seen: HashMap<(String, i64), ()> = HashMap::new();
        let mut orphaned = 0usize;
        let mut invalid = 0usize;
        let mut duplicates = 0usize;

        for (index, source) in sources.into_iter().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.progress
                .report_item_progress(self.stage_id(), index, total, &source.name);

            let programs = self.programs.programs_for_source(source.id, from, to).await?;
            for program in programs {
                if !referenced.contains(program.channel_id.as_str()) {
                    orphaned += 1;
                    continue;
                }
                if !program.is_valid() {
                    invalid += 1;
                    continue;
                }
                let key = (program.channel_id.clone(), program.start.timestamp());
                if seen.insert(key, ()).is_some() {
                    duplicates += 1;
                    debug!(
                        "dropping duplicate program '{}' on '{}' from lower-priority source '{}'",
                        program.title, program.channel_id, source.name
                    );
                    continue;
                }
                kept.push(program);
            }
        }

        let count = kept.len();
        state.programs = kept;
        info!(
            "loaded {count} programs within {} days ({orphaned} orphaned, {invalid} invalid, {duplicates} duplicates pruned)",
            self.config.days_to_fetch
        );

        let artifact = Artifact::new(ArtifactKind::Channels, ArtifactStage::Raw, self.stage_id())
            .with_record_count(count)
            .with_metadata("orphaned", serde_json::json!(orphaned))
            .with_metadata("invalid", serde_json::json!(invalid))
            .with_metadata("duplicates", serde_json::json!(duplicates));
        Ok(StageResult::new(count, format!("{count} programs loaded")).with_artifact(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EpgSource, EpgSourceType, StreamProxy};
    use crate::pipeline::state::test_support;
    use crate::pipeline::traits::LogProgressReporter;
    use crate::repositories::InMemoryRepository;

    #[tokio::test]
    async fn prunes_orphans_and_respects_horizon() {
        let repo = InMemoryRepository::new();
        let proxy = StreamProxy::new("p");
        let guide = EpgSource::new("guide", EpgSourceType::Xmltv, "http://g/guide.xml");
        repo.insert_epg_source(guide.clone()).await;
        repo.assign_epg_source(proxy.id, guide.id, 1).await;

        let now = Utc::now();
        let in_horizon = {
            let mut p = test_support::program(guide.id, "known");
            p.start = now + Duration::hours(1);
            p.stop = p.start + Duration::minutes(30);
            p
        };
        let orphan = {
            let mut p = test_support::program(guide.id, "unknown");
            p.start = now + Duration::hours(1);
            p.stop = p.start + Duration::minutes(30);
            p
        };
        let beyond = {
            let mut p = test_support::program(guide.id, "known");
            p.start = now + Duration::days(30);
            p.stop = p.start + Duration::minutes(30);
            p
        };
        repo.replace_source_programs(guide.id, vec![in_horizon, orphan, beyond])
            .await
            .unwrap();

        let mut state = PipelineState::new(proxy, std::env::temp_dir(), "");
        let source_id = ulid::Ulid::new();
        state.channels = vec![test_support::channel(source_id, "known", "Known")];

        let mut stage = EpgLoadStage::new(
            Arc::new(repo.clone()),
            Arc::new(repo),
            EpgConfig::default(),
            Arc::new(LogProgressReporter),
        );
        let result = stage
            .execute(&CancellationToken::new(), &mut state)
            .await
            .unwrap();

        assert_eq!(result.records_processed, 1);
        assert_eq!(state.programs.len(), 1);
        assert_eq!(state.programs[0].channel_id, "known");
    }

    #[tokio::test]
    async fn duplicate_programs_across_sources_keep_first() {
        let repo = InMemoryRepository::new();
        let proxy = StreamProxy::new("p");
        let primary = EpgSource::new("primary", EpgSourceType::Xmltv, "http://a/g.xml");
        let backup = EpgSource::new("backup", EpgSourceType::Xmltv, "http://b/g.xml");
        repo.insert_epg_source(primary.clone()).await;
        repo.insert_epg_source(backup.clone()).await;
        repo.assign_epg_source(proxy.id, primary.id, 1).await;
        repo.assign_epg_source(proxy.id, backup.id, 2).await;

        let start = Utc::now() + Duration::hours(1);
        let make = |source_id, title: &str| {
            let mut p = test_support::program(source_id, "ch");
            p.start = start;
            p.stop = start + Duration::minutes(30);
            p.title = title.to_string();
            p
        };
        repo.replace_source_programs(primary.id, vec![make(primary.id, "From Primary")])
            .await
            .unwrap();
        repo.replace_source_programs(backup.id, vec![make(backup.id, "From Backup")])
            .await
            .unwrap();

        let mut state = PipelineState::new(proxy, std::env::temp_dir(), "");
        state.channels = vec![test_support::channel(ulid::Ulid::new(), "ch", "Chan")];

        let mut stage = EpgLoadStage::new(
            Arc::new(repo.clone()),
            Arc::new(repo),
            EpgConfig::default(),
            Arc::new(LogProgressReporter),
        );
        stage
            .execute(&CancellationToken::new(), &mut state)
            .await
            .unwrap();

        assert_eq!(state.programs.len(), 1);
        assert_eq!(state.programs[0].title, "From Primary");
    }
}
