//! Channel load stage
//!
//! Loads the channels of every source assigned to the proxy, in priority
//! order, merging on channel identity: when two sources claim the same
//! `tvg_id` (or `ext_id` when no tvg id exists), the earlier-priority
//! source wins and the loser is dropped with a non-fatal error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, StageResult};
use crate::repositories::{ChannelRepository, ProxyConfigRepository};

pub struct ChannelLoadStage {
    proxy_config: Arc<dyn ProxyConfigRepository>,
    channels: Arc<dyn ChannelRepository>,
    progress: Arc<dyn ProgressReporter>,
}

impl ChannelLoadStage {
    pub fn new(
        proxy_config: Arc<dyn ProxyConfigRepository>,
        channels: Arc<dyn ChannelRepository>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            proxy_config,
            channels,
            progress,
        }
    }
}

#[async_trait]
impl PipelineStage for ChannelLoadStage {
    fn stage_id(&self) -> &'static str {
        "channel_load"
    }

    fn stage_name(&self) -> &'static str {
        "Channel Load"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let sources = self.proxy_config.sources_for_proxy(state.proxy.id).await?;
        let total = sources.len();

        let mut merged = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut duplicates = 0usize;

        for (index, source) in sources.into_iter().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.progress
                .report_item_progress(self.stage_id(), index, total, &source.name);

            let channels = self.channels.channels_for_source(source.id).await?;
            for channel in channels {
                let key = channel.merge_key().to_string();
                if let Some(winner) = seen.get(&key) {
                    duplicates += 1;
                    state.add_error(
                        self.stage_id(),
                        format!(
                            "dropped duplicate channel '{}' from source '{}' (id '{key}' already provided by '{winner}')",
                            channel.channel_name, source.name
                        ),
                    );
                    continue;
                }
                seen.insert(key, source.name.clone());
                merged.push(channel);
            }
        }

        let count = merged.len();
        state.channels = merged;
        info!(
            "loaded {count} channels for proxy '{}' ({duplicates} duplicates dropped)",
            state.proxy.name
        );

        let artifact = Artifact::new(ArtifactKind::Channels, ArtifactStage::Raw, self.stage_id())
            .with_record_count(count)
            .with_metadata("duplicates_dropped", serde_json::json!(duplicates));
        Ok(StageResult::new(count, format!("{count} channels loaded")).with_artifact(artifact))
    }
}
