//! Manual source handler
//!
//! Sources of type `manual` are backed by curated channel records in the
//! repository rather than a remote playlist. The handler materializes the
//! enabled records into regular channels.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use ulid::Ulid;

use super::traits::{ChannelSink, IngestSummary, SourceHandler};
use crate::errors::{AppError, AppResult, SourceError};
use crate::models::{Channel, ManualChannel, StreamSource, StreamSourceType};
use crate::repositories::ManualChannelRepository;

/// Handler for manually curated sources.
pub struct ManualSourceHandler {
    repository: Option<Arc<dyn ManualChannelRepository>>,
}

impl ManualSourceHandler {
    pub fn new(repository: Option<Arc<dyn ManualChannelRepository>>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl SourceHandler for ManualSourceHandler {
    fn source_type(&self) -> StreamSourceType {
        StreamSourceType::Manual
    }

    fn validate(&self, source: &StreamSource) -> AppResult<()> {
        if source.source_type != StreamSourceType::Manual {
            return Err(SourceError::invalid_config(
                "source_type",
                format!("expected manual, got {}", source.source_type),
            )
            .into());
        }
        Ok(())
    }

    async fn ingest(
        &self,
        token: &CancellationToken,
        source: &StreamSource,
        sink: &mut ChannelSink<'_>,
    ) -> AppResult<IngestSummary> {
        self.validate(source)?;

        let repository = self
            .repository
            .as_ref()
            .ok_or(AppError::Source(SourceError::NoRepositoryConfigured))?;

        let records = repository.enabled_channels_for_source(source.id).await?;
        let mut summary = IngestSummary::default();

        for record in records {
            if token.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            sink(materialize(record, source))?;
            summary.processed += 1;
        }

        info!(
            "materialized {} manual channels for source '{}'",
            summary.processed, source.name
        );
        Ok(summary)
    }
}

fn materialize(record: ManualChannel, source: &StreamSource) -> Channel {
    let now = Utc::now();
    let ext_id = record
        .tvg_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| record.stream_url.clone());
    Channel {
        id: Ulid::new(),
        source_id: source.id,
        ext_id,
        tvg_id: record.tvg_id,
        tvg_name: Some(record.channel_name.clone()),
        tvg_logo: record.tvg_logo,
        group_title: record.group_title,
        channel_name: record.channel_name,
        channel_number: None,
        stream_url: record.stream_url,
        stream_type: None,
        language: None,
        country: None,
        is_adult: false,
        extra: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryRepository;

    fn record(source_id: Ulid, name: &str, enabled: bool) -> ManualChannel {
        ManualChannel {
            id: Ulid::new(),
            source_id,
            channel_name: name.to_string(),
            tvg_id: Some(format!("{name}.id")),
            tvg_logo: None,
            group_title: Some("Curated".to_string()),
            stream_url: format!("http://x/{name}.ts"),
            is_enabled: enabled,
        }
    }

    #[tokio::test]
    async fn fails_without_repository() {
        let handler = ManualSourceHandler::new(None);
        let source = StreamSource::new("manual", StreamSourceType::Manual, "");
        let mut sink = |_c: Channel| -> AppResult<()> { Ok(()) };
        let err = handler
            .ingest(&CancellationToken::new(), &source, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Source(SourceError::NoRepositoryConfigured)
        ));
    }

    #[tokio::test]
    async fn materializes_only_enabled_records() {
        let repo = InMemoryRepository::new();
        let source = StreamSource::new("manual", StreamSourceType::Manual, "");
        repo.insert_manual_channel(record(source.id, "keep", true))
            .await;
        repo.insert_manual_channel(record(source.id, "skip", false))
            .await;

        let handler = ManualSourceHandler::new(Some(Arc::new(repo)));
        let mut channels = Vec::new();
        let mut sink = |c: Channel| {
            channels.push(c);
            Ok(())
        };
        let summary = handler
            .ingest(&CancellationToken::new(), &source, &mut sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(summary.processed, 1);
        assert_eq!(channels[0].channel_name, "keep");
        assert_eq!(channels[0].ext_id, "keep.id");
    }
}
