//! Xtream Codes source handler
//!
//! Ingests live streams from an Xtream portal: categories are fetched first
//! to resolve group titles, then every live stream becomes a channel whose
//! playable URL is the portal's `/live/{user}/{pass}/{id}.ts` form.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use super::traits::{ChannelSink, IngestSummary, SourceHandler};
use crate::errors::{AppError, AppResult, SourceError};
use crate::models::{Channel, StreamSource, StreamSourceType};
use crate::utils::fetch::{PayloadKind, ResourceFetcher};
use crate::xtream::{XtreamClient, XtreamStream};

/// Handler for Xtream Codes API sources.
pub struct XtreamSourceHandler {
    fetcher: ResourceFetcher,
}

impl XtreamSourceHandler {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }

    async fn client_for(&self, source: &StreamSource) -> AppResult<XtreamClient> {
        let username = source.username.as_deref().unwrap_or_default();
        let password = source.password.as_deref().unwrap_or_default();
        let host = url::Url::parse(&source.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        let breaker = self.fetcher.breakers().for_host(&host).await;
        XtreamClient::new(
            self.fetcher.http_client().clone(),
            Some(breaker),
            &source.url,
            username,
            password,
            self.fetcher.timeout_for(PayloadKind::Xtream),
        )
    }
}

#[async_trait]
impl SourceHandler for XtreamSourceHandler {
    fn source_type(&self) -> StreamSourceType {
        StreamSourceType::Xtream
    }

    fn validate(&self, source: &StreamSource) -> AppResult<()> {
        if source.source_type != StreamSourceType::Xtream {
            return Err(SourceError::invalid_config(
                "source_type",
                format!("expected xtream, got {}", source.source_type),
            )
            .into());
        }
        if source.url.is_empty() {
            return Err(SourceError::invalid_config("url", "URL is required").into());
        }
        if !source.url.starts_with("http://") && !source.url.starts_with("https://") {
            return Err(
                SourceError::invalid_config("url", "Xtream URL must be http or https").into(),
            );
        }
        if source.username.as_deref().unwrap_or_default().is_empty() {
            return Err(SourceError::invalid_config("username", "username is required").into());
        }
        if source.password.as_deref().unwrap_or_default().is_empty() {
            return Err(SourceError::invalid_config("password", "password is required").into());
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
        let client = self.client_for(source).await?;

        // Categories first; live streams only carry a category id.
        let categories = client.get_live_categories(token).await?;
        let category_names: HashMap<String, String> = categories
            .into_iter()
            .map(|c| (c.category_id, c.category_name))
            .collect();
        debug!(
            "resolved {} categories for Xtream source '{}'",
            category_names.len(),
            source.name
        );

        let streams = client.get_live_streams(token, None).await?;
        let mut summary = IngestSummary::default();

        for stream in streams {
            if token.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            sink(stream_to_channel(&stream, source, &client, &category_names))?;
            summary.processed += 1;
        }

        info!(
            "retrieved {} live channels from Xtream source '{}'",
            summary.processed, source.name
        );
        Ok(summary)
    }
}

fn stream_to_channel(
    stream: &XtreamStream,
    source: &StreamSource,
    client: &XtreamClient,
    category_names: &HashMap<String, String>,
) -> Channel {
    let now = Utc::now();
    let stream_url = client.live_stream_url(stream.stream_id, "ts");
    let group_title = stream
        .category_id
        .as_ref()
        .and_then(|id| category_names.get(id))
        .cloned();
    let tvg_id = stream
        .epg_channel_id
        .clone()
        .filter(|id| !id.is_empty());
    let ext_id = tvg_id.clone().unwrap_or_else(|| stream_url.clone());

    Channel {
        id: Ulid::new(),
        source_id: source.id,
        ext_id,
        tvg_id,
        tvg_name: Some(stream.name.clone()),
        tvg_logo: stream.stream_icon.clone(),
        group_title,
        channel_name: stream.name.clone(),
        channel_number: stream.num.and_then(|n| u32::try_from(n).ok()),
        stream_url,
        stream_type: Some("live".to_string()),
        language: None,
        country: None,
        is_adult: stream.is_adult,
        extra: None,
        created_at: now,
        updated_at: now,
    }
}
