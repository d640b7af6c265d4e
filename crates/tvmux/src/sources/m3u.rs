//! M3U source handler
//!
//! Fetches a playlist over http(s) or from a local file and stream-parses it
//! into channels. Entries inherit their identity from `tvg-id` when present
//! and from the stream URL otherwise; repeated identities within one source
//! are dropped (the source-scoped uniqueness invariant) and surface as
//! non-fatal error counts.

use std::collections::HashSet;
use std::io::Cursor;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use super::traits::{ChannelSink, IngestSummary, SourceHandler};
use crate::errors::{AppError, AppResult, SourceError};
use crate::ingestor::m3u::{M3uEntry, M3uParser};
use crate::models::{Channel, StreamSource, StreamSourceType};
use crate::utils::fetch::{PayloadKind, ResourceFetcher};
use crate::utils::url::UrlUtils;

/// Handler for plain M3U playlist sources.
pub struct M3uSourceHandler {
    fetcher: ResourceFetcher,
}

impl M3uSourceHandler {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SourceHandler for M3uSourceHandler {
    fn source_type(&self) -> StreamSourceType {
        StreamSourceType::M3u
    }

    fn validate(&self, source: &StreamSource) -> AppResult<()> {
        if source.source_type != StreamSourceType::M3u {
            return Err(SourceError::invalid_config(
                "source_type",
                format!("expected m3u, got {}", source.source_type),
            )
            .into());
        }
        if source.url.is_empty() {
            return Err(SourceError::invalid_config("url", "URL is required").into());
        }
        UrlUtils::parse_and_validate(&source.url).map_err(|e| {
            AppError::from(SourceError::invalid_config("url", e.to_string()))
        })?;
        Ok(())
    }

    async fn ingest(
        &self,
        token: &CancellationToken,
        source: &StreamSource,
        sink: &mut ChannelSink<'_>,
    ) -> AppResult<IngestSummary> {
        self.validate(source)?;

        debug!(
            "ingesting M3U source '{}' from {}",
            source.name,
            UrlUtils::obfuscate_credentials(&source.url)
        );

        let content = self
            .fetcher
            .fetch_bytes(token, &source.url, PayloadKind::M3u)
            .await?;

        let mut seen_ext_ids: HashSet<String> = HashSet::new();
        let mut duplicates = 0u64;
        let mut line_errors = 0u64;

        let mut on_entry = |entry: M3uEntry| -> AppResult<()> {
            let channel = entry_to_channel(entry, source);
            if !seen_ext_ids.insert(channel.ext_id.clone()) {
                duplicates += 1;
                debug!(
                    "skipping duplicate channel '{}' (ext_id {})",
                    channel.channel_name, channel.ext_id
                );
                return Ok(());
            }
            sink(channel)
        };
        let mut on_error = |line: usize, msg: &str| {
            line_errors += 1;
            debug!("playlist anomaly at line {line}: {msg}");
        };

        let summary = M3uParser::parse(
            Cursor::new(content),
            token,
            &mut on_entry,
            &mut on_error,
        )?;
        drop(on_entry);
        drop(on_error);

        if duplicates > 0 {
            info!(
                "removed {duplicates} duplicate entries from M3U source '{}'",
                source.name
            );
        }
        info!(
            "parsed {} channels from M3U source '{}'",
            summary.entries as u64 - duplicates,
            source.name
        );

        Ok(IngestSummary {
            processed: summary.entries as u64 - duplicates,
            errors: duplicates + line_errors + summary.skipped as u64,
        })
    }
}

/// Translate a playlist entry into the channel model.
fn entry_to_channel(entry: M3uEntry, source: &StreamSource) -> Channel {
    let now = Utc::now();
    let channel_name = if !entry.title.is_empty() {
        entry.title.clone()
    } else if let Some(name) = entry.tvg_name.clone().filter(|n| !n.is_empty()) {
        name
    } else {
        last_path_segment(&entry.url).unwrap_or_else(|| "Unknown".to_string())
    };

    let ext_id = entry
        .tvg_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| entry.url.clone());

    let extra = if entry.extra.is_empty() {
        None
    } else {
        serde_json::to_string(&entry.extra).ok()
    };

    Channel {
        id: Ulid::new(),
        source_id: source.id,
        ext_id,
        tvg_id: entry.tvg_id,
        tvg_name: entry.tvg_name,
        tvg_logo: entry.tvg_logo,
        group_title: entry.group_title,
        channel_name,
        channel_number: entry.channel_number,
        stream_url: entry.url,
        stream_type: None,
        language: None,
        country: None,
        is_adult: false,
        extra,
        created_at: now,
        updated_at: now,
    }
}

fn last_path_segment(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use crate::utils::circuit_breaker::CircuitBreakerRegistry;
    use std::io::Write;

    fn handler() -> M3uSourceHandler {
        M3uSourceHandler::new(ResourceFetcher::new(
            FetcherConfig::default(),
            CircuitBreakerRegistry::default(),
        ))
    }

    fn file_source(content: &str) -> (tempfile::NamedTempFile, StreamSource) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let url = format!("file://{}", file.path().display());
        (file, StreamSource::new("test", StreamSourceType::M3u, url))
    }

    #[test]
    fn validate_rejects_wrong_type_and_scheme() {
        let handler = handler();
        let source = StreamSource::new("x", StreamSourceType::Xtream, "http://h/pl.m3u");
        assert!(handler.validate(&source).is_err());

        let source = StreamSource::new("x", StreamSourceType::M3u, "ftp://h/pl.m3u");
        assert!(handler.validate(&source).is_err());

        let source = StreamSource::new("x", StreamSourceType::M3u, "");
        assert!(handler.validate(&source).is_err());
    }

    #[tokio::test]
    async fn ingest_maps_entries_to_channels() {
        let playlist = "#EXTM3U\n#EXTINF:-1 tvg-id=\"ch1\" tvg-name=\"A\" group-title=\"News\",News A HD\nhttp://x/a.m3u8\n#EXTINF:-1,\nhttp://x/b.m3u8\n";
        let (_file, source) = file_source(playlist);
        let mut channels = Vec::new();
        let mut sink = |c: Channel| {
            channels.push(c);
            Ok(())
        };
        let summary = handler()
            .ingest(&CancellationToken::new(), &source, &mut sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(summary.processed, 2);
        assert_eq!(channels[0].ext_id, "ch1");
        assert_eq!(channels[0].channel_name, "News A HD");
        assert_eq!(channels[0].group_title.as_deref(), Some("News"));
        // Entry without title or tvg-name falls back to the URL's last
        // segment, and to the URL itself for identity.
        assert_eq!(channels[1].channel_name, "b.m3u8");
        assert_eq!(channels[1].ext_id, "http://x/b.m3u8");
    }

    #[tokio::test]
    async fn duplicate_ext_ids_are_dropped_within_a_source() {
        let playlist = "#EXTINF:-1 tvg-id=\"dup\",First\nhttp://x/1.ts\n#EXTINF:-1 tvg-id=\"dup\",Second\nhttp://x/2.ts\n";
        let (_file, source) = file_source(playlist);
        let mut channels = Vec::new();
        let mut sink = |c: Channel| {
            channels.push(c);
            Ok(())
        };
        let summary = handler()
            .ingest(&CancellationToken::new(), &source, &mut sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].channel_name, "First");
    }

    #[tokio::test]
    async fn cancellation_mid_parse_stops_after_two_callbacks() {
        let mut playlist = String::from("#EXTM3U\n");
        for i in 0..100 {
            playlist.push_str(&format!("#EXTINF:-1 tvg-id=\"c{i}\",Chan {i}\nhttp://x/{i}.ts\n"));
        }
        let (_file, source) = file_source(&playlist);
        let token = CancellationToken::new();
        let cancel_handle = token.clone();
        let mut seen = 0usize;
        let mut sink = |_c: Channel| {
            seen += 1;
            if seen == 2 {
                cancel_handle.cancel();
            }
            Ok(())
        };
        let result = handler().ingest(&token, &source, &mut sink).await;
        drop(sink);

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn callback_error_propagates_unchanged() {
        let (_file, source) =
            file_source("#EXTINF:-1 tvg-id=\"a\",A\nhttp://x/a.ts\n");
        let mut sink =
            |_c: Channel| Err(AppError::callback_aborted("stop right there"));
        let result = handler()
            .ingest(&CancellationToken::new(), &source, &mut sink)
            .await;
        assert!(matches!(result, Err(AppError::CallbackAborted { .. })));
    }
}
