//! Xtream Codes EPG source handler
//!
//! Probes the portal's auth endpoint first (the server reports its own
//! timezone there), then ingests guide data one of two ways: the bulk
//! `/xmltv.php` document, or per-stream `get_simple_data_table` calls for
//! every live stream that carries an `epg_channel_id`. Per-stream failures
//! and per-listing anomalies are skipped so partial guide data survives a
//! flaky provider.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::traits::{EpgSourceHandler, IngestSummary, ProgramSink};
use super::xmltv_epg::programme_to_model;
use crate::errors::{AppError, AppResult, SourceError};
use crate::ingestor::xmltv::{XmltvChannel, XmltvParser, XmltvProgramme};
use crate::models::{EpgApiMethod, EpgProgram, EpgSource, EpgSourceType};
use crate::utils::fetch::{PayloadKind, ResourceFetcher};
use crate::utils::time::calculate_auto_shift;
use crate::xtream::{decode_base64_or_keep, XtreamClient, XtreamEpgListing};

/// Handler for Xtream Codes guide sources.
pub struct XtreamEpgHandler {
    fetcher: ResourceFetcher,
}

impl XtreamEpgHandler {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }

    async fn client_for(&self, source: &EpgSource) -> AppResult<XtreamClient> {
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

    async fn ingest_bulk_xmltv(
        &self,
        token: &CancellationToken,
        client: &XtreamClient,
        source: &mut EpgSource,
        sink: &mut ProgramSink<'_>,
    ) -> AppResult<IngestSummary> {
        let bytes = client.get_xmltv_bytes(token).await?;
        let shift = source.epg_shift;
        let source_id = source.id;

        let mut emitted = 0u64;
        let mut dropped = 0u64;
        let mut on_channel = |_channel: XmltvChannel| -> AppResult<()> { Ok(()) };
        let mut on_programme = |programme: XmltvProgramme| -> AppResult<()> {
            let program = programme_to_model(programme, source_id, shift);
            if !program.is_valid() {
                dropped += 1;
                return Ok(());
            }
            sink(program)?;
            emitted += 1;
            Ok(())
        };
        let mut on_error = |msg: &str| {
            debug!("bulk guide anomaly: {msg}");
        };

        let summary = XmltvParser::parse_compressed(
            bytes,
            token,
            &mut on_channel,
            &mut on_programme,
            &mut on_error,
        )?;
        drop(on_channel);
        drop(on_programme);
        drop(on_error);

        Ok(IngestSummary {
            processed: emitted,
            errors: dropped + summary.skipped as u64,
        })
    }

    async fn ingest_per_stream(
        &self,
        token: &CancellationToken,
        client: &XtreamClient,
        source: &EpgSource,
        sink: &mut ProgramSink<'_>,
    ) -> AppResult<IngestSummary> {
        let streams = client.get_live_streams(token, None).await?;
        let shift = source.epg_shift;

        let mut summary = IngestSummary::default();
        let mut seen: HashSet<String> = HashSet::new();

        for stream in streams {
            let Some(epg_channel_id) = stream
                .epg_channel_id
                .as_deref()
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            if token.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let table = match client.get_full_epg(token, stream.stream_id).await {
                Ok(table) => table,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    // One stream's guide failing must not lose the rest.
                    summary.errors += 1;
                    debug!(
                        "per-stream EPG fetch failed for '{}' (stream {}): {e}",
                        stream.name, stream.stream_id
                    );
                    continue;
                }
            };

            for listing in table.epg_listings {
                match listing_to_model(listing, source.id, epg_channel_id, shift) {
                    Some(program) => {
                        if !program.is_valid() {
                            summary.errors += 1;
                            continue;
                        }
                        let dedup_key = format!(
                            "{}|{}|{}",
                            program.channel_id,
                            program.start.timestamp(),
                            program.title
                        );
                        if !seen.insert(dedup_key) {
                            summary.errors += 1;
                            continue;
                        }
                        if token.is_cancelled() {
                            return Err(AppError::Cancelled);
                        }
                        sink(program)?;
                        summary.processed += 1;
                    }
                    None => summary.errors += 1,
                }
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl EpgSourceHandler for XtreamEpgHandler {
    fn epg_source_type(&self) -> EpgSourceType {
        EpgSourceType::Xtream
    }

    fn validate(&self, source: &EpgSource) -> AppResult<()> {
        if source.source_type != EpgSourceType::Xtream {
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
        source: &mut EpgSource,
        sink: &mut ProgramSink<'_>,
    ) -> AppResult<IngestSummary> {
        self.validate(source)?;
        let client = self.client_for(source).await?;

        let auth = client.get_auth_info(token).await?;
        if let Some(timezone) = auth
            .server_info
            .as_ref()
            .and_then(|s| s.timezone.clone())
            .filter(|tz| !tz.is_empty())
        {
            source.detected_timezone = Some(timezone.clone());
            if source.auto_shift_timezone.as_deref() != Some(timezone.as_str()) {
                match calculate_auto_shift(&timezone) {
                    Ok(auto_shift) => {
                        info!(
                            "EPG source '{}': server timezone {timezone}, auto shift {auto_shift}h",
                            source.name
                        );
                        source.epg_shift = auto_shift;
                        source.auto_shift_timezone = Some(timezone);
                    }
                    Err(e) => warn!(
                        "EPG source '{}': cannot derive auto shift from '{timezone}': {e}",
                        source.name
                    ),
                }
            }
        }

        let summary = match source.api_method {
            EpgApiMethod::BulkXmltv => {
                self.ingest_bulk_xmltv(token, &client, source, sink).await?
            }
            EpgApiMethod::StreamId => {
                self.ingest_per_stream(token, &client, source, sink).await?
            }
        };

        source.program_count = summary.processed;
        source.updated_at = Utc::now();

        info!(
            "ingested {} programs from Xtream EPG source '{}' ({} anomalies)",
            summary.processed, source.name, summary.errors
        );
        Ok(summary)
    }
}

/// Translate one `get_simple_data_table` listing. Timestamps are UNIX
/// seconds; the shift compensates providers that emit local wall clock.
fn listing_to_model(
    listing: XtreamEpgListing,
    source_id: Ulid,
    fallback_channel_id: &str,
    shift_hours: i32,
) -> Option<EpgProgram> {
    let start = epoch_to_utc(listing.start_timestamp?, shift_hours)?;
    let stop = epoch_to_utc(listing.stop_timestamp?, shift_hours)?;

    let channel_id = listing
        .channel_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| fallback_channel_id.to_string());

    let now = Utc::now();
    Some(EpgProgram {
        id: Ulid::new(),
        source_id,
        channel_id,
        start,
        stop,
        title: listing
            .title
            .as_deref()
            .map(decode_base64_or_keep)
            .unwrap_or_default(),
        sub_title: None,
        description: listing.description.as_deref().map(decode_base64_or_keep),
        category: None,
        icon: None,
        episode_num: None,
        rating: None,
        language: listing.lang,
        credits: None,
        is_new: false,
        is_premiere: false,
        created_at: now,
        updated_at: now,
    })
}

fn epoch_to_utc(epoch: i64, shift_hours: i32) -> Option<DateTime<Utc>> {
    let base = DateTime::<Utc>::from_timestamp(epoch, 0)?;
    Some(base + Duration::hours(shift_hours as i64))
}
