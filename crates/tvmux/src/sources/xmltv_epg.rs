//! XMLTV EPG source handler
//!
//! Fetches an XMLTV document (http(s) or file, possibly compressed), streams
//! programmes through the parser and emits normalized UTC programs. The
//! first timestamp offset observed in the document becomes the source's
//! detected timezone; when it changes, the automatic shift is re-derived.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::traits::{EpgSourceHandler, IngestSummary, ProgramSink};
use crate::errors::{AppError, AppResult, SourceError};
use crate::ingestor::xmltv::{XmltvChannel, XmltvParser, XmltvProgramme};
use crate::models::{EpgProgram, EpgSource, EpgSourceType};
use crate::utils::fetch::{PayloadKind, ResourceFetcher};
use crate::utils::time::{calculate_auto_shift, format_timezone_offset, normalize_program_time};
use crate::utils::url::UrlUtils;

/// Handler for XMLTV document sources.
pub struct XmltvEpgHandler {
    fetcher: ResourceFetcher,
}

impl XmltvEpgHandler {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl EpgSourceHandler for XmltvEpgHandler {
    fn epg_source_type(&self) -> EpgSourceType {
        EpgSourceType::Xmltv
    }

    fn validate(&self, source: &EpgSource) -> AppResult<()> {
        if source.source_type != EpgSourceType::Xmltv {
            return Err(SourceError::invalid_config(
                "source_type",
                format!("expected xmltv, got {}", source.source_type),
            )
            .into());
        }
        if source.url.is_empty() {
            return Err(SourceError::invalid_config("url", "URL is required").into());
        }
        UrlUtils::parse_and_validate(&source.url)
            .map_err(|e| AppError::from(SourceError::invalid_config("url", e.to_string())))?;
        Ok(())
    }

    async fn ingest(
        &self,
        token: &CancellationToken,
        source: &mut EpgSource,
        sink: &mut ProgramSink<'_>,
    ) -> AppResult<IngestSummary> {
        self.validate(source)?;

        debug!(
            "ingesting XMLTV source '{}' from {}",
            source.name,
            UrlUtils::obfuscate_credentials(&source.url)
        );

        let content = self
            .fetcher
            .fetch_bytes(token, &source.url, PayloadKind::Xmltv)
            .await?;

        // The shift configured before this run applies to this run; the
        // re-derived value only takes effect next time.
        let shift = source.epg_shift;
        let source_id = source.id;

        let mut emitted = 0u64;
        let mut dropped = 0u64;
        let mut seen: HashSet<String> = HashSet::new();

        let mut on_channel = |_channel: XmltvChannel| -> AppResult<()> { Ok(()) };
        let mut on_programme = |programme: XmltvProgramme| -> AppResult<()> {
            let dedup_key = format!(
                "{}|{}|{}",
                programme.channel,
                programme.start.timestamp(),
                programme.title.as_deref().unwrap_or_default()
            );
            if !seen.insert(dedup_key) {
                dropped += 1;
                return Ok(());
            }
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
            debug!("guide anomaly in '{}': {msg}", source_id);
        };

        let summary = XmltvParser::parse(
            content.as_slice(),
            token,
            &mut on_channel,
            &mut on_programme,
            &mut on_error,
        )?;
        drop(on_channel);
        drop(on_programme);
        drop(on_error);

        if let Some(observed_raw) = summary.detected_offset {
            let observed = format_timezone_offset(&observed_raw);
            source.detected_timezone = Some(observed.clone());
            if source.auto_shift_timezone.as_deref() != Some(observed.as_str()) {
                match calculate_auto_shift(&observed) {
                    Ok(auto_shift) => {
                        info!(
                            "EPG source '{}': detected timezone {observed}, auto shift {auto_shift}h",
                            source.name
                        );
                        source.epg_shift = auto_shift;
                        source.auto_shift_timezone = Some(observed);
                    }
                    Err(e) => warn!(
                        "EPG source '{}': cannot derive auto shift from {observed}: {e}",
                        source.name
                    ),
                }
            }
        }
        source.program_count = emitted;
        source.updated_at = Utc::now();

        info!(
            "parsed XMLTV EPG for source '{}': {} programs ({} dropped)",
            source.name,
            emitted,
            dropped + summary.skipped as u64
        );

        Ok(IngestSummary {
            processed: emitted,
            errors: dropped + summary.skipped as u64,
        })
    }
}

/// Convert a parsed programme into the UTC program model.
pub(super) fn programme_to_model(
    programme: XmltvProgramme,
    source_id: Ulid,
    shift_hours: i32,
) -> EpgProgram {
    let now = Utc::now();
    let credits = if programme.credits.is_empty() {
        None
    } else {
        serde_json::to_string(&programme.credits).ok()
    };
    EpgProgram {
        id: Ulid::new(),
        source_id,
        channel_id: programme.channel,
        start: normalize_program_time(programme.start, &programme.timezone_offset, shift_hours),
        stop: normalize_program_time(programme.stop, &programme.timezone_offset, shift_hours),
        title: programme.title.unwrap_or_default(),
        sub_title: programme.sub_title,
        description: programme.desc,
        category: programme.category,
        icon: programme.icon,
        episode_num: programme.episode_num,
        rating: programme.rating,
        language: programme.language,
        credits,
        is_new: programme.is_new,
        is_premiere: programme.is_premiere,
        created_at: now,
        updated_at: now,
    }
}
