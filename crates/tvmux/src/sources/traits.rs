//! Source handler trait definitions
//!
//! Handlers are the polymorphic seam over source types: each one knows how
//! to validate a source's configuration and to ingest it, pushing normalized
//! records into a caller-supplied sink. Handlers are stateless across
//! invocations (per-invocation caches like category maps are fine).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::AppResult;
use crate::models::{Channel, EpgProgram, EpgSource, EpgSourceType, StreamSource,
    StreamSourceType};

/// Per-record callback for channel ingestion. Returning an error aborts the
/// ingestion; the error propagates to the caller unchanged.
pub type ChannelSink<'a> = dyn FnMut(Channel) -> AppResult<()> + Send + 'a;

/// Per-record callback for program ingestion.
pub type ProgramSink<'a> = dyn FnMut(EpgProgram) -> AppResult<()> + Send + 'a;

/// Counters describing a completed ingestion.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    /// Records delivered to the sink.
    pub processed: u64,
    /// Records dropped or anomalies logged without aborting.
    pub errors: u64,
}

/// Handler for one stream source type.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// The source type this handler accepts.
    fn source_type(&self) -> StreamSourceType;

    /// Check the source's configuration. Fails with `InvalidConfig`.
    fn validate(&self, source: &StreamSource) -> AppResult<()>;

    /// Ingest the source, delivering channels strictly sequentially to
    /// `sink`. Cancellation is checked before every delivery.
    async fn ingest(
        &self,
        token: &CancellationToken,
        source: &StreamSource,
        sink: &mut ChannelSink<'_>,
    ) -> AppResult<IngestSummary>;
}

/// Handler for one EPG source type.
///
/// `ingest` takes the source mutably: handlers record the detected timezone
/// and re-derive the auto shift on it after each run.
#[async_trait]
pub trait EpgSourceHandler: Send + Sync {
    fn epg_source_type(&self) -> EpgSourceType;

    fn validate(&self, source: &EpgSource) -> AppResult<()>;

    async fn ingest(
        &self,
        token: &CancellationToken,
        source: &mut EpgSource,
        sink: &mut ProgramSink<'_>,
    ) -> AppResult<IngestSummary>;
}
