//! Repository trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::errors::AppResult;
use crate::models::{
    Channel, DataMappingRule, EpgProgram, EpgSource, Filter, ManualChannel, StreamSource,
};

/// A filter together with its proxy assignment.
#[derive(Debug, Clone)]
pub struct AssignedFilter {
    pub filter: Filter,
    pub priority_order: i32,
    pub is_active: bool,
}

/// A data mapping rule together with its proxy assignment.
#[derive(Debug, Clone)]
pub struct AssignedRule {
    pub rule: DataMappingRule,
    pub priority_order: i32,
}

/// Access to a proxy's configuration: its ordered source lists and its
/// filter / mapping assignments.
#[async_trait]
pub trait ProxyConfigRepository: Send + Sync {
    /// Stream sources assigned to the proxy, ordered by ascending priority
    /// (earlier entries win on duplicate channels).
    async fn sources_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<StreamSource>>;

    /// EPG sources assigned to the proxy, ordered by ascending priority.
    async fn epg_sources_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<EpgSource>>;

    /// Filter assignments in evaluation order.
    async fn filters_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<AssignedFilter>>;

    /// Data mapping rule assignments in evaluation order.
    async fn rules_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<AssignedRule>>;
}

/// Channel storage. A stream source exclusively owns its channels.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn channels_for_source(&self, source_id: Ulid) -> AppResult<Vec<Channel>>;

    /// Replace the full channel set of a source with a freshly ingested one.
    async fn replace_source_channels(
        &self,
        source_id: Ulid,
        channels: Vec<Channel>,
    ) -> AppResult<usize>;
}

/// Program storage, queried per source within a time horizon.
#[async_trait]
pub trait EpgProgramRepository: Send + Sync {
    /// Programs of a source overlapping `[from, to)`, ordered by start time.
    async fn programs_for_source(
        &self,
        source_id: Ulid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<EpgProgram>>;

    /// Replace the full program set of a source with a freshly ingested one.
    async fn replace_source_programs(
        &self,
        source_id: Ulid,
        programs: Vec<EpgProgram>,
    ) -> AppResult<usize>;
}

/// Backing store for `manual` stream sources.
#[async_trait]
pub trait ManualChannelRepository: Send + Sync {
    /// Enabled manual channel records for a source, in insertion order.
    async fn enabled_channels_for_source(&self, source_id: Ulid)
        -> AppResult<Vec<ManualChannel>>;
}
