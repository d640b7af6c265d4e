//! Core data model
//!
//! All identifiers are ULIDs: 26-character, time-ordered, lexicographically
//! sortable. All timestamps are UTC instants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Stream source configuration for M3U playlists, Xtream Codes APIs or
/// manually curated channel lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSource {
    pub id: Ulid,
    pub name: String,
    pub source_type: StreamSourceType,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_max_concurrent_streams() -> i32 {
    1
}

impl StreamSource {
    /// Minimal constructor used by tests and embedding callers.
    pub fn new<N: Into<String>, U: Into<String>>(
        name: N,
        source_type: StreamSourceType,
        url: U,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new(),
            name: name.into(),
            source_type,
            url: url.into(),
            username: None,
            password: None,
            max_concurrent_streams: default_max_concurrent_streams(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credentials<U: Into<String>, P: Into<String>>(
        mut self,
        username: U,
        password: P,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamSourceType {
    M3u,
    Xtream,
    Manual,
}

impl std::fmt::Display for StreamSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSourceType::M3u => write!(f, "m3u"),
            StreamSourceType::Xtream => write!(f, "xtream"),
            StreamSourceType::Manual => write!(f, "manual"),
        }
    }
}

/// EPG source configuration for XMLTV documents or Xtream Codes guide APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgSource {
    pub id: Ulid,
    pub name: String,
    pub source_type: EpgSourceType,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub api_method: EpgApiMethod,
    /// Formatted `±HH:MM` offset observed during the last ingestion.
    pub detected_timezone: Option<String>,
    /// Whole-hour adjustment added to every program time after UTC conversion.
    #[serde(default)]
    pub epg_shift: i32,
    /// Timezone the current `epg_shift` was derived from. Auto-shift is only
    /// re-computed when the detected timezone changes, so a manual override
    /// of `epg_shift` survives until the provider itself moves.
    pub auto_shift_timezone: Option<String>,
    #[serde(default)]
    pub program_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EpgSource {
    pub fn new<N: Into<String>, U: Into<String>>(
        name: N,
        source_type: EpgSourceType,
        url: U,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new(),
            name: name.into(),
            source_type,
            url: url.into(),
            username: None,
            password: None,
            api_method: EpgApiMethod::default(),
            detected_timezone: None,
            epg_shift: 0,
            auto_shift_timezone: None,
            program_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credentials<U: Into<String>, P: Into<String>>(
        mut self,
        username: U,
        password: P,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EpgSourceType {
    Xmltv,
    Xtream,
}

impl std::fmt::Display for EpgSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpgSourceType::Xmltv => write!(f, "xmltv"),
            EpgSourceType::Xtream => write!(f, "xtream"),
        }
    }
}

/// How an Xtream EPG source is queried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EpgApiMethod {
    /// Per-stream `get_simple_data_table` calls.
    #[default]
    StreamId,
    /// One bulk `/xmltv.php` download.
    BulkXmltv,
}

/// A single playable channel, owned by exactly one stream source.
///
/// `(source_id, ext_id)` is unique; `ext_id` is the `tvg_id` when present,
/// otherwise the stream URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: Ulid,
    pub source_id: Ulid,
    pub ext_id: String,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub tvg_logo: Option<String>,
    pub group_title: Option<String>,
    pub channel_name: String,
    pub channel_number: Option<u32>,
    pub stream_url: String,
    pub stream_type: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub is_adult: bool,
    /// Opaque JSON string carrying attributes the model has no column for.
    pub extra: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Key used when merging channels across sources: `tvg_id` when present,
    /// otherwise `ext_id`.
    pub fn merge_key(&self) -> &str {
        match self.tvg_id.as_deref() {
            Some(tvg_id) if !tvg_id.is_empty() => tvg_id,
            _ => &self.ext_id,
        }
    }
}

/// A single guide entry, keyed by the `tvg_id` of some channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpgProgram {
    pub id: Ulid,
    pub source_id: Ulid,
    pub channel_id: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: String,
    pub sub_title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub episode_num: Option<String>,
    pub rating: Option<String>,
    pub language: Option<String>,
    /// Opaque JSON string of credits (directors, actors, ...).
    pub credits: Option<String>,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_premiere: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EpgProgram {
    /// Programs must cover a positive interval. Violations are dropped at
    /// ingestion without failing the run.
    pub fn is_valid(&self) -> bool {
        self.stop > self.start
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Direct,
    Smart,
}

/// A proxy definition: which sources feed it, in what order, and which
/// filters and mapping rules shape its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProxy {
    pub id: Ulid,
    pub name: String,
    pub proxy_mode: ProxyMode,
    pub starting_channel_number: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamProxy {
    pub fn new<N: Into<String>>(name: N) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new(),
            name: name.into(),
            proxy_mode: ProxyMode::Direct,
            starting_channel_number: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Association of a stream source with a proxy, ordered by priority
/// (lower `priority_order` wins on duplicate channels).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySource {
    pub proxy_id: Ulid,
    pub source_id: Ulid,
    pub priority_order: i32,
}

/// Association of an EPG source with a proxy, ordered by priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEpgSource {
    pub proxy_id: Ulid,
    pub epg_source_id: Ulid,
    pub priority_order: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterSourceType {
    Stream,
    Epg,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Include,
    Exclude,
}

/// A named filter expression. Whether it applies to a given proxy lives on
/// the assignment, never on the filter itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: Ulid,
    pub name: String,
    pub source_type: FilterSourceType,
    pub action: FilterAction,
    pub expression: String,
    #[serde(default)]
    pub is_system: bool,
}

/// Assignment of a filter to a proxy with ordering and an enable switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyFilter {
    pub proxy_id: Ulid,
    pub filter_id: Ulid,
    pub priority_order: i32,
    pub is_active: bool,
}

/// An expression-based mapping rule; its SET clauses rewrite channel fields
/// when the expression matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMappingRule {
    pub id: Ulid,
    pub name: String,
    pub source_type: FilterSourceType,
    pub expression: String,
    pub priority: i32,
    #[serde(default)]
    pub stop_on_match: bool,
    #[serde(default = "default_rule_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_system: bool,
}

fn default_rule_enabled() -> bool {
    true
}

/// Assignment of a data mapping rule to a proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyDataMappingRule {
    pub proxy_id: Ulid,
    pub rule_id: Ulid,
    pub priority_order: i32,
}

/// A manually curated channel record backing a `manual` stream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualChannel {
    pub id: Ulid,
    pub source_id: Ulid,
    pub channel_name: String,
    pub tvg_id: Option<String>,
    pub tvg_logo: Option<String>,
    pub group_title: Option<String>,
    pub stream_url: String,
    pub is_enabled: bool,
}

/// Status of one tracked ingestion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Ingesting,
    Completed,
    Failed,
    Cancelled,
}

impl IngestionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestionStatus::Ingesting)
    }
}

/// Snapshot of a tracked ingestion. Accessors of the state manager always
/// return copies of this, never live references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionState {
    pub source_id: Ulid,
    pub source_name: String,
    pub status: IngestionStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub processed: u64,
    pub errors: u64,
    pub error: Option<String>,
}
