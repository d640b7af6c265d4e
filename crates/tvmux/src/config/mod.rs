//! Runtime configuration
//!
//! Plain serde structs with per-field defaults. The embedding application is
//! responsible for actually loading these from wherever it keeps its
//! configuration; the defaults here are the documented contract.

pub mod duration_serde;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the aggregation core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ingestion_guard: IngestionGuardConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub state_manager: StateManagerConfig,
}

/// Settings for the pipeline stage that waits for in-flight ingestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionGuardConfig {
    #[serde(default = "default_guard_enabled")]
    pub enabled: bool,
    #[serde(default = "default_guard_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_guard_max_wait", with = "duration_serde")]
    pub max_wait: Duration,
}

impl Default for IngestionGuardConfig {
    fn default() -> Self {
        Self {
            enabled: default_guard_enabled(),
            poll_interval: default_guard_poll_interval(),
            max_wait: default_guard_max_wait(),
        }
    }
}

fn default_guard_enabled() -> bool {
    true
}

fn default_guard_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_guard_max_wait() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Per-payload-kind fetch timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FetcherConfig {
    #[serde(default)]
    pub timeout: FetcherTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherTimeouts {
    #[serde(default = "default_playlist_timeout", with = "duration_serde")]
    pub m3u: Duration,
    #[serde(default = "default_playlist_timeout", with = "duration_serde")]
    pub xmltv: Duration,
    #[serde(default = "default_xtream_timeout", with = "duration_serde")]
    pub xtream: Duration,
}

impl Default for FetcherTimeouts {
    fn default() -> Self {
        Self {
            m3u: default_playlist_timeout(),
            xmltv: default_playlist_timeout(),
            xtream: default_xtream_timeout(),
        }
    }
}

fn default_playlist_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_xtream_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}

/// Guide-data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgConfig {
    /// Horizon of guide data kept in proxy output, counted from now.
    #[serde(default = "default_epg_days")]
    pub days_to_fetch: u32,
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            days_to_fetch: default_epg_days(),
        }
    }
}

fn default_epg_days() -> u32 {
    7
}

/// Ingestion state manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateManagerConfig {
    /// How long completed/failed states stay visible before cleanup.
    #[serde(default = "default_cleanup_grace", with = "duration_serde")]
    pub cleanup_grace: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            cleanup_grace: default_cleanup_grace(),
        }
    }
}

fn default_cleanup_grace() -> Duration {
    Duration::from_secs(5)
}
