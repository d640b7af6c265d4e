//! Pipeline artifact records
//!
//! Artifacts are the by-products stages leave behind for later stages and
//! for the final report: generated files, record counts, wait statistics.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an artifact holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Channels,
    M3uPlaylist,
    XmltvGuide,
}

/// How far through the pipeline the artifact's content is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStage {
    Raw,
    Generated,
    Published,
}

/// A record of something a stage produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub stage: ArtifactStage,
    pub created_by_stage: String,
    pub record_count: Option<usize>,
    pub file_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, stage: ArtifactStage, created_by_stage: &str) -> Self {
        Self {
            kind,
            stage,
            created_by_stage: created_by_stage.to_string(),
            record_count: None,
            file_path: None,
            file_size: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_record_count(mut self, count: usize) -> Self {
        self.record_count = Some(count);
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_fields() {
        let artifact = Artifact::new(
            ArtifactKind::M3uPlaylist,
            ArtifactStage::Generated,
            "generate_m3u",
        )
        .with_record_count(120)
        .with_file_path("/tmp/p.m3u")
        .with_file_size(4096)
        .with_metadata("proxy_id", serde_json::json!("01H"));

        assert_eq!(artifact.record_count, Some(120));
        assert_eq!(artifact.file_size, Some(4096));
        assert_eq!(artifact.metadata["proxy_id"], "01H");
        assert_eq!(artifact.created_by_stage, "generate_m3u");
    }
}
