//! Shared pipeline state
//!
//! One `PipelineState` exists per run. Stages execute sequentially and are
//! the only owner while they run, so no locking is involved; the state is
//! dropped (and its temp directory removed) when the pipeline terminates.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::models::{Channel, EpgProgram, StreamProxy};

use super::artifacts::Artifact;

/// A non-fatal problem recorded during a run; surfaces in the final report
/// without aborting the pipeline.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// State shared by all stages of one pipeline run.
pub struct PipelineState {
    pub proxy: StreamProxy,
    /// Scratch directory for generated files; removed at teardown.
    pub temp_dir: PathBuf,
    /// Destination directory, relative to the publish sandbox root.
    pub output_dir: String,
    pub channels: Vec<Channel>,
    pub programs: Vec<EpgProgram>,
    pub metadata: HashMap<String, Value>,
    pub errors: Vec<StageError>,
    pub artifacts: Vec<Artifact>,
}

impl PipelineState {
    pub fn new(proxy: StreamProxy, temp_dir: PathBuf, output_dir: impl Into<String>) -> Self {
        Self {
            proxy,
            temp_dir,
            output_dir: output_dir.into(),
            channels: Vec::new(),
            programs: Vec::new(),
            metadata: HashMap::new(),
            errors: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Record a non-fatal problem.
    pub fn add_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(StageError {
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
pub mod test_support {
    //! Fixture builders shared across the crate's tests.

    use chrono::{Duration, Utc};
    use ulid::Ulid;

    use crate::models::{Channel, EpgProgram};

    pub fn channel(source_id: Ulid, tvg_id: &str, name: &str) -> Channel {
        let now = Utc::now();
        let tvg = (!tvg_id.is_empty()).then(|| tvg_id.to_string());
        Channel {
            id: Ulid::new(),
            source_id,
            ext_id: tvg
                .clone()
                .unwrap_or_else(|| format!("http://x/{name}.ts")),
            tvg_id: tvg,
            tvg_name: Some(name.to_string()),
            tvg_logo: None,
            group_title: None,
            channel_name: name.to_string(),
            channel_number: None,
            stream_url: format!("http://x/{name}.ts"),
            stream_type: None,
            language: None,
            country: None,
            is_adult: false,
            extra: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn program(source_id: Ulid, channel_id: &str) -> EpgProgram {
        let now = Utc::now();
        EpgProgram {
            id: Ulid::new(),
            source_id,
            channel_id: channel_id.to_string(),
            start: now,
            stop: now + Duration::minutes(30),
            title: "Program".to_string(),
            sub_title: None,
            description: None,
            category: None,
            icon: None,
            episode_num: None,
            rating: None,
            language: None,
            credits: None,
            is_new: false,
            is_premiere: false,
            created_at: now,
            updated_at: now,
        }
    }
}
