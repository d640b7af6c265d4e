//! XMLTV generation stage
//!
//! Writes the guide for the surviving channels into the temp directory:
//! all `<channel>` elements first (one per distinct non-empty `tvg_id`),
//! then `<programme>` elements sorted by `(channel, start)`. Programmes for
//! unknown channels and programmes without a title are skipped.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use quick_xml::escape::escape;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::converters::{channel_to_xmltv_channel, program_to_xmltv_programme};
use crate::ingestor::xmltv::XmltvProgramme;
use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, StageResult};

/// Key under which the generated file's path is recorded in state metadata.
pub const XMLTV_TEMP_PATH_KEY: &str = "xmltv_temp_path";

const GENERATOR_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct GenerateXmltvStage {
    progress: Arc<dyn ProgressReporter>,
}

impl GenerateXmltvStage {
    pub fn new(progress: Arc<dyn ProgressReporter>) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl PipelineStage for GenerateXmltvStage {
    fn stage_id(&self) -> &'static str {
        "generate_xmltv"
    }

    fn stage_name(&self) -> &'static str {
        "Generate XMLTV"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let path: PathBuf = state.temp_dir.join(format!("{}.xml", state.proxy.id));
        let file = tokio::fs::File::create(&path).await?;
        let mut writer = BufWriter::new(file);

        writer
            .write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")
            .await?;
        writer
            .write_all(
                format!("<tv generator-info-name=\"{}\">\n", escape(GENERATOR_NAME)).as_bytes(),
            )
            .await?;

        // Channels first, one per distinct non-empty tvg_id, in list order.
        let mut emitted_ids: HashSet<String> = HashSet::new();
        let mut channel_count = 0usize;
        for channel in &state.channels {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(tvg_id) = channel.tvg_id.as_deref().filter(|id| !id.is_empty()) else {
                continue;
            };
            if !emitted_ids.insert(tvg_id.to_string()) {
                continue;
            }
            let element = channel_to_xmltv_channel(channel);
            let mut block = String::new();
            let _ = writeln!(block, "  <channel id=\"{}\">", escape(&element.id));
            if let Some(name) = &element.display_name {
                let _ = writeln!(block, "    <display-name>{}</display-name>", escape(name));
            }
            if let Some(icon) = &element.icon {
                let _ = writeln!(block, "    <icon src=\"{}\"/>", escape(icon));
            }
            block.push_str("  </channel>\n");
            writer.write_all(block.as_bytes()).await?;
            channel_count += 1;
        }

        // Programmes follow, sorted for deterministic output.
        let mut programs: Vec<&crate::models::EpgProgram> = state.programs.iter().collect();
        programs.sort_by(|a, b| {
            a.channel_id
                .cmp(&b.channel_id)
                .then_with(|| a.start.cmp(&b.start))
        });

        let total = programs.len();
        let mut program_count = 0usize;
        let mut skipped = 0usize;
        for (index, program) in programs.into_iter().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if program.title.is_empty() || !emitted_ids.contains(&program.channel_id) {
                skipped += 1;
                continue;
            }
            let programme = program_to_xmltv_programme(program);
            writer
                .write_all(render_programme(&programme).as_bytes())
                .await?;
            program_count += 1;

            if index % 1000 == 0 {
                self.progress.report_item_progress(
                    self.stage_id(),
                    index,
                    total,
                    &programme.channel,
                );
            }
        }

        writer.write_all(b"</tv>\n").await?;
        writer.flush().await?;
        let file_size = tokio::fs::metadata(&path).await?.len();

        state.set_metadata(
            XMLTV_TEMP_PATH_KEY,
            serde_json::json!(path.to_string_lossy()),
        );
        info!(
            "generated guide for proxy '{}': {channel_count} channels, {program_count} programmes ({skipped} skipped)",
            state.proxy.name
        );

        let artifact = Artifact::new(
            ArtifactKind::XmltvGuide,
            ArtifactStage::Generated,
            self.stage_id(),
        )
        .with_record_count(program_count)
        .with_file_path(path)
        .with_file_size(file_size)
        .with_metadata("channel_count", serde_json::json!(channel_count));
        Ok(StageResult::new(
            program_count,
            format!("{channel_count} channels, {program_count} programmes"),
        )
        .with_artifact(artifact))
    }
}

fn format_timestamp(time: DateTime<FixedOffset>) -> String {
    time.format("%Y%m%d%H%M%S %z").to_string()
}

fn render_programme(programme: &XmltvProgramme) -> String {
    let mut block = String::new();
    let _ = writeln!(
        block,
        "  <programme channel=\"{}\" start=\"{}\" stop=\"{}\">",
        escape(&programme.channel),
        format_timestamp(programme.start),
        format_timestamp(programme.stop),
    );
    let mut text_element = |name: &str, value: &Option<String>| {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            let _ = writeln!(block, "    <{name}>{}</{name}>", escape(value));
        }
    };
    text_element("title", &programme.title);
    text_element("sub-title", &programme.sub_title);
    text_element("desc", &programme.desc);
    text_element("category", &programme.category);
    text_element("episode-num", &programme.episode_num);
    text_element("language", &programme.language);

    if !programme.credits.is_empty() {
        block.push_str("    <credits>\n");
        let mut person = |role: &str, names: &[String]| {
            for name in names {
                let _ = writeln!(block, "      <{role}>{}</{role}>", escape(name));
            }
        };
        person("director", &programme.credits.directors);
        person("actor", &programme.credits.actors);
        person("writer", &programme.credits.writers);
        person("producer", &programme.credits.producers);
        person("presenter", &programme.credits.presenters);
        block.push_str("    </credits>\n");
    }
    if let Some(icon) = programme.icon.as_deref().filter(|i| !i.is_empty()) {
        let _ = writeln!(block, "    <icon src=\"{}\"/>", escape(icon));
    }
    if let Some(rating) = programme.rating.as_deref().filter(|r| !r.is_empty()) {
        let _ = writeln!(
            block,
            "    <rating><value>{}</value></rating>",
            escape(rating)
        );
    }
    if programme.is_new {
        block.push_str("    <new/>\n");
    }
    if programme.is_premiere {
        block.push_str("    <premiere/>\n");
    }
    block.push_str("  </programme>\n");
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamProxy;
    use crate::pipeline::state::test_support;
    use crate::pipeline::traits::LogProgressReporter;
    use chrono::{Duration, Utc};
    use ulid::Ulid;

    async fn generate(state: &mut PipelineState) -> String {
        let mut stage = GenerateXmltvStage::new(Arc::new(LogProgressReporter));
        stage
            .execute(&CancellationToken::new(), state)
            .await
            .unwrap();
        let path = state.metadata_str(XMLTV_TEMP_PATH_KEY).unwrap();
        tokio::fs::read_to_string(path).await.unwrap()
    }

    #[tokio::test]
    async fn channels_precede_programmes_and_orphans_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut state =
            PipelineState::new(StreamProxy::new("p"), dir.path().to_path_buf(), "");
        let source_id = Ulid::new();
        state.channels = vec![
            test_support::channel(source_id, "ch1", "One"),
            test_support::channel(source_id, "ch1", "One Duplicate"),
            test_support::channel(source_id, "", "No Tvg Id"),
        ];
        state.programs = vec![
            test_support::program(source_id, "ch1"),
            test_support::program(source_id, "ghost"),
        ];

        let content = generate(&mut state).await;
        // Exactly one channel element despite the duplicate tvg_id.
        assert_eq!(content.matches("<channel id=\"ch1\">").count(), 1);
        assert!(!content.contains("No Tvg Id"));
        // The orphan programme is absent.
        assert!(!content.contains("ghost"));
        // Every programme sits after the last channel element.
        let last_channel = content.rfind("</channel>").unwrap();
        let first_programme = content.find("<programme").unwrap();
        assert!(first_programme > last_channel);
    }

    #[tokio::test]
    async fn programmes_are_sorted_by_channel_then_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut state =
            PipelineState::new(StreamProxy::new("p"), dir.path().to_path_buf(), "");
        let source_id = Ulid::new();
        state.channels = vec![
            test_support::channel(source_id, "b", "B"),
            test_support::channel(source_id, "a", "A"),
        ];
        let now = Utc::now();
        let mut p1 = test_support::program(source_id, "b");
        p1.start = now;
        p1.stop = now + Duration::minutes(30);
        p1.title = "On B".to_string();
        let mut p2 = test_support::program(source_id, "a");
        p2.start = now + Duration::hours(1);
        p2.stop = p2.start + Duration::minutes(30);
        p2.title = "A Later".to_string();
        let mut p3 = test_support::program(source_id, "a");
        p3.start = now;
        p3.stop = now + Duration::minutes(30);
        p3.title = "A Early".to_string();
        state.programs = vec![p1, p2, p3];

        let content = generate(&mut state).await;
        let early = content.find("A Early").unwrap();
        let later = content.find("A Later").unwrap();
        let on_b = content.find("On B").unwrap();
        assert!(early < later && later < on_b);
    }

    #[tokio::test]
    async fn untitled_programmes_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut state =
            PipelineState::new(StreamProxy::new("p"), dir.path().to_path_buf(), "");
        let source_id = Ulid::new();
        state.channels = vec![test_support::channel(source_id, "ch1", "One")];
        let mut untitled = test_support::program(source_id, "ch1");
        untitled.title = String::new();
        state.programs = vec![untitled];

        let content = generate(&mut state).await;
        assert!(!content.contains("<programme"));
        assert!(content.ends_with("</tv>\n"));
    }

    #[test]
    fn timestamps_render_in_xmltv_form() {
        let time = chrono::DateTime::parse_from_str(
            "20240115090000 +0000",
            "%Y%m%d%H%M%S %z",
        )
        .unwrap();
        assert_eq!(format_timestamp(time), "20240115090000 +0000");
    }
}
