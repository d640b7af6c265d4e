//! M3U generation stage
//!
//! Writes the merged channel list as an M3U playlist into the pipeline's
//! temp directory. Channels are renumbered contiguously from the proxy's
//! starting channel number; channels without a stream URL are skipped with
//! a non-fatal error and do not consume a number.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::converters::channel_to_m3u_entry;
use crate::ingestor::m3u::M3uEntry;
use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, StageResult};

/// Key under which the generated file's path is recorded in state metadata.
pub const M3U_TEMP_PATH_KEY: &str = "m3u_temp_path";

pub struct GenerateM3uStage {
    progress: Arc<dyn ProgressReporter>,
}

impl GenerateM3uStage {
    pub fn new(progress: Arc<dyn ProgressReporter>) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl PipelineStage for GenerateM3uStage {
    fn stage_id(&self) -> &'static str {
        "generate_m3u"
    }

    fn stage_name(&self) -> &'static str {
        "Generate M3U"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        let path: PathBuf = state.temp_dir.join(format!("{}.m3u", state.proxy.id));
        let file = tokio::fs::File::create(&path).await?;
        let mut writer = BufWriter::new(file);

        writer.write_all(b"#EXTM3U\n").await?;

        let total = state.channels.len();
        let mut emitted = 0u32;
        let mut skipped = 0usize;

        for (index, channel) in state.channels.iter().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if channel.stream_url.is_empty() {
                skipped += 1;
                state.errors.push(crate::pipeline::state::StageError {
                    stage: "generate_m3u".to_string(),
                    message: format!(
                        "skipped channel '{}' with empty stream URL",
                        channel.channel_name
                    ),
                });
                continue;
            }

            let number = state.proxy.starting_channel_number + emitted;
            let entry = channel_to_m3u_entry(channel, number);
            writer.write_all(format_extinf(&entry).as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.write_all(entry.url.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            emitted += 1;

            if index % 500 == 0 {
                self.progress.report_item_progress(
                    self.stage_id(),
                    index,
                    total,
                    &channel.channel_name,
                );
            }
        }

        writer.flush().await?;
        let file_size = tokio::fs::metadata(&path).await?.len();

        state.set_metadata(
            M3U_TEMP_PATH_KEY,
            serde_json::json!(path.to_string_lossy()),
        );
        info!(
            "generated playlist for proxy '{}': {emitted} entries, {file_size} bytes ({skipped} skipped)",
            state.proxy.name
        );

        let artifact = Artifact::new(
            ArtifactKind::M3uPlaylist,
            ArtifactStage::Generated,
            self.stage_id(),
        )
        .with_record_count(emitted as usize)
        .with_file_path(path)
        .with_file_size(file_size);
        Ok(StageResult::new(emitted as usize, format!("{emitted} entries written"))
            .with_artifact(artifact))
    }
}

/// Render the `#EXTINF` line for one entry. Attributes appear only when
/// present; the channel number is always written since proxy output is
/// renumbered.
fn format_extinf(entry: &M3uEntry) -> String {
    let mut line = String::from("#EXTINF:-1");
    let mut push_attr = |key: &str, value: &str| {
        if !value.is_empty() {
            line.push_str(&format!(" {key}=\"{value}\""));
        }
    };
    push_attr("tvg-id", entry.tvg_id.as_deref().unwrap_or_default());
    push_attr("tvg-name", entry.tvg_name.as_deref().unwrap_or_default());
    push_attr("tvg-logo", entry.tvg_logo.as_deref().unwrap_or_default());
    push_attr(
        "group-title",
        entry.group_title.as_deref().unwrap_or_default(),
    );
    if let Some(number) = entry.channel_number {
        push_attr("tvg-chno", &number.to_string());
    }
    line.push(',');
    line.push_str(&entry.title);
    line
}
