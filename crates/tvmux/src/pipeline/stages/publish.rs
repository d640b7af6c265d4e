//! Publish stage
//!
//! Moves the generated playlist and guide from the temp directory to their
//! final location inside the output sandbox. Placement is atomic: a plain
//! rename when temp and output share a filesystem, otherwise a chunked copy
//! to `<final>.tmp` followed by a rename, so clients polling the output
//! path never observe a partially written file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use path_sandbox::PathSandbox;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pipeline::artifacts::{Artifact, ArtifactKind, ArtifactStage};
use crate::pipeline::error::PipelineError;
use crate::pipeline::stages::generate_m3u::M3U_TEMP_PATH_KEY;
use crate::pipeline::stages::generate_xmltv::XMLTV_TEMP_PATH_KEY;
use crate::pipeline::state::PipelineState;
use crate::pipeline::traits::{PipelineStage, ProgressReporter, StageResult};

pub struct PublishStage {
    output_sandbox: PathSandbox,
    progress: Arc<dyn ProgressReporter>,
}

impl PublishStage {
    pub fn new(output_sandbox: PathSandbox, progress: Arc<dyn ProgressReporter>) -> Self {
        Self {
            output_sandbox,
            progress,
        }
    }

    fn destination(&self, state: &PipelineState, extension: &str) -> String {
        if state.output_dir.is_empty() {
            format!("{}.{extension}", state.proxy.id)
        } else {
            format!("{}/{}.{extension}", state.output_dir, state.proxy.id)
        }
    }

    async fn publish_one(
        &self,
        token: &CancellationToken,
        state: &PipelineState,
        metadata_key: &str,
        extension: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, PipelineError> {
        let Some(temp_path) = state.metadata_str(metadata_key) else {
            return Ok(None);
        };
        let dest = self.destination(state, extension);
        let size = self
            .output_sandbox
            .promote(Path::new(temp_path), &dest, token)
            .await?;

        info!(
            "published {} -> {} ({size} bytes)",
            temp_path,
            self.output_sandbox
                .resolve(&dest)
                .map(|p| p.display().to_string())
                .unwrap_or(dest.clone())
        );

        Ok(Some(
            Artifact::new(kind, ArtifactStage::Published, "publish")
                .with_file_path(self.output_sandbox.resolve(&dest)?)
                .with_file_size(size)
                .with_metadata("proxy_id", serde_json::json!(state.proxy.id.to_string())),
        ))
    }
}

#[async_trait]
impl PipelineStage for PublishStage {
    fn stage_id(&self) -> &'static str {
        "publish"
    }

    fn stage_name(&self) -> &'static str {
        "Publish"
    }

    async fn execute(
        &mut self,
        token: &CancellationToken,
        state: &mut PipelineState,
    ) -> Result<StageResult, PipelineError> {
        if !state.output_dir.is_empty() {
            self.output_sandbox.create_dir_all(&state.output_dir).await?;
        }

        self.progress
            .report_progress(self.stage_id(), 0.0, "publishing playlist");
        let m3u = self
            .publish_one(token, state, M3U_TEMP_PATH_KEY, "m3u", ArtifactKind::M3uPlaylist)
            .await?;

        self.progress
            .report_progress(self.stage_id(), 0.5, "publishing guide");
        let xmltv = self
            .publish_one(
                token,
                state,
                XMLTV_TEMP_PATH_KEY,
                "xml",
                ArtifactKind::XmltvGuide,
            )
            .await?;

        let mut result = StageResult::new(0, String::new());
        let mut published = 0usize;
        for artifact in [m3u, xmltv].into_iter().flatten() {
            published += 1;
            result.artifacts.push(artifact);
        }
        result.records_processed = published;
        result.message = format!("{published} file(s) published");
        self.progress
            .report_progress(self.stage_id(), 1.0, &result.message);
        Ok(result)
    }
}
