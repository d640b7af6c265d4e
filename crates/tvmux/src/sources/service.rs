//! Ingestion service
//!
//! Runs upstream of the pipeline: picks the right handler for a source,
//! tracks the run in the state manager, streams records into the channel /
//! program stores and records the terminal outcome. Concurrent ingestions
//! of the *same* source are refused by the state manager; different sources
//! ingest independently.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::ingestor::IngestionStateManager;
use crate::models::{Channel, EpgProgram, EpgSource, StreamSource};
use crate::repositories::{ChannelRepository, EpgProgramRepository};
use crate::sources::factory::SourceHandlerFactory;

/// Drives source and EPG ingestions end to end.
pub struct IngestionService {
    factory: Arc<SourceHandlerFactory>,
    state_manager: IngestionStateManager,
    channels: Arc<dyn ChannelRepository>,
    programs: Arc<dyn EpgProgramRepository>,
}

impl IngestionService {
    pub fn new(
        factory: Arc<SourceHandlerFactory>,
        state_manager: IngestionStateManager,
        channels: Arc<dyn ChannelRepository>,
        programs: Arc<dyn EpgProgramRepository>,
    ) -> Self {
        Self {
            factory,
            state_manager,
            channels,
            programs,
        }
    }

    pub fn state_manager(&self) -> &IngestionStateManager {
        &self.state_manager
    }

    /// Ingest one stream source, replacing its stored channels on success.
    pub async fn ingest_stream_source(
        &self,
        token: &CancellationToken,
        source: &StreamSource,
    ) -> AppResult<usize> {
        let handler = self.factory.handler_for(source.source_type)?;
        handler.validate(source)?;

        self.state_manager.start(source.id, &source.name).await?;

        let mut collected: Vec<Channel> = Vec::new();
        let result = {
            let mut sink = |channel: Channel| -> AppResult<()> {
                collected.push(channel);
                Ok(())
            };
            handler.ingest(token, source, &mut sink).await
        };

        match result {
            Ok(summary) => {
                self.state_manager
                    .update_progress(source.id, summary.processed, summary.errors)
                    .await;
                let stored = self
                    .channels
                    .replace_source_channels(source.id, collected)
                    .await?;
                self.state_manager.complete(source.id, stored as u64).await;
                info!(
                    "ingestion of source '{}' completed: {} channels stored",
                    source.name, stored
                );
                Ok(stored)
            }
            Err(e) if e.is_cancelled() => {
                self.state_manager.cancel(source.id).await;
                warn!("ingestion of source '{}' cancelled", source.name);
                Err(e)
            }
            Err(e) => {
                self.state_manager.fail(source.id, &e).await;
                Err(e)
            }
        }
    }

    /// Ingest one EPG source, replacing its stored programs on success.
    /// Returns the updated source (detected timezone, shift, counts) for the
    /// caller to persist.
    pub async fn ingest_epg_source(
        &self,
        token: &CancellationToken,
        source: &EpgSource,
    ) -> AppResult<(EpgSource, usize)> {
        let handler = self.factory.epg_handler_for(source.source_type)?;
        handler.validate(source)?;

        self.state_manager.start(source.id, &source.name).await?;

        let mut updated = source.clone();
        let mut collected: Vec<EpgProgram> = Vec::new();
        let result = {
            let mut sink = |program: EpgProgram| -> AppResult<()> {
                collected.push(program);
                Ok(())
            };
            handler.ingest(token, &mut updated, &mut sink).await
        };

        match result {
            Ok(summary) => {
                self.state_manager
                    .update_progress(source.id, summary.processed, summary.errors)
                    .await;
                let stored = self
                    .programs
                    .replace_source_programs(source.id, collected)
                    .await?;
                self.state_manager.complete(source.id, stored as u64).await;
                info!(
                    "ingestion of EPG source '{}' completed: {} programs stored",
                    source.name, stored
                );
                Ok((updated, stored))
            }
            Err(e) if e.is_cancelled() => {
                self.state_manager.cancel(source.id).await;
                warn!("ingestion of EPG source '{}' cancelled", source.name);
                Err(e)
            }
            Err(e) => {
                self.state_manager.fail(source.id, &e).await;
                Err(e)
            }
        }
    }
}
