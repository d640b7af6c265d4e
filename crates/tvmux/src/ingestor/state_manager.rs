//! Ingestion state tracking
//!
//! A process-wide tracker of in-flight ingestions with an
//! at-most-one-per-source invariant: `start` refuses a source that is still
//! `Ingesting`, while terminal entries awaiting cleanup never block a
//! restart. Completed and failed states linger for a short grace window so
//! observers can read the outcome, then a single cleanup worker removes
//! them; cancellation removes the entry immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ulid::Ulid;

use crate::config::StateManagerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{IngestionState, IngestionStatus};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read-only view of ingestion activity, injected into the pipeline guard.
#[async_trait::async_trait]
pub trait IngestionStateView: Send + Sync {
    async fn is_any_ingesting(&self) -> bool;
    async fn active_ingestion_count(&self) -> usize;
    async fn get_all_states(&self) -> Vec<IngestionState>;
}

/// Process-wide ingestion state manager.
#[derive(Clone)]
pub struct IngestionStateManager {
    states: Arc<RwLock<HashMap<Ulid, IngestionState>>>,
    cleanup_tx: mpsc::UnboundedSender<(Ulid, Instant)>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl IngestionStateManager {
    pub fn new(config: StateManagerConfig) -> Self {
        let states: Arc<RwLock<HashMap<Ulid, IngestionState>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(cleanup_worker(
            Arc::clone(&states),
            cleanup_rx,
            shutdown.clone(),
        ));

        Self {
            states,
            cleanup_tx,
            shutdown,
            grace: config.cleanup_grace,
        }
    }

    /// Stop the cleanup worker. Existing state remains readable.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Register a new ingestion.
    ///
    /// Fails with `AlreadyInProgress` only when an entry with status
    /// `Ingesting` exists; terminal entries waiting out their grace window
    /// are overwritten.
    pub async fn start(&self, source_id: Ulid, source_name: &str) -> AppResult<()> {
        let mut states = self.states.write().await;
        if let Some(existing) = states.get(&source_id) {
            if existing.status == IngestionStatus::Ingesting {
                return Err(AppError::AlreadyInProgress {
                    source_id: source_id.to_string(),
                });
            }
        }
        let now = Utc::now();
        states.insert(
            source_id,
            IngestionState {
                source_id,
                source_name: source_name.to_string(),
                status: IngestionStatus::Ingesting,
                started_at: now,
                last_updated: now,
                processed: 0,
                errors: 0,
                error: None,
            },
        );
        debug!("ingestion started for source '{source_name}' ({source_id})");
        Ok(())
    }

    /// Record progress counters for a running ingestion.
    pub async fn update_progress(&self, source_id: Ulid, processed: u64, errors: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&source_id) {
            if state.status == IngestionStatus::Ingesting {
                state.processed = processed;
                state.errors = errors;
                state.last_updated = Utc::now();
            }
        }
    }

    /// Mark an ingestion completed; the entry is scheduled for cleanup after
    /// the grace window.
    pub async fn complete(&self, source_id: Ulid, processed: u64) {
        self.finish(source_id, IngestionStatus::Completed, Some(processed), None)
            .await;
    }

    /// Mark an ingestion failed; the entry is scheduled for cleanup after
    /// the grace window.
    pub async fn fail(&self, source_id: Ulid, error: &AppError) {
        self.finish(
            source_id,
            IngestionStatus::Failed,
            None,
            Some(error.to_string()),
        )
        .await;
    }

    /// Remove a tracked ingestion immediately. Returns whether one existed.
    pub async fn cancel(&self, source_id: Ulid) -> bool {
        let mut states = self.states.write().await;
        states.remove(&source_id).is_some()
    }

    /// Copy of one tracked state.
    pub async fn get_state(&self, source_id: Ulid) -> Option<IngestionState> {
        self.states.read().await.get(&source_id).cloned()
    }

    pub async fn is_ingesting(&self, source_id: Ulid) -> bool {
        self.states
            .read()
            .await
            .get(&source_id)
            .map(|s| s.status == IngestionStatus::Ingesting)
            .unwrap_or(false)
    }

    /// Poll until the ingestion leaves `Ingesting` or its entry vanishes,
    /// returning the terminal error message if one was recorded.
    pub async fn wait_for_completion(
        &self,
        token: &CancellationToken,
        source_id: Ulid,
    ) -> AppResult<Option<String>> {
        loop {
            let snapshot = self.get_state(source_id).await;
            match snapshot {
                None => return Ok(None),
                Some(state) if state.status.is_terminal() => return Ok(state.error),
                Some(_) => {}
            }
            tokio::select! {
                _ = token.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {}
            }
        }
    }

    async fn finish(
        &self,
        source_id: Ulid,
        status: IngestionStatus,
        processed: Option<u64>,
        error: Option<String>,
    ) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&source_id) {
            state.status = status;
            state.last_updated = Utc::now();
            if let Some(processed) = processed {
                state.processed = processed;
            }
            state.error = error;
            let _ = self
                .cleanup_tx
                .send((source_id, Instant::now() + self.grace));
        }
    }
}

#[async_trait::async_trait]
impl IngestionStateView for IngestionStateManager {
    async fn is_any_ingesting(&self) -> bool {
        self.states
            .read()
            .await
            .values()
            .any(|s| s.status == IngestionStatus::Ingesting)
    }

    async fn active_ingestion_count(&self) -> usize {
        self.states
            .read()
            .await
            .values()
            .filter(|s| s.status == IngestionStatus::Ingesting)
            .count()
    }

    async fn get_all_states(&self) -> Vec<IngestionState> {
        self.states.read().await.values().cloned().collect()
    }
}

/// Removes terminal entries once their grace deadline passes. Deadlines
/// arrive in FIFO order, so a plain sequential sleep is sufficient.
async fn cleanup_worker(
    states: Arc<RwLock<HashMap<Ulid, IngestionState>>>,
    mut rx: mpsc::UnboundedReceiver<(Ulid, Instant)>,
    shutdown: CancellationToken,
) {
    loop {
        let (source_id, deadline) = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let mut states = states.write().await;
        // A restart during the grace window replaces the entry with a live
        // one; leave that alone.
        if states
            .get(&source_id)
            .map(|s| s.status.is_terminal())
            .unwrap_or(false)
        {
            states.remove(&source_id);
            debug!("cleaned up terminal ingestion state for {source_id}");
        }
    }
}
