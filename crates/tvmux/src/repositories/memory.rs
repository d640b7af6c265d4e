//! In-memory repository implementation.
//!
//! Implements every repository contract over `RwLock`-guarded maps. Used as
//! the test fixture throughout the crate and viable as the store for small
//! embedded deployments that do not want a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::errors::AppResult;
use crate::models::{
    Channel, DataMappingRule, EpgProgram, EpgSource, Filter, ManualChannel, StreamSource,
};

use super::traits::{
    AssignedFilter, AssignedRule, ChannelRepository, EpgProgramRepository,
    ManualChannelRepository, ProxyConfigRepository,
};

#[derive(Default)]
struct Store {
    sources: HashMap<Ulid, StreamSource>,
    epg_sources: HashMap<Ulid, EpgSource>,
    filters: HashMap<Ulid, Filter>,
    rules: HashMap<Ulid, DataMappingRule>,
    channels: HashMap<Ulid, Vec<Channel>>,
    programs: HashMap<Ulid, Vec<EpgProgram>>,
    manual_channels: HashMap<Ulid, Vec<ManualChannel>>,
    proxy_sources: HashMap<Ulid, Vec<(Ulid, i32)>>,
    proxy_epg_sources: HashMap<Ulid, Vec<(Ulid, i32)>>,
    proxy_filters: HashMap<Ulid, Vec<(Ulid, i32, bool)>>,
    proxy_rules: HashMap<Ulid, Vec<(Ulid, i32)>>,
}

/// All repository contracts in one clonable handle.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_source(&self, source: StreamSource) {
        self.store.write().await.sources.insert(source.id, source);
    }

    pub async fn insert_epg_source(&self, source: EpgSource) {
        self.store
            .write()
            .await
            .epg_sources
            .insert(source.id, source);
    }

    /// Update a stored EPG source in place (handlers persist detected
    /// timezone and auto-shift after each ingestion).
    pub async fn update_epg_source(&self, source: &EpgSource) {
        self.store
            .write()
            .await
            .epg_sources
            .insert(source.id, source.clone());
    }

    pub async fn insert_filter(&self, filter: Filter) {
        self.store.write().await.filters.insert(filter.id, filter);
    }

    pub async fn insert_rule(&self, rule: DataMappingRule) {
        self.store.write().await.rules.insert(rule.id, rule);
    }

    pub async fn insert_manual_channel(&self, channel: ManualChannel) {
        self.store
            .write()
            .await
            .manual_channels
            .entry(channel.source_id)
            .or_default()
            .push(channel);
    }

    pub async fn assign_source(&self, proxy_id: Ulid, source_id: Ulid, priority_order: i32) {
        self.store
            .write()
            .await
            .proxy_sources
            .entry(proxy_id)
            .or_default()
            .push((source_id, priority_order));
    }

    pub async fn assign_epg_source(&self, proxy_id: Ulid, epg_source_id: Ulid, priority_order: i32) {
        self.store
            .write()
            .await
            .proxy_epg_sources
            .entry(proxy_id)
            .or_default()
            .push((epg_source_id, priority_order));
    }

    pub async fn assign_filter(
        &self,
        proxy_id: Ulid,
        filter_id: Ulid,
        priority_order: i32,
        is_active: bool,
    ) {
        self.store
            .write()
            .await
            .proxy_filters
            .entry(proxy_id)
            .or_default()
            .push((filter_id, priority_order, is_active));
    }

    pub async fn assign_rule(&self, proxy_id: Ulid, rule_id: Ulid, priority_order: i32) {
        self.store
            .write()
            .await
            .proxy_rules
            .entry(proxy_id)
            .or_default()
            .push((rule_id, priority_order));
    }

    /// Deleting a source deletes its channels; the source owns them.
    pub async fn delete_source(&self, source_id: Ulid) {
        let mut store = self.store.write().await;
        store.sources.remove(&source_id);
        store.channels.remove(&source_id);
    }

    pub async fn get_epg_source(&self, id: Ulid) -> Option<EpgSource> {
        self.store.read().await.epg_sources.get(&id).cloned()
    }
}

#[async_trait]
impl ProxyConfigRepository for InMemoryRepository {
    async fn sources_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<StreamSource>> {
        let store = self.store.read().await;
        let mut assignments = store
            .proxy_sources
            .get(&proxy_id)
            .cloned()
            .unwrap_or_default();
        assignments.sort_by_key(|(_, priority)| *priority);
        Ok(assignments
            .into_iter()
            .filter_map(|(id, _)| store.sources.get(&id).cloned())
            .collect())
    }

    async fn epg_sources_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<EpgSource>> {
        let store = self.store.read().await;
        let mut assignments = store
            .proxy_epg_sources
            .get(&proxy_id)
            .cloned()
            .unwrap_or_default();
        assignments.sort_by_key(|(_, priority)| *priority);
        Ok(assignments
            .into_iter()
            .filter_map(|(id, _)| store.epg_sources.get(&id).cloned())
            .collect())
    }

    async fn filters_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<AssignedFilter>> {
        let store = self.store.read().await;
        let mut assignments = store
            .proxy_filters
            .get(&proxy_id)
            .cloned()
            .unwrap_or_default();
        assignments.sort_by_key(|(_, priority, _)| *priority);
        Ok(assignments
            .into_iter()
            .filter_map(|(id, priority_order, is_active)| {
                store.filters.get(&id).cloned().map(|filter| AssignedFilter {
                    filter,
                    priority_order,
                    is_active,
                })
            })
            .collect())
    }

    async fn rules_for_proxy(&self, proxy_id: Ulid) -> AppResult<Vec<AssignedRule>> {
        let store = self.store.read().await;
        let mut assignments = store
            .proxy_rules
            .get(&proxy_id)
            .cloned()
            .unwrap_or_default();
        assignments.sort_by_key(|(_, priority)| *priority);
        Ok(assignments
            .into_iter()
            .filter_map(|(id, priority_order)| {
                store.rules.get(&id).cloned().map(|rule| AssignedRule {
                    rule,
                    priority_order,
                })
            })
            .collect())
    }
}

#[async_trait]
impl ChannelRepository for InMemoryRepository {
    async fn channels_for_source(&self, source_id: Ulid) -> AppResult<Vec<Channel>> {
        Ok(self
            .store
            .read()
            .await
            .channels
            .get(&source_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_source_channels(
        &self,
        source_id: Ulid,
        channels: Vec<Channel>,
    ) -> AppResult<usize> {
        let count = channels.len();
        self.store
            .write()
            .await
            .channels
            .insert(source_id, channels);
        Ok(count)
    }
}

#[async_trait]
impl EpgProgramRepository for InMemoryRepository {
    async fn programs_for_source(
        &self,
        source_id: Ulid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<EpgProgram>> {
        let store = self.store.read().await;
        let mut programs: Vec<EpgProgram> = store
            .programs
            .get(&source_id)
            .map(|programs| {
                programs
                    .iter()
                    .filter(|p| p.stop > from && p.start < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        programs.sort_by_key(|p| p.start);
        Ok(programs)
    }

    async fn replace_source_programs(
        &self,
        source_id: Ulid,
        programs: Vec<EpgProgram>,
    ) -> AppResult<usize> {
        let count = programs.len();
        self.store
            .write()
            .await
            .programs
            .insert(source_id, programs);
        Ok(count)
    }
}

#[async_trait]
impl ManualChannelRepository for InMemoryRepository {
    async fn enabled_channels_for_source(
        &self,
        source_id: Ulid,
    ) -> AppResult<Vec<ManualChannel>> {
        Ok(self
            .store
            .read()
            .await
            .manual_channels
            .get(&source_id)
            .map(|channels| {
                channels
                    .iter()
                    .filter(|c| c.is_enabled)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamSourceType;

    #[tokio::test]
    async fn sources_come_back_in_priority_order() {
        let repo = InMemoryRepository::new();
        let proxy_id = Ulid::new();
        let a = StreamSource::new("a", StreamSourceType::M3u, "http://a/pl.m3u");
        let b = StreamSource::new("b", StreamSourceType::M3u, "http://b/pl.m3u");
        let (a_id, b_id) = (a.id, b.id);
        repo.insert_source(a).await;
        repo.insert_source(b).await;
        repo.assign_source(proxy_id, b_id, 2).await;
        repo.assign_source(proxy_id, a_id, 1).await;

        let ordered = repo.sources_for_proxy(proxy_id).await.unwrap();
        assert_eq!(ordered[0].id, a_id);
        assert_eq!(ordered[1].id, b_id);
    }

    #[tokio::test]
    async fn deleting_a_source_drops_its_channels() {
        let repo = InMemoryRepository::new();
        let source = StreamSource::new("a", StreamSourceType::M3u, "http://a/pl.m3u");
        let source_id = source.id;
        repo.insert_source(source).await;
        repo.replace_source_channels(source_id, vec![]).await.unwrap();

        repo.delete_source(source_id).await;
        assert!(repo
            .channels_for_source(source_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn program_horizon_is_overlap_based() {
        use chrono::Duration;
        let repo = InMemoryRepository::new();
        let source_id = Ulid::new();
        let now = Utc::now();
        let make = |offset_h: i64, len_h: i64| {
            let mut p = crate::pipeline::state::test_support::program(source_id, "ch");
            p.start = now + Duration::hours(offset_h);
            p.stop = p.start + Duration::hours(len_h);
            p
        };
        repo.replace_source_programs(
            source_id,
            vec![make(-2, 1), make(-1, 2), make(1, 1), make(200, 1)],
        )
        .await
        .unwrap();

        let horizon = repo
            .programs_for_source(source_id, now, now + Duration::days(7))
            .await
            .unwrap();
        // Fully past and beyond-horizon entries are excluded; the one
        // straddling `now` stays.
        assert_eq!(horizon.len(), 2);
    }
}
