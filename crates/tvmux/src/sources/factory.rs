//! Source handler factory
//!
//! Type-indexed registries holding one handler singleton per source type.
//! The default set is fixed at construction; `register` exists so tests can
//! swap in doubles, not as a general extension point.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{AppError, AppResult};
use crate::models::{EpgSourceType, StreamSourceType};
use crate::repositories::ManualChannelRepository;
use crate::utils::fetch::ResourceFetcher;

use super::manual::ManualSourceHandler;
use super::m3u::M3uSourceHandler;
use super::traits::{EpgSourceHandler, SourceHandler};
use super::xmltv_epg::XmltvEpgHandler;
use super::xtream::XtreamSourceHandler;
use super::xtream_epg::XtreamEpgHandler;

/// Registry of stream and EPG source handlers.
pub struct SourceHandlerFactory {
    handlers: RwLock<HashMap<StreamSourceType, Arc<dyn SourceHandler>>>,
    epg_handlers: RwLock<HashMap<EpgSourceType, Arc<dyn EpgSourceHandler>>>,
}

impl SourceHandlerFactory {
    /// Build the factory with the default handler set.
    pub fn new(
        fetcher: ResourceFetcher,
        manual_repository: Option<Arc<dyn ManualChannelRepository>>,
    ) -> Self {
        let mut handlers: HashMap<StreamSourceType, Arc<dyn SourceHandler>> = HashMap::new();
        handlers.insert(
            StreamSourceType::M3u,
            Arc::new(M3uSourceHandler::new(fetcher.clone())),
        );
        handlers.insert(
            StreamSourceType::Xtream,
            Arc::new(XtreamSourceHandler::new(fetcher.clone())),
        );
        handlers.insert(
            StreamSourceType::Manual,
            Arc::new(ManualSourceHandler::new(manual_repository)),
        );

        let mut epg_handlers: HashMap<EpgSourceType, Arc<dyn EpgSourceHandler>> = HashMap::new();
        epg_handlers.insert(
            EpgSourceType::Xmltv,
            Arc::new(XmltvEpgHandler::new(fetcher.clone())),
        );
        epg_handlers.insert(
            EpgSourceType::Xtream,
            Arc::new(XtreamEpgHandler::new(fetcher)),
        );

        Self {
            handlers: RwLock::new(handlers),
            epg_handlers: RwLock::new(epg_handlers),
        }
    }

    /// Handler for a stream source type.
    pub fn handler_for(&self, source_type: StreamSourceType) -> AppResult<Arc<dyn SourceHandler>> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .get(&source_type)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                resource: "source handler".to_string(),
                id: source_type.to_string(),
            })
    }

    /// Handler for an EPG source type.
    pub fn epg_handler_for(
        &self,
        source_type: EpgSourceType,
    ) -> AppResult<Arc<dyn EpgSourceHandler>> {
        self.epg_handlers
            .read()
            .expect("epg handler registry poisoned")
            .get(&source_type)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                resource: "epg source handler".to_string(),
                id: source_type.to_string(),
            })
    }

    /// Replace or add a stream handler (test side door).
    pub fn register(&self, handler: Arc<dyn SourceHandler>) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .insert(handler.source_type(), handler);
    }

    /// Replace or add an EPG handler (test side door).
    pub fn register_epg(&self, handler: Arc<dyn EpgSourceHandler>) {
        self.epg_handlers
            .write()
            .expect("epg handler registry poisoned")
            .insert(handler.epg_source_type(), handler);
    }

    pub fn supported_types(&self) -> Vec<StreamSourceType> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn supported_epg_types(&self) -> Vec<EpgSourceType> {
        self.epg_handlers
            .read()
            .expect("epg handler registry poisoned")
            .keys()
            .copied()
            .collect()
    }
}
