//! Source handlers: the polymorphic ingestors for every supported stream
//! and EPG source type, their factory, and the service that drives them.

pub mod factory;
pub mod manual;
pub mod m3u;
pub mod service;
pub mod traits;
pub mod xmltv_epg;
pub mod xtream;
pub mod xtream_epg;

pub use factory::SourceHandlerFactory;
pub use service::IngestionService;
pub use traits::{ChannelSink, EpgSourceHandler, IngestSummary, ProgramSink, SourceHandler};
