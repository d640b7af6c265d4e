//! Streaming ingestion: playlist and guide parsers plus the process-wide
//! ingestion state tracker.

pub mod m3u;
pub mod state_manager;
pub mod xmltv;

pub use m3u::{M3uEntry, M3uParseSummary, M3uParser};
pub use state_manager::{IngestionStateManager, IngestionStateView};
pub use xmltv::{XmltvChannel, XmltvCredits, XmltvParseSummary, XmltvParser, XmltvProgramme};
