//! Pipeline stages, in execution order: ingestion guard, channel load,
//! data mapping, filtering, EPG load & prune, M3U generation, XMLTV
//! generation, publish.

pub mod channel_load;
pub mod data_mapping;
pub mod epg_load;
pub mod filtering;
pub mod generate_m3u;
pub mod generate_xmltv;
pub mod ingestion_guard;
pub mod publish;

pub use channel_load::ChannelLoadStage;
pub use data_mapping::DataMappingStage;
pub use epg_load::EpgLoadStage;
pub use filtering::FilteringStage;
pub use generate_m3u::{GenerateM3uStage, M3U_TEMP_PATH_KEY};
pub use generate_xmltv::{GenerateXmltvStage, XMLTV_TEMP_PATH_KEY};
pub use ingestion_guard::IngestionGuardStage;
pub use publish::PublishStage;
