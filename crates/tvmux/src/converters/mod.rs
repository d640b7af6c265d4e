//! Model ↔ wire-format converters shared by the generation stages.

use chrono::FixedOffset;

use crate::ingestor::m3u::M3uEntry;
use crate::ingestor::xmltv::{XmltvChannel, XmltvCredits, XmltvProgramme};
use crate::models::{Channel, EpgProgram};

pub use crate::utils::url::build_proxy_stream_url;

/// Map a channel back to a playlist entry. A `renumber` greater than zero
/// overrides the channel number (proxy output is renumbered contiguously).
pub fn channel_to_m3u_entry(channel: &Channel, renumber: u32) -> M3uEntry {
    let mut entry = M3uEntry {
        duration: -1.0,
        tvg_id: channel.tvg_id.clone(),
        tvg_name: channel.tvg_name.clone(),
        tvg_logo: channel.tvg_logo.clone(),
        group_title: channel.group_title.clone(),
        channel_number: channel.channel_number,
        title: channel.channel_name.clone(),
        url: channel.stream_url.clone(),
        extra: Default::default(),
    };
    if renumber > 0 {
        entry.channel_number = Some(renumber);
    }
    if let Some(extra) = channel.extra.as_deref() {
        if let Ok(map) = serde_json::from_str(extra) {
            entry.extra = map;
        }
    }
    entry
}

/// Map a channel to its `<channel>` guide element. The display name prefers
/// `tvg_name` and falls back to the channel name.
pub fn channel_to_xmltv_channel(channel: &Channel) -> XmltvChannel {
    let display_name = channel
        .tvg_name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| channel.channel_name.clone());
    XmltvChannel {
        id: channel.tvg_id.clone().unwrap_or_default(),
        display_name: Some(display_name),
        icon: channel.tvg_logo.clone(),
    }
}

/// Map a stored program back to a `<programme>` element. Stored timestamps
/// are UTC already.
pub fn program_to_xmltv_programme(program: &EpgProgram) -> XmltvProgramme {
    let utc = FixedOffset::east_opt(0).expect("zero offset");
    let credits = program
        .credits
        .as_deref()
        .and_then(|raw| serde_json::from_str::<XmltvCredits>(raw).ok())
        .unwrap_or_default();
    XmltvProgramme {
        channel: program.channel_id.clone(),
        start: program.start.with_timezone(&utc),
        stop: program.stop.with_timezone(&utc),
        title: Some(program.title.clone()).filter(|t| !t.is_empty()),
        sub_title: program.sub_title.clone(),
        desc: program.description.clone(),
        category: program.category.clone(),
        icon: program.icon.clone(),
        episode_num: program.episode_num.clone(),
        rating: program.rating.clone(),
        language: program.language.clone(),
        credits,
        is_new: program.is_new,
        is_premiere: program.is_premiere,
        timezone_offset: "+0000".to_string(),
    }
}
