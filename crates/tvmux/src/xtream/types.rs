//! Wire types for the Xtream Codes player API.

use serde::Deserialize;

use super::serde_helpers::{flexible_bool, string_or_i64, string_or_i64_option};

/// Response of the credential probe (no `action` parameter).
#[derive(Debug, Clone, Deserialize)]
pub struct XtreamAuthInfo {
    pub user_info: Option<XtreamUserInfo>,
    pub server_info: Option<XtreamServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XtreamUserInfo {
    pub username: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub auth: Option<i64>,
    pub exp_date: Option<String>,
    pub is_trial: Option<String>,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub active_cons: Option<i64>,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub max_connections: Option<i64>,
    #[serde(default)]
    pub allowed_output_formats: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XtreamServerInfo {
    pub url: Option<String>,
    pub port: Option<String>,
    pub https_port: Option<String>,
    pub server_protocol: Option<String>,
    /// IANA zone name the server claims to run in, e.g. `Europe/Berlin`.
    pub timezone: Option<String>,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub timestamp_now: Option<i64>,
    pub time_now: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XtreamCategory {
    pub category_id: String,
    pub category_name: String,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub parent_id: Option<i64>,
}

/// One entry of `get_live_streams`.
#[derive(Debug, Clone, Deserialize)]
pub struct XtreamStream {
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub num: Option<i64>,
    pub name: String,
    #[serde(default = "default_stream_type")]
    pub stream_type: String,
    #[serde(deserialize_with = "string_or_i64")]
    pub stream_id: i64,
    #[serde(default)]
    pub stream_icon: Option<String>,
    #[serde(default)]
    pub epg_channel_id: Option<String>,
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(deserialize_with = "flexible_bool", default)]
    pub is_adult: bool,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub tv_archive: Option<i64>,
    #[serde(default)]
    pub direct_source: Option<String>,
}

fn default_stream_type() -> String {
    "live".to_string()
}

/// Response of `get_simple_data_table`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct XtreamEpgTable {
    #[serde(default)]
    pub epg_listings: Vec<XtreamEpgListing>,
}

/// One guide entry of the per-stream EPG. `title` and `description` are
/// usually base64-encoded; timestamps are UNIX seconds that may be quoted.
#[derive(Debug, Clone, Deserialize)]
pub struct XtreamEpgListing {
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub epg_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub start_timestamp: Option<i64>,
    #[serde(deserialize_with = "string_or_i64_option", default)]
    pub stop_timestamp: Option<i64>,
    #[serde(deserialize_with = "flexible_bool", default)]
    pub now_playing: bool,
    #[serde(deserialize_with = "flexible_bool", default)]
    pub has_archive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_accepts_mixed_number_shapes() {
        let raw = r#"{
            "num": "3",
            "name": "News One",
            "stream_id": "101",
            "stream_icon": "http://logo/1.png",
            "epg_channel_id": "news.one",
            "category_id": "7",
            "is_adult": "0",
            "tv_archive": 1
        }"#;
        let stream: XtreamStream = serde_json::from_str(raw).unwrap();
        assert_eq!(stream.num, Some(3));
        assert_eq!(stream.stream_id, 101);
        assert_eq!(stream.stream_type, "live");
        assert!(!stream.is_adult);
        assert_eq!(stream.tv_archive, Some(1));
    }

    #[test]
    fn epg_listing_accepts_quoted_timestamps() {
        let raw = r#"{
            "id": "9",
            "title": "TW9ybmluZyBOZXdz",
            "channel_id": "news.one",
            "start_timestamp": "1705312800",
            "stop_timestamp": 1705316400
        }"#;
        let listing: XtreamEpgListing = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.start_timestamp, Some(1705312800));
        assert_eq!(listing.stop_timestamp, Some(1705316400));
    }

    #[test]
    fn auth_info_tolerates_partial_server_info() {
        let raw = r#"{
            "user_info": {"username": "a", "status": "Active", "auth": 1, "max_connections": "2"},
            "server_info": {"timezone": "Europe/Berlin", "timestamp_now": "1705312800"}
        }"#;
        let info: XtreamAuthInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(
            info.server_info.unwrap().timezone.as_deref(),
            Some("Europe/Berlin")
        );
        assert_eq!(info.user_info.unwrap().max_connections, Some(2));
    }
}
