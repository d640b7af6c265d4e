//! Typed Xtream Codes API client
//!
//! Speaks the `player_api.php` protocol:
//! `{base}/player_api.php?username=U&password=P&action=A[&stream_id=S]`.
//! Providers are loose with JSON types (numbers arrive as quoted strings,
//! flags as `"0"`/`"1"`), so the deserializers here accept both shapes.
//! Per-stream EPG titles and descriptions are base64; they are decoded
//! opportunistically, keeping the original value when decoding fails.

mod serde_helpers;
mod types;

pub use types::{
    XtreamAuthInfo, XtreamCategory, XtreamEpgListing, XtreamEpgTable, XtreamServerInfo,
    XtreamStream, XtreamUserInfo,
};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::errors::{AppError, AppResult, SourceError};
use crate::utils::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::utils::url::UrlUtils;

/// Client for one Xtream server account.
#[derive(Clone)]
pub struct XtreamClient {
    client: reqwest::Client,
    breaker: Option<Arc<CircuitBreaker>>,
    base_url: Url,
    username: String,
    password: String,
    timeout: Duration,
}

impl XtreamClient {
    /// Create a client from the account's portal URL.
    ///
    /// The caller supplies the HTTP client (and optionally a breaker) so
    /// fetch policy stays in one place.
    pub fn new(
        client: reqwest::Client,
        breaker: Option<Arc<CircuitBreaker>>,
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> AppResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::validation(format!("Invalid Xtream URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SourceError::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
            }
            .into());
        }

        // Reduce to scheme://host[:port]; providers hand out URLs with and
        // without the player_api.php suffix.
        let mut base_url = parsed.clone();
        base_url.set_path("");
        base_url.set_query(None);
        base_url.set_fragment(None);

        Ok(Self {
            client,
            breaker,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            timeout,
        })
    }

    /// Authentication probe; also reports server details such as timezone.
    pub async fn get_auth_info(&self, token: &CancellationToken) -> AppResult<XtreamAuthInfo> {
        let url = self.player_api_url(None, &[])?;
        let info: XtreamAuthInfo = self.get_json(token, url).await?;

        match &info.user_info {
            Some(user) if user.status.as_deref() == Some("Active") => {}
            Some(user) => {
                return Err(SourceError::auth_failed(
                    "xtream",
                    format!(
                        "user status is {}",
                        user.status.as_deref().unwrap_or("unknown")
                    ),
                )
                .into());
            }
            None => {
                return Err(
                    SourceError::auth_failed("xtream", "server returned no user info").into(),
                );
            }
        }
        Ok(info)
    }

    pub async fn get_live_categories(
        &self,
        token: &CancellationToken,
    ) -> AppResult<Vec<XtreamCategory>> {
        let url = self.player_api_url(Some("get_live_categories"), &[])?;
        self.get_json(token, url).await
    }

    pub async fn get_live_streams(
        &self,
        token: &CancellationToken,
        category_id: Option<&str>,
    ) -> AppResult<Vec<XtreamStream>> {
        let extra: Vec<(&str, &str)> = category_id
            .map(|id| vec![("category_id", id)])
            .unwrap_or_default();
        let url = self.player_api_url(Some("get_live_streams"), &extra)?;
        self.get_json(token, url).await
    }

    /// Full per-stream guide (`get_simple_data_table`).
    pub async fn get_full_epg(
        &self,
        token: &CancellationToken,
        stream_id: i64,
    ) -> AppResult<XtreamEpgTable> {
        let stream_id = stream_id.to_string();
        let url = self.player_api_url(
            Some("get_simple_data_table"),
            &[("stream_id", stream_id.as_str())],
        )?;
        self.get_json(token, url).await
    }

    /// Raw bytes of the bulk guide at `/xmltv.php` (possibly compressed;
    /// callers hand it to the XMLTV parser which sniffs the format).
    pub async fn get_xmltv_bytes(&self, token: &CancellationToken) -> AppResult<Bytes> {
        let mut url = self
            .base_url
            .join("xmltv.php")
            .map_err(|e| AppError::validation(format!("Invalid Xtream URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("username", &self.username)
            .append_pair("password", &self.password);
        self.get_bytes(token, url).await
    }

    /// Playable URL for a live stream:
    /// `{base}/live/{username}/{password}/{stream_id}.{ext}`.
    pub fn live_stream_url(&self, stream_id: i64, ext: &str) -> String {
        format!(
            "{}/live/{}/{}/{}.{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.username,
            self.password,
            stream_id,
            ext
        )
    }

    fn player_api_url(&self, action: Option<&str>, extra: &[(&str, &str)]) -> AppResult<Url> {
        let mut url = self
            .base_url
            .join("player_api.php")
            .map_err(|e| AppError::validation(format!("Invalid Xtream URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("username", &self.username);
            pairs.append_pair("password", &self.password);
            if let Some(action) = action {
                pairs.append_pair("action", action);
            }
            for (key, value) in extra {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &CancellationToken,
        url: Url,
    ) -> AppResult<T> {
        let bytes = self.get_bytes(token, url).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            SourceError::parse_failure("xtream", format!("unexpected JSON shape: {e}")).into()
        })
    }

    async fn get_bytes(&self, token: &CancellationToken, url: Url) -> AppResult<Bytes> {
        debug!(
            "xtream request {}",
            UrlUtils::obfuscate_credentials(url.as_str())
        );
        if token.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let request = self.client.get(url.clone()).timeout(self.timeout);
        let send = async {
            match &self.breaker {
                Some(breaker) => breaker
                    .execute_with_timeout(self.timeout, || async move {
                        request
                            .send()
                            .await
                            .map_err(|e| UrlUtils::obfuscate_credentials(&e.to_string()))
                    })
                    .await
                    .map_err(|e| match e {
                        CircuitBreakerError::CircuitOpen => {
                            SourceError::fetch_failed("circuit breaker open for xtream host")
                        }
                        CircuitBreakerError::Timeout => {
                            SourceError::fetch_failed("xtream request timed out")
                        }
                        CircuitBreakerError::ServiceError(msg) => SourceError::fetch_failed(msg),
                    }),
                None => request.send().await.map_err(|e| {
                    SourceError::fetch_failed(UrlUtils::obfuscate_credentials(&e.to_string()))
                }),
            }
        };

        let response = tokio::select! {
            _ = token.cancelled() => return Err(AppError::Cancelled),
            result = send => result?,
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SourceError::fetch_status(
                status.as_u16(),
                format!("xtream server returned {status}"),
            )
            .into());
        }

        response
            .bytes()
            .await
            .map_err(|e| SourceError::fetch_failed(format!("failed to read response: {e}")).into())
    }
}

/// Decode a base64 field, keeping the original on failure. Xtream servers
/// base64-encode `title` and `description` in `get_simple_data_table`
/// responses, but not consistently.
pub fn decode_base64_or_keep(value: &str) -> String {
    use base64::Engine;
    match base64::engine::general_purpose::STANDARD.decode(value.trim()) {
        Ok(decoded) => match String::from_utf8(decoded) {
            Ok(text) => text,
            Err(_) => value.to_string(),
        },
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> XtreamClient {
        XtreamClient::new(
            reqwest::Client::new(),
            None,
            "http://provider.example:8080",
            "alice",
            "secret",
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn live_stream_url_shape() {
        assert_eq!(
            client().live_stream_url(42, "ts"),
            "http://provider.example:8080/live/alice/secret/42.ts"
        );
    }

    #[test]
    fn base_url_strips_api_suffix_and_query() {
        let client = XtreamClient::new(
            reqwest::Client::new(),
            None,
            "http://provider.example:8080/player_api.php?username=x",
            "alice",
            "secret",
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(
            client.live_stream_url(1, "ts"),
            "http://provider.example:8080/live/alice/secret/1.ts"
        );
    }

    #[test]
    fn player_api_url_carries_credentials_and_action() {
        let url = client()
            .player_api_url(Some("get_live_streams"), &[("category_id", "7")])
            .unwrap();
        let s = url.as_str();
        assert!(s.starts_with("http://provider.example:8080/player_api.php?"));
        assert!(s.contains("username=alice"));
        assert!(s.contains("password=secret"));
        assert!(s.contains("action=get_live_streams"));
        assert!(s.contains("category_id=7"));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let result = XtreamClient::new(
            reqwest::Client::new(),
            None,
            "file:///etc/passwd",
            "a",
            "b",
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn base64_decoding_is_opportunistic() {
        assert_eq!(decode_base64_or_keep("TW9ybmluZyBOZXdz"), "Morning News");
        assert_eq!(decode_base64_or_keep("Not base64!"), "Not base64!");
        assert_eq!(decode_base64_or_keep(""), "");
    }
}
