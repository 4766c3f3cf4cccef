use std::time::Duration;

use bevy::prelude::*;
use url::Url;

use crate::error::ChatError;

/// path the chat endpoint is served on, relative to the page origin.
pub const CHAT_PATH: &str = "/ws/chat";

/// delay before a lost channel is reopened.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// delay before a send that hit a closed channel is tried once more.
pub const SEND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// where the page was served from; the channel url is derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageOrigin {
    /// `https:` page -> `wss:` channel
    pub secure: bool,
    /// host, including an explicit port if the page had one
    pub host: String,
}

impl PageOrigin {
    pub fn new(secure: bool, host: impl Into<String>) -> Self {
        Self { secure, host: host.into() }
    }

    /// parse an `http(s)://host[:port]` origin. any path/query is ignored.
    pub fn parse(origin: &str) -> Result<Self, ChatError> {
        let url = Url::parse(origin).map_err(|e| ChatError::InvalidOrigin(format!("{origin}: {e}")))?;
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ChatError::InvalidOrigin(format!(
                    "{origin}: unsupported scheme '{other}'"
                )));
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ChatError::InvalidOrigin(format!("{origin}: missing host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self { secure, host })
    }

    /// origin of the page currently hosting us (browser only).
    #[cfg(target_arch = "wasm32")]
    pub fn from_window() -> Result<Self, ChatError> {
        let window = web_sys::window()
            .ok_or_else(|| ChatError::InvalidOrigin("no window".into()))?;
        let location = window.location();
        let protocol = location
            .protocol()
            .map_err(|e| ChatError::InvalidOrigin(format!("{e:?}")))?;
        let host = location
            .host()
            .map_err(|e| ChatError::InvalidOrigin(format!("{e:?}")))?;
        Ok(Self { secure: protocol == "https:", host })
    }

    pub fn channel_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// `(ws|wss)://<host><path>`; a missing leading `/` on `path` is added.
    pub fn url_for(&self, path: &str) -> String {
        let slash = if path.starts_with('/') { "" } else { "/" };
        format!("{}://{}{}{}", self.channel_scheme(), self.host, slash, path)
    }
}

impl Default for PageOrigin {
    fn default() -> Self {
        Self::new(false, "127.0.0.1:8000")
    }
}

/// knobs for the connection manager and transcript controller.
///
/// defaults match the page this plugin replaces: 3s reconnect, 1s send retry.
#[derive(Resource, Clone, Debug)]
pub struct ChatConfig {
    pub origin: PageOrigin,
    pub path: String,
    pub reconnect_delay: Duration,
    pub send_retry_delay: Duration,
    /// cap on inbox items handled per frame, so a bursty stream can't stall a frame
    pub max_frames_per_update: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            origin: PageOrigin::default(),
            path: CHAT_PATH.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            send_retry_delay: SEND_RETRY_DELAY,
            max_frames_per_update: 512,
        }
    }
}

impl ChatConfig {
    pub fn with_origin(origin: PageOrigin) -> Self {
        Self { origin, ..default() }
    }

    /// config pointed at the page we're running in.
    #[cfg(target_arch = "wasm32")]
    pub fn from_page() -> Result<Self, ChatError> {
        Ok(Self::with_origin(PageOrigin::from_window()?))
    }

    pub fn endpoint(&self) -> String {
        self.origin.url_for(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn secure_page_maps_to_secure_channel() {
        let origin = PageOrigin::parse("https://chat.example.com").unwrap();
        assert!(origin.secure);
        assert_eq!(origin.url_for(CHAT_PATH), "wss://chat.example.com/ws/chat");
    }

    #[test]
    fn plain_page_keeps_explicit_port() {
        let origin = PageOrigin::parse("http://localhost:8000/index.html?x=1").unwrap();
        assert_eq!(origin, PageOrigin::new(false, "localhost:8000"));
        assert_eq!(ChatConfig::with_origin(origin).endpoint(), "ws://localhost:8000/ws/chat");
    }

    #[test]
    fn rejects_non_http_origins() {
        assert!(matches!(
            PageOrigin::parse("ftp://example.com"),
            Err(ChatError::InvalidOrigin(_))
        ));
        assert!(matches!(PageOrigin::parse("not a url"), Err(ChatError::InvalidOrigin(_))));
    }

    #[test]
    fn default_config_endpoint() {
        let cfg = ChatConfig::default();
        assert_eq!(cfg.endpoint(), "ws://127.0.0.1:8000/ws/chat");
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(3));
        assert_eq!(cfg.send_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn endpoint_normalizes_relative_path() {
        let cfg = ChatConfig {
            path: "ws/other".into(),
            ..ChatConfig::with_origin(PageOrigin::new(true, "h"))
        };
        assert_eq!(cfg.endpoint(), "wss://h/ws/other");
    }
}
