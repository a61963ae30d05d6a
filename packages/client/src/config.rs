//! Client configuration.

use std::{path::PathBuf, time::Duration};

use crate::location::WatchOptions;

/// Backend host shared by the REST API and the real-time channel.
pub const DEFAULT_BASE_URL: &str = "https://geolocalizacion-backend-wtnq.onrender.com";

/// Runtime configuration for one client process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API and the Socket.IO endpoint
    pub base_url: String,
    /// Timeout applied to every REST request
    pub rest_timeout: Duration,
    /// Timeout for establishing the real-time channel
    pub connect_timeout: Duration,
    /// Minimum interval between forwarded location fixes
    pub throttle_window: Duration,
    /// Quiet period after a map region change before reloading nearby entities
    pub region_debounce: Duration,
    /// Zoom level used when the camera recenters on a fix
    pub camera_zoom: u8,
    /// Options passed to the device location watch
    pub watch_options: WatchOptions,
    /// Directory holding the persisted session
    pub session_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rest_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(20),
            throttle_window: Duration::from_millis(5000),
            region_debounce: Duration::from_millis(600),
            camera_zoom: 16,
            watch_options: WatchOptions::default(),
            session_dir: PathBuf::from(".mapsapp"),
        }
    }
}

impl ClientConfig {
    /// Socket.IO WebSocket endpoint derived from `base_url`.
    ///
    /// `https` becomes `wss` and `http` becomes `ws`.
    pub fn socket_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/socket.io/?EIO=4&transport=websocket", base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_https_base() {
        // テスト項目: https のベース URL から wss のソケット URL が生成される
        // given (前提条件):
        let config = ClientConfig::default();

        // when (操作):
        let url = config.socket_url();

        // then (期待する結果):
        assert_eq!(
            url,
            "wss://geolocalizacion-backend-wtnq.onrender.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_socket_url_from_http_base_with_trailing_slash() {
        // テスト項目: 末尾スラッシュ付きの http ベース URL から ws の URL が生成される
        // given (前提条件):
        let config = ClientConfig {
            base_url: "http://127.0.0.1:3000/".to_string(),
            ..ClientConfig::default()
        };

        // when (操作):
        let url = config.socket_url();

        // then (期待する結果):
        assert_eq!(url, "ws://127.0.0.1:3000/socket.io/?EIO=4&transport=websocket");
    }

    #[test]
    fn test_default_timings() {
        // テスト項目: デフォルト値が想定どおりである
        // given (前提条件):
        let config = ClientConfig::default();

        // then (期待する結果):
        assert_eq!(config.rest_timeout, Duration::from_secs(15));
        assert_eq!(config.throttle_window, Duration::from_millis(5000));
        assert_eq!(config.region_debounce, Duration::from_millis(600));
    }
}
