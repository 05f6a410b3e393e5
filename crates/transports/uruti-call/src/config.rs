//! Configuration types for the peer session coordinator

use crate::media::MediaConstraints;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// Port the signaling relay listens on, next to the web front-end
pub const DEFAULT_SIGNALING_PORT: u16 = 8000;

/// Path prefix of the signaling endpoint; the local peer id is appended
pub const DEFAULT_SIGNALING_PATH: &str = "/api/v1/ws/signal";

/// Main configuration for PeerSessionCoordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Signaling relay settings
    pub signaling: SignalingConfig,

    /// NAT traversal helper servers
    pub ice: IceConfig,

    /// Local capture constraints
    pub media: MediaConstraints,

    /// Link quality polling
    pub quality: QualityConfig,
}

/// Signaling relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Origin of the page hosting the call UI (scheme picks ws/wss, host is reused)
    pub page_origin: String,

    /// Relay port on the same host (default: 8000)
    pub port: u16,

    /// Relay path prefix (default: /api/v1/ws/signal)
    pub path: String,

    /// Connect as soon as the channel is created (default: true)
    pub auto_connect: bool,

    /// Full ws:// or wss:// base URL, bypassing origin derivation
    pub url_override: Option<String>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// NAT traversal helper servers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN servers (none by default)
    pub turn_servers: Vec<TurnServerConfig>,
}

/// One NAT traversal helper as handed to the real-time backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,

    /// Username (TURN only)
    pub username: String,

    /// Credential (TURN only)
    pub credential: String,
}

/// Link quality polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Polling interval in milliseconds (default: 3000)
    pub poll_interval_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            page_origin: "http://localhost:3000".to_string(),
            port: DEFAULT_SIGNALING_PORT,
            path: DEFAULT_SIGNALING_PATH.to_string(),
            auto_connect: true,
            url_override: None,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
        }
    }
}

impl IceConfig {
    /// Flatten STUN and TURN entries into the list the backend consumes
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.stun_servers
            .iter()
            .map(|url| IceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.turn_servers.iter().map(|turn| IceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            }))
            .collect()
    }
}

impl QualityConfig {
    /// Polling interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CoordinatorConfig {
    /// Parse a configuration from TOML text; missing fields take defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file in TOML format
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty or holds a non-STUN URL
    /// - a TURN entry does not use the turn: or turns: scheme
    /// - `page_origin` is not an http(s) URL with a host
    /// - `url_override` is not a ws:// or wss:// URL
    /// - `poll_interval_ms` is zero
    pub fn validate(&self) -> Result<()> {
        if self.ice.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        for url in &self.ice.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.ice.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        match &self.signaling.url_override {
            Some(url) => {
                if !url.starts_with("ws://") && !url.starts_with("wss://") {
                    return Err(Error::InvalidConfig(format!(
                        "url_override must start with ws:// or wss://, got {}",
                        url
                    )));
                }
            }
            None => {
                let origin = url::Url::parse(&self.signaling.page_origin).map_err(|e| {
                    Error::InvalidConfig(format!(
                        "page_origin is not a valid URL ({}): {}",
                        self.signaling.page_origin, e
                    ))
                })?;
                if origin.scheme() != "http" && origin.scheme() != "https" {
                    return Err(Error::InvalidConfig(format!(
                        "page_origin must use http or https, got {}",
                        origin.scheme()
                    )));
                }
                if origin.host_str().is_none() {
                    return Err(Error::InvalidConfig(
                        "page_origin must include a host".to_string(),
                    ));
                }
            }
        }

        if self.quality.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ice.stun_servers.len(), 5);
        assert!(config.ice.turn_servers.is_empty());
        assert_eq!(config.signaling.port, 8000);
        assert_eq!(config.quality.poll_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_ice_servers_flatten() {
        let ice = IceConfig {
            stun_servers: vec!["stun:stun.example.org:3478".to_string()],
            turn_servers: vec![TurnServerConfig {
                url: "turn:turn.example.org:3478".to_string(),
                username: "user".to_string(),
                credential: "secret".to_string(),
            }],
        };

        let servers = ice.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478"]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "secret");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CoordinatorConfig::default();
        config.ice.stun_servers.clear();
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = CoordinatorConfig::default();
        config.ice.stun_servers = vec!["http://stun.example.org".to_string()];
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.signaling.page_origin = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.signaling.url_override = Some("http://relay.example.org".to_string());
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.quality.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            [signaling]
            page_origin = "https://uruti.example.org"
            auto_connect = false

            [quality]
            poll_interval_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.signaling.page_origin, "https://uruti.example.org");
        assert!(!config.signaling.auto_connect);
        assert_eq!(config.signaling.port, 8000);
        assert_eq!(config.quality.poll_interval_ms, 1500);
        assert_eq!(config.ice.stun_servers.len(), 5);
        assert_eq!(config.media.video.ideal_width, 1280);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(CoordinatorConfig::from_toml_str("[signaling\n").is_err());
        assert!(CoordinatorConfig::from_toml_str("[quality]\npoll_interval_ms = 0\n").is_err());
    }
}
