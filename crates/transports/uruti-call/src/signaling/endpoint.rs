//! Relay endpoint derivation and local peer ids

use crate::config::SignalingConfig;
use crate::{Error, Result};
use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a local peer id: `peer-{unix_ms}-{9 base36 chars}`
pub fn generate_peer_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("peer-{}-{}", millis, suffix)
}

/// Build the relay URL for `peer_id` from the page origin
///
/// Same host as the page, fixed port, `wss` when the page is served over
/// https and `ws` otherwise.
pub fn endpoint_from_origin(origin: &str, port: u16, path: &str, peer_id: &str) -> Result<String> {
    let origin = url::Url::parse(origin)
        .map_err(|e| Error::InvalidConfig(format!("Invalid page origin {}: {}", origin, e)))?;

    let scheme = if origin.scheme() == "https" { "wss" } else { "ws" };
    let host = origin
        .host_str()
        .ok_or_else(|| Error::InvalidConfig("Page origin has no host".to_string()))?;

    Ok(format!(
        "{}://{}:{}/{}/{}",
        scheme,
        host,
        port,
        path.trim_matches('/'),
        peer_id
    ))
}

impl SignalingConfig {
    /// Resolve the relay URL for `peer_id`
    pub fn endpoint(&self, peer_id: &str) -> Result<String> {
        match &self.url_override {
            Some(base) => Ok(format!("{}/{}", base.trim_end_matches('/'), peer_id)),
            None => endpoint_from_origin(&self.page_origin, self.port, &self.path, peer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_format() {
        let id = generate_peer_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "peer");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_peer_ids_differ() {
        assert_ne!(generate_peer_id(), generate_peer_id());
    }

    #[test]
    fn test_endpoint_scheme_follows_page() {
        assert_eq!(
            endpoint_from_origin("https://app.uruti.rw", 8000, "/api/v1/ws/signal", "peer-1")
                .unwrap(),
            "wss://app.uruti.rw:8000/api/v1/ws/signal/peer-1"
        );
        assert_eq!(
            endpoint_from_origin("http://localhost:3000", 8000, "/api/v1/ws/signal", "peer-1")
                .unwrap(),
            "ws://localhost:8000/api/v1/ws/signal/peer-1"
        );
    }

    #[test]
    fn test_endpoint_rejects_bad_origin() {
        assert!(endpoint_from_origin("not a url", 8000, "/x", "p").is_err());
    }

    #[test]
    fn test_config_endpoint_override() {
        let config = SignalingConfig {
            url_override: Some("ws://127.0.0.1:9000/api/v1/ws/signal/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint("peer-9").unwrap(),
            "ws://127.0.0.1:9000/api/v1/ws/signal/peer-9"
        );

        let config = SignalingConfig::default();
        assert_eq!(
            config.endpoint("peer-9").unwrap(),
            "ws://localhost:8000/api/v1/ws/signal/peer-9"
        );
    }
}
