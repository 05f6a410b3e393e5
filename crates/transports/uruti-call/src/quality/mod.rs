//! Link quality classification and polling

pub mod monitor;

pub use monitor::QualityMonitor;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse link quality shown next to each participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityClass {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl fmt::Display for QualityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityClass::Excellent => "excellent",
            QualityClass::Good => "good",
            QualityClass::Fair => "fair",
            QualityClass::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Classify a link from round-trip time and cumulative packet loss
///
/// Evaluated top to bottom, first match wins:
///
/// | Condition | Class |
/// |---|---|
/// | rtt > 300 or lost > 50 | poor |
/// | rtt > 150 or lost > 20 | fair |
/// | rtt > 50 | good |
/// | otherwise | excellent |
pub fn classify(rtt_ms: f64, packets_lost: u64) -> QualityClass {
    if rtt_ms > 300.0 || packets_lost > 50 {
        QualityClass::Poor
    } else if rtt_ms > 150.0 || packets_lost > 20 {
        QualityClass::Fair
    } else if rtt_ms > 50.0 {
        QualityClass::Good
    } else {
        QualityClass::Excellent
    }
}

/// Live statistics of one link
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkStats {
    /// Round-trip time in milliseconds
    pub round_trip_time_ms: f64,
    /// Packets the remote side reports lost
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl LinkStats {
    pub fn quality(&self) -> QualityClass {
        classify(self.round_trip_time_ms, self.packets_lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(301.0, 0), QualityClass::Poor);
        assert_eq!(classify(150.0, 0), QualityClass::Good);
        assert_eq!(classify(151.0, 0), QualityClass::Fair);
        assert_eq!(classify(0.0, 0), QualityClass::Excellent);
        assert_eq!(classify(60.0, 0), QualityClass::Good);
    }

    #[test]
    fn test_loss_dominates() {
        assert_eq!(classify(0.0, 51), QualityClass::Poor);
        assert_eq!(classify(0.0, 50), QualityClass::Fair);
        assert_eq!(classify(0.0, 21), QualityClass::Fair);
        assert_eq!(classify(0.0, 20), QualityClass::Excellent);
        assert_eq!(classify(50.0, 0), QualityClass::Excellent);
        assert_eq!(classify(300.0, 0), QualityClass::Fair);
    }

    #[test]
    fn test_display_matches_serde() {
        for class in [
            QualityClass::Excellent,
            QualityClass::Good,
            QualityClass::Fair,
            QualityClass::Poor,
        ] {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class));
        }
    }

    #[test]
    fn test_stats_quality() {
        let stats = LinkStats {
            round_trip_time_ms: 120.0,
            packets_lost: 3,
            ..Default::default()
        };
        assert_eq!(stats.quality(), QualityClass::Good);
    }
}
