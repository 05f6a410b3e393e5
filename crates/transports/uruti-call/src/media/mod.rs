//! Local capture: constraints, streams, devices and the stream owner

pub mod devices;
pub mod manager;
pub mod stream;

pub use devices::{CaptureError, MediaDevices, SampleCaptureDevice};
pub use manager::LocalMediaManager;
pub use stream::{LocalMediaStream, MediaTrack, TrackKind};

use serde::{Deserialize, Serialize};

/// Which camera to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    User,
    /// Rear camera
    Environment,
}

/// Requested video capture properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConstraints {
    /// Ideal frame width in pixels
    pub ideal_width: u32,
    /// Ideal frame height in pixels
    pub ideal_height: u32,
    /// Preferred camera
    pub facing_mode: FacingMode,
}

/// Requested audio capture processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// Constraints passed to the capture device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub video: VideoConstraints,
    pub audio: AudioConstraints,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing_mode: FacingMode::User,
        }
    }
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = MediaConstraints::default();
        assert_eq!(constraints.video.ideal_width, 1280);
        assert_eq!(constraints.video.ideal_height, 720);
        assert_eq!(constraints.video.facing_mode, FacingMode::User);
        assert!(constraints.audio.echo_cancellation);
        assert!(constraints.audio.noise_suppression);
        assert!(constraints.audio.auto_gain_control);
    }

    #[test]
    fn test_partial_toml() {
        let constraints: MediaConstraints =
            toml::from_str("[video]\nfacing_mode = \"environment\"\n").unwrap();
        assert_eq!(constraints.video.facing_mode, FacingMode::Environment);
        assert_eq!(constraints.video.ideal_width, 1280);
    }
}
