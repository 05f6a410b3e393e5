//! Capture devices

use super::stream::{LocalMediaStream, MediaTrack, TrackKind};
use super::MediaConstraints;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Why capture could not start
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The user refused access
    #[error("permission denied")]
    PermissionDenied,

    /// Device missing, busy or otherwise unusable
    #[error("{0}")]
    Other(String),
}

/// Host capability that turns constraints into a live local stream
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<LocalMediaStream, CaptureError>;
}

/// Capture device whose tracks are fed with pre-encoded samples
///
/// Produces one Opus audio track and one VP8 video track. The application
/// pushes encoded frames through [`MediaTrack::write_sample`] and every link
/// the stream is attached to transmits them.
#[derive(Debug, Clone, Default)]
pub struct SampleCaptureDevice;

impl SampleCaptureDevice {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for SampleCaptureDevice {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<LocalMediaStream, CaptureError> {
        let stream_id = format!("stream-{}", uuid::Uuid::new_v4());

        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            format!("audio-{}", uuid::Uuid::new_v4()),
            stream_id.clone(),
        ));

        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("video-{}", uuid::Uuid::new_v4()),
            stream_id.clone(),
        ));

        debug!(
            "Created sample capture stream {} ({}x{}, facing {:?})",
            stream_id,
            constraints.video.ideal_width,
            constraints.video.ideal_height,
            constraints.video.facing_mode
        );

        Ok(LocalMediaStream::new(
            stream_id,
            vec![
                Arc::new(MediaTrack::with_rtc(TrackKind::Audio, audio)),
                Arc::new(MediaTrack::with_rtc(TrackKind::Video, video)),
            ],
        ))
    }
}
