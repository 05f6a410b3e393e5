//! Local media stream and tracks

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One captured track
///
/// `enabled` gates whether samples are sent; `stopped` is terminal.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Option<Arc<TrackLocalStaticSample>>,
}

impl MediaTrack {
    /// Create a track with no transport binding
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc: None,
        }
    }

    /// Create a track backed by a webrtc sample track
    pub fn with_rtc(kind: TrackKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        let mut track = Self::new(rtc.id().to_string(), kind);
        track.rtc = Some(rtc);
        track
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the track; returns false if it was already stopped
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    /// Transport binding, when the track was created by a sample device
    pub fn rtc_track(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.rtc.as_ref()
    }

    /// Feed one encoded sample to every link publishing this track
    ///
    /// Samples written to a disabled or stopped track are dropped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if self.is_stopped() || !self.is_enabled() {
            trace!("Dropping sample for inactive {} track {}", self.kind, self.id);
            return Ok(());
        }

        let rtc = self.rtc.as_ref().ok_or_else(|| {
            Error::MediaTrackError(format!("Track {} has no transport binding", self.id))
        })?;

        rtc.write_sample(sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write RTP sample: {}", e)))
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .field("rtc", &self.rtc.is_some())
            .finish()
    }
}

/// The local capture handle shared by every link that publishes it
#[derive(Debug)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl LocalMediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// Tracks of one kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Stop every track, returning how many were still live
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }
}
