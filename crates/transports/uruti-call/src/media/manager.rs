//! Owner of the single local media handle

use super::devices::{CaptureError, MediaDevices};
use super::stream::{LocalMediaStream, TrackKind};
use super::MediaConstraints;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Acquires, toggles and releases local capture
///
/// Every link shares the same [`LocalMediaStream`]; there is exactly one
/// release path, so tracks are never stopped twice.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use uruti_call::{LocalMediaManager, MediaConstraints, SampleCaptureDevice};
///
/// # tokio_test::block_on(async {
/// let manager = LocalMediaManager::new(
///     Arc::new(SampleCaptureDevice::new()),
///     MediaConstraints::default(),
/// );
/// let stream = manager.initialize_local_stream().await.unwrap();
/// assert_eq!(stream.tracks().len(), 2);
///
/// assert_eq!(manager.toggle_video(), Some(false));
/// assert!(manager.release());
/// assert!(stream.is_stopped());
/// # });
/// ```
pub struct LocalMediaManager {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    stream: RwLock<Option<Arc<LocalMediaStream>>>,
    video_on: AtomicBool,
    audio_on: AtomicBool,
}

impl LocalMediaManager {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            stream: RwLock::new(None),
            video_on: AtomicBool::new(true),
            audio_on: AtomicBool::new(true),
        }
    }

    /// Acquire local capture, or return the handle already held
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] when the user refuses access, otherwise
    /// [`Error::MediaInit`] with the device's reason.
    pub async fn initialize_local_stream(&self) -> Result<Arc<LocalMediaStream>> {
        if let Some(stream) = self.current() {
            return Ok(stream);
        }

        let stream = match self.devices.get_user_media(&self.constraints).await {
            Ok(stream) => Arc::new(stream),
            Err(CaptureError::PermissionDenied) => {
                warn!("Camera/microphone access denied");
                return Err(Error::PermissionDenied);
            }
            Err(CaptureError::Other(reason)) => {
                warn!("Failed to initialize media: {}", reason);
                return Err(Error::MediaInit(reason));
            }
        };

        let mut slot = self.stream.write();
        if let Some(existing) = slot.as_ref() {
            // Lost a race with a concurrent initialization
            stream.stop_all();
            return Ok(Arc::clone(existing));
        }

        for track in stream.tracks() {
            let on = match track.kind() {
                TrackKind::Audio => self.is_audio_on(),
                TrackKind::Video => self.is_video_on(),
            };
            track.set_enabled(on);
        }

        info!(
            "Local media initialized: stream {} with {} tracks",
            stream.id(),
            stream.tracks().len()
        );
        *slot = Some(Arc::clone(&stream));
        Ok(stream)
    }

    /// The held handle, if any
    pub fn current(&self) -> Option<Arc<LocalMediaStream>> {
        self.stream.read().clone()
    }

    /// Flip video on every local video track; `None` when no stream is held
    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video, &self.video_on)
    }

    /// Flip audio on every local audio track; `None` when no stream is held
    pub fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio, &self.audio_on)
    }

    fn toggle(&self, kind: TrackKind, flag: &AtomicBool) -> Option<bool> {
        let stream = self.current()?;
        let enabled = !flag.load(Ordering::SeqCst);
        flag.store(enabled, Ordering::SeqCst);
        for track in stream.tracks_of(kind) {
            track.set_enabled(enabled);
        }
        info!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
        Some(enabled)
    }

    pub fn is_video_on(&self) -> bool {
        self.video_on.load(Ordering::SeqCst)
    }

    pub fn is_audio_on(&self) -> bool {
        self.audio_on.load(Ordering::SeqCst)
    }

    /// Stop every track and drop the handle; false if nothing was held
    pub fn release(&self) -> bool {
        let Some(stream) = self.stream.write().take() else {
            return false;
        };
        let stopped = stream.stop_all();
        info!("Released local media: stopped {} tracks", stopped);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevices;
    use tokio_test::{assert_err, assert_ok};

    fn manager(devices: FakeDevices) -> LocalMediaManager {
        LocalMediaManager::new(Arc::new(devices), MediaConstraints::default())
    }

    #[tokio::test]
    async fn test_initialize_returns_shared_handle() {
        let manager = manager(FakeDevices::granting());
        let first = assert_ok!(manager.initialize_local_stream().await);
        let second = assert_ok!(manager.initialize_local_stream().await);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_permission_denied_is_distinct() {
        let err = assert_err!(manager(FakeDevices::denying()).initialize_local_stream().await);
        assert!(err.is_permission_error());
        assert_eq!(err.to_string(), "Camera/microphone access denied");

        let err = assert_err!(
            manager(FakeDevices::failing("no camera"))
                .initialize_local_stream()
                .await
        );
        assert!(!err.is_permission_error());
        assert_eq!(err.to_string(), "Failed to initialize media: no camera");
    }

    #[tokio::test]
    async fn test_toggle_without_stream_is_noop() {
        let manager = manager(FakeDevices::granting());
        assert_eq!(manager.toggle_video(), None);
        assert_eq!(manager.toggle_audio(), None);
        assert!(manager.is_video_on());
        assert!(manager.is_audio_on());
    }

    #[tokio::test]
    async fn test_toggle_flips_tracks_of_kind() {
        let manager = manager(FakeDevices::granting());
        let stream = manager.initialize_local_stream().await.unwrap();

        assert_eq!(manager.toggle_video(), Some(false));
        assert!(stream.tracks_of(TrackKind::Video).all(|t| !t.is_enabled()));
        assert!(stream.tracks_of(TrackKind::Audio).all(|t| t.is_enabled()));

        assert_eq!(manager.toggle_video(), Some(true));
        assert!(stream.tracks_of(TrackKind::Video).all(|t| t.is_enabled()));
    }

    #[tokio::test]
    async fn test_release_stops_once() {
        let manager = manager(FakeDevices::granting());
        let stream = manager.initialize_local_stream().await.unwrap();

        assert!(manager.release());
        assert!(stream.is_stopped());
        assert!(manager.current().is_none());
        assert!(!manager.release());
    }
}
