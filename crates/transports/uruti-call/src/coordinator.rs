//! Peer session coordinator
//!
//! Wires the signaling channel, the session negotiator and the quality
//! monitor together, and exposes the surface a call view drives.

use crate::config::CoordinatorConfig;
use crate::media::{LocalMediaManager, LocalMediaStream, MediaDevices};
use crate::peer::RtcBackend;
use crate::quality::QualityMonitor;
use crate::session::{CallEvent, CallSnapshot, SessionNegotiator};
use crate::signaling::{ChannelStatus, PeerDescriptor, SignalSender, SignalingChannel};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One local participant's view of a multi-party call
pub struct PeerSessionCoordinator {
    channel: Arc<SignalingChannel>,
    negotiator: Arc<SessionNegotiator>,
    monitor: QualityMonitor,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl PeerSessionCoordinator {
    /// Build and start a coordinator
    ///
    /// Connects to the relay unless `signaling.auto_connect` is off. A failed
    /// connection is reported through [`signaling_status`](Self::signaling_status)
    /// rather than as an error here.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn start(
        config: CoordinatorConfig,
        user_id: impl Into<String>,
        backend: Arc<dyn RtcBackend>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self> {
        config.validate()?;

        let (sink, mut inbound) = mpsc::unbounded_channel();
        let channel = Arc::new(SignalingChannel::new(&config.signaling, user_id, sink)?);

        let media = LocalMediaManager::new(devices, config.media.clone());
        let negotiator = Arc::new(SessionNegotiator::new(
            backend,
            Arc::clone(&channel) as Arc<dyn SignalSender>,
            media,
            config.ice.ice_servers(),
        ));

        // Frames are handled one at a time so per-peer ordering is preserved
        let weak = Arc::downgrade(&negotiator);
        let dispatch = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(negotiator) = weak.upgrade() else {
                    break;
                };
                negotiator.handle_signal(&message).await;
            }
            debug!("Signaling dispatch task terminated");
        });

        let monitor = QualityMonitor::spawn(
            Arc::downgrade(&negotiator),
            config.quality.poll_interval(),
        );

        info!("Peer session coordinator started as {}", channel.peer_id());

        let coordinator = Self {
            channel,
            negotiator,
            monitor,
            dispatch: Mutex::new(Some(dispatch)),
            shut_down: AtomicBool::new(false),
        };

        if config.signaling.auto_connect {
            if let Err(e) = coordinator.channel.connect().await {
                warn!("Initial signaling connection failed: {}", e);
            }
        }

        Ok(coordinator)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.negotiator.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.negotiator.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.negotiator.events()
    }

    /// Peers the relay currently advertises
    pub fn available_peers(&self) -> Vec<PeerDescriptor> {
        self.channel.peers()
    }

    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<PeerDescriptor>> {
        self.channel.subscribe_peers()
    }

    pub fn signaling_status(&self) -> ChannelStatus {
        self.channel.status()
    }

    pub fn subscribe_signaling(&self) -> watch::Receiver<ChannelStatus> {
        self.channel.subscribe_status()
    }

    pub fn local_peer_id(&self) -> &str {
        self.channel.peer_id()
    }

    pub fn negotiator(&self) -> &Arc<SessionNegotiator> {
        &self.negotiator
    }

    /// Set callback for errors surfaced by call operations
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.negotiator.on_error(callback);
    }

    pub async fn initialize_local_stream(&self) -> Result<Arc<LocalMediaStream>> {
        self.negotiator.initialize_local_stream().await
    }

    pub async fn start_call(&self, peer_id: &str, display_name: &str) -> Result<()> {
        self.negotiator.start_call(peer_id, display_name).await
    }

    pub fn toggle_video(&self) -> Option<bool> {
        self.negotiator.toggle_video()
    }

    pub async fn toggle_audio(&self) -> Option<bool> {
        self.negotiator.toggle_audio().await
    }

    pub async fn end_call_with_peer(&self, peer_id: &str) {
        self.negotiator.end_call_with_peer(peer_id).await
    }

    pub async fn end_all_calls(&self) {
        self.negotiator.end_all_calls().await
    }

    pub async fn connect_signaling(&self) -> Result<()> {
        self.channel.connect().await
    }

    pub fn disconnect_signaling(&self) {
        self.channel.disconnect()
    }

    pub fn request_peers(&self) -> Result<()> {
        self.channel.request_peers()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop polling, end every call and leave the relay
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down peer session coordinator");
        self.monitor.stop();
        self.negotiator.end_all_calls().await;
        self.channel.disconnect();
        if let Some(dispatch) = self.dispatch.lock().take() {
            dispatch.abort();
        }
    }
}

impl Drop for PeerSessionCoordinator {
    fn drop(&mut self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.monitor.stop();
        if let Some(dispatch) = self.dispatch.lock().take() {
            dispatch.abort();
        }
        self.channel.disconnect();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let negotiator = Arc::clone(&self.negotiator);
            handle.spawn(async move {
                negotiator.end_all_calls().await;
            });
        }
    }
}
