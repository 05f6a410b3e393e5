//! Scripted collaborators for exercising negotiation without a network
//!
//! Available in unit tests and behind the `testing` feature.

use crate::config::IceServer;
use crate::media::{
    CaptureError, LocalMediaStream, MediaConstraints, MediaDevices, MediaTrack, TrackKind,
};
use crate::peer::{LinkEvent, PeerLink, RemoteTrack, RtcBackend, SessionDescription};
use crate::quality::LinkStats;
use crate::signaling::{IceCandidate, OutboundMessage, SignalSender};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Backend handing out [`MockLink`]s
#[derive(Default)]
pub struct MockBackend {
    links: Mutex<HashMap<String, Vec<Arc<MockLink>>>>,
    created: AtomicUsize,
    fail_create: AtomicBool,
    fail_offer: AtomicBool,
    fail_remote_description: AtomicBool,
    gate: Mutex<Option<Arc<LinkGate>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_link` fail
    pub fn fail_link_creation(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make links created from now on fail to create offers
    pub fn fail_offers(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    /// Make links created from now on reject remote descriptions
    pub fn fail_remote_descriptions(&self, fail: bool) {
        self.fail_remote_description.store(fail, Ordering::SeqCst);
    }

    /// Hold offer and answer creation on links created from now on until the
    /// returned gate is released
    pub fn gate_links(&self) -> Arc<LinkGate> {
        let gate = Arc::new(LinkGate::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Most recent link created for `peer_id`
    pub fn link(&self, peer_id: &str) -> Option<Arc<MockLink>> {
        self.links
            .lock()
            .get(peer_id)
            .and_then(|links| links.last().cloned())
    }

    /// Number of links ever created for `peer_id`
    pub fn links_for(&self, peer_id: &str) -> usize {
        self.links.lock().get(peer_id).map_or(0, Vec::len)
    }

    pub fn links_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RtcBackend for MockBackend {
    async fn create_link(
        &self,
        peer_id: &str,
        _ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError(
                "Failed to create peer connection: scripted failure".to_string(),
            ));
        }

        let link = Arc::new(MockLink::new(peer_id, events));
        link.fail_offer
            .store(self.fail_offer.load(Ordering::SeqCst), Ordering::SeqCst);
        link.fail_remote_description
            .store(self.fail_remote_description.load(Ordering::SeqCst), Ordering::SeqCst);
        *link.gate.lock() = self.gate.lock().clone();

        self.created.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .entry(peer_id.to_string())
            .or_default()
            .push(Arc::clone(&link));

        Ok(link as Arc<dyn PeerLink>)
    }
}

/// Pauses SDP creation on gated links
pub struct LinkGate {
    entered: AtomicUsize,
    open: watch::Sender<bool>,
}

impl LinkGate {
    fn new() -> Self {
        Self {
            entered: AtomicUsize::new(0),
            open: watch::channel(false).0,
        }
    }

    /// Number of SDP steps that reached the gate
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Let every held and future step through
    pub fn release(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut open = self.open.subscribe();
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _ = open.wait_for(|open| *open).await;
    }
}

/// Link that records what was asked of it
#[derive(Default)]
pub struct MockLink {
    peer_id: String,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    local_streams: Mutex<Vec<String>>,
    offers: AtomicUsize,
    answers: AtomicUsize,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    outbound: Mutex<HashMap<TrackKind, bool>>,
    stats: Mutex<LinkStats>,
    fail_stats: AtomicBool,
    fail_offer: AtomicBool,
    fail_remote_description: AtomicBool,
    fail_candidates: AtomicBool,
    closed: AtomicBool,
    gate: Mutex<Option<Arc<LinkGate>>>,
}

impl MockLink {
    pub fn new(peer_id: &str, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            events: Mutex::new(Some(events)),
            ..Default::default()
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Deliver a link event as if the transport produced it
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.events
            .lock()
            .as_ref()
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }

    pub fn emit_local_candidate(&self, candidate: &str) -> bool {
        self.emit(LinkEvent::LocalCandidate(IceCandidate {
            candidate: candidate.to_string(),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".to_string()),
        }))
    }

    pub fn emit_remote_track(&self, id: &str, kind: TrackKind, stream_id: &str) -> bool {
        self.emit(LinkEvent::RemoteTrack(RemoteTrack {
            id: id.to_string(),
            kind,
            stream_id: stream_id.to_string(),
            handle: None,
        }))
    }

    pub fn set_stats(&self, stats: LinkStats) {
        *self.stats.lock() = stats;
    }

    pub fn fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    pub fn fail_offer(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remote_description(&self, fail: bool) {
        self.fail_remote_description.store(fail, Ordering::SeqCst);
    }

    pub fn fail_candidates(&self, fail: bool) {
        self.fail_candidates.store(fail, Ordering::SeqCst);
    }

    /// Ids of local streams attached to this link
    pub fn local_streams(&self) -> Vec<String> {
        self.local_streams.lock().clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn answers_created(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote_descriptions.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    /// Last outbound state set for `kind`, if any
    pub fn outbound_enabled(&self, kind: TrackKind) -> Option<bool> {
        self.outbound.lock().get(&kind).copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn wait_at_gate(&self) {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn add_local_stream(&self, stream: &Arc<LocalMediaStream>) -> Result<()> {
        self.local_streams.lock().push(stream.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.wait_at_gate().await;
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(Error::SdpError("Failed to create offer: scripted failure".to_string()));
        }
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-offer-{}-{}", self.peer_id, n))
    }

    async fn create_answer(&self) -> Result<String> {
        self.wait_at_gate().await;
        let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-answer-{}-{}", self.peer_id, n))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(Error::SdpError(
                "Failed to set remote description: scripted failure".to_string(),
            ));
        }
        self.remote_descriptions.lock().push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.fail_candidates.load(Ordering::SeqCst) {
            return Err(Error::IceCandidateError(
                "Failed to add ICE candidate: scripted failure".to_string(),
            ));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn stats(&self) -> Result<LinkStats> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(Error::StatsError("scripted failure".to_string()));
        }
        Ok(*self.stats.lock())
    }

    async fn set_outbound_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()> {
        self.outbound.lock().insert(kind, enabled);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }
}

enum FakeOutcome {
    Grant,
    Deny,
    Fail(String),
}

/// Capture device with a scripted outcome
pub struct FakeDevices {
    outcome: FakeOutcome,
    requests: AtomicUsize,
}

impl FakeDevices {
    /// Grants one audio and one video track per request
    pub fn granting() -> Self {
        Self {
            outcome: FakeOutcome::Grant,
            requests: AtomicUsize::new(0),
        }
    }

    /// Refuses access as a user would
    pub fn denying() -> Self {
        Self {
            outcome: FakeOutcome::Deny,
            requests: AtomicUsize::new(0),
        }
    }

    /// Fails with `reason`
    pub fn failing(reason: &str) -> Self {
        Self {
            outcome: FakeOutcome::Fail(reason.to_string()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> std::result::Result<LocalMediaStream, CaptureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            FakeOutcome::Grant => {
                let id = uuid::Uuid::new_v4().to_string();
                Ok(LocalMediaStream::new(
                    format!("fake-{}", id),
                    vec![
                        Arc::new(MediaTrack::new(format!("audio-{}", id), TrackKind::Audio)),
                        Arc::new(MediaTrack::new(format!("video-{}", id), TrackKind::Video)),
                    ],
                ))
            }
            FakeOutcome::Deny => Err(CaptureError::PermissionDenied),
            FakeOutcome::Fail(reason) => Err(CaptureError::Other(reason.clone())),
        }
    }
}

/// Signal sender that keeps every frame instead of sending it
pub struct RecordingSignaler {
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSignaler {
    pub fn connected() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Offers sent to `peer_id` as `(session_id, sdp)`
    pub fn offers_to(&self, peer_id: &str) -> Vec<(String, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                OutboundMessage::Offer { to, session_id, sdp } if to == peer_id => {
                    Some((session_id.clone(), sdp.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Answers sent to `peer_id` as `(session_id, sdp)`
    pub fn answers_to(&self, peer_id: &str) -> Vec<(String, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                OutboundMessage::Answer { to, session_id, sdp } if to == peer_id => {
                    Some((session_id.clone(), sdp.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Candidates sent to `peer_id` as `(session_id, candidate)`
    pub fn candidates_to(&self, peer_id: &str) -> Vec<(String, IceCandidate)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                OutboundMessage::IceCandidate {
                    to,
                    session_id,
                    candidate,
                } if to == peer_id => Some((session_id.clone(), candidate.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, message: OutboundMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

impl SignalSender for RecordingSignaler {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_offer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()> {
        self.record(OutboundMessage::Offer {
            to: to.to_string(),
            session_id: session_id.to_string(),
            sdp: sdp.to_string(),
        })
    }

    fn send_answer(&self, to: &str, sdp: &str, session_id: &str) -> Result<()> {
        self.record(OutboundMessage::Answer {
            to: to.to_string(),
            session_id: session_id.to_string(),
            sdp: sdp.to_string(),
        })
    }

    fn send_ice_candidate(
        &self,
        to: &str,
        candidate: &IceCandidate,
        session_id: &str,
    ) -> Result<()> {
        self.record(OutboundMessage::IceCandidate {
            to: to.to_string(),
            session_id: session_id.to_string(),
            candidate: candidate.clone(),
        })
    }
}
