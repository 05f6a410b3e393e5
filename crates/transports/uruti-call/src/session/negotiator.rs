//! Session negotiation
//!
//! Drives one offer/answer exchange per remote participant. Records live in a
//! map owned by the negotiator; creation happens under the map's write lock so
//! there is never more than one record per participant. Each step on a
//! participant holds that record's negotiation lock, and every answer or
//! candidate is checked against the session id recorded for the participant.
//!
//! Teardown never waits on the negotiation lock. A step that resumes after its
//! record was torn down or replaced publishes nothing; outcomes are published
//! under the map's read lock so a concurrent hangup cannot interleave.

use super::participants::{default_display_name, CallEvent, CallSnapshot, CallState};
use super::record::{ConnectionRecord, NegotiationState};
use crate::config::IceServer;
use crate::media::{LocalMediaManager, LocalMediaStream, TrackKind};
use crate::peer::{LinkEvent, LinkState, RtcBackend, SessionDescription};
use crate::signaling::{IceCandidate, MessageType, SignalMessage, SignalSender};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Callback for errors surfaced by call operations
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

type RecordMap = HashMap<String, Arc<ConnectionRecord>>;

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn closed_during_negotiation() -> Error {
    Error::PeerConnectionError("Connection closed during negotiation".to_string())
}

/// Coordinates offer/answer exchanges with every remote participant
pub struct SessionNegotiator {
    backend: Arc<dyn RtcBackend>,
    signaling: Arc<dyn SignalSender>,
    media: LocalMediaManager,
    ice_servers: Vec<IceServer>,
    records: RwLock<RecordMap>,
    state: Arc<CallState>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl SessionNegotiator {
    pub fn new(
        backend: Arc<dyn RtcBackend>,
        signaling: Arc<dyn SignalSender>,
        media: LocalMediaManager,
        ice_servers: Vec<IceServer>,
    ) -> Self {
        Self {
            backend,
            signaling,
            media,
            ice_servers,
            records: RwLock::new(HashMap::new()),
            state: Arc::new(CallState::new()),
            on_error: Mutex::new(None),
        }
    }

    /// Set callback for errors surfaced by call operations
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.on_error.lock() = Some(Arc::new(callback));
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.state.events()
    }

    /// Negotiation state of the record for `peer_id`
    pub async fn record_state(&self, peer_id: &str) -> Option<NegotiationState> {
        self.records.read().await.get(peer_id).map(|r| r.state())
    }

    /// Session id recorded for `peer_id`
    pub async fn session_id(&self, peer_id: &str) -> Option<String> {
        self.records.read().await.get(peer_id).map(|r| r.session_id())
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    fn report(&self, message: String, err: &Error) {
        warn!("{}", message);
        self.state.set_error(message);
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }

    /// Acquire local media and publish it in the snapshot
    pub async fn initialize_local_stream(&self) -> Result<Arc<LocalMediaStream>> {
        self.state.clear_error();
        match self.media.initialize_local_stream().await {
            Ok(stream) => {
                self.state.set_local_stream(Some(Arc::clone(&stream)));
                Ok(stream)
            }
            Err(e) => {
                self.report(e.to_string(), &e);
                Err(e)
            }
        }
    }

    /// Flip local video; `None` when no local stream is held
    pub fn toggle_video(&self) -> Option<bool> {
        let on = self.media.toggle_video()?;
        self.state.set_video_on(on);
        Some(on)
    }

    /// Flip local audio and every link's outbound audio
    pub async fn toggle_audio(&self) -> Option<bool> {
        let on = self.media.toggle_audio()?;
        self.state.set_audio_on(on);

        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        for record in records {
            if let Err(e) = record.link().set_outbound_enabled(TrackKind::Audio, on).await {
                warn!(
                    "Failed to update outbound audio for {}: {}",
                    record.participant_id(),
                    e
                );
            }
        }
        Some(on)
    }

    /// Place a call to `peer_id`
    ///
    /// # Errors
    ///
    /// Fails without side effects when local media has not been acquired or
    /// signaling is down. Negotiation failures on a fresh record tear that
    /// record down again.
    #[instrument(skip(self), fields(peer_id = %peer_id))]
    pub async fn start_call(&self, peer_id: &str, display_name: &str) -> Result<()> {
        let result = self.try_start_call(peer_id, display_name).await;
        if let Err(e) = &result {
            self.report(format!("Failed to start call: {}", e), e);
        }
        result
    }

    async fn try_start_call(&self, peer_id: &str, display_name: &str) -> Result<()> {
        let stream = self
            .media
            .current()
            .ok_or(Error::LocalStreamNotInitialized)?;
        if !self.signaling.is_connected() {
            return Err(Error::SignalingNotConnected);
        }

        let (record, created) = self.get_or_create_record(peer_id).await?;
        let _guard = record.lock_negotiation().await;

        drop(self.live_records(peer_id, &record).await?);
        if record.offer_sent() {
            info!("Call to {} already in progress", peer_id);
            return Ok(());
        }

        let outcome = async {
            record.link().add_local_stream(&stream).await?;

            let session_id = new_session_id();
            record.set_session_id(session_id.clone());
            record.set_state(NegotiationState::Negotiating);

            let sdp = record.link().create_offer().await?;
            let live = self.live_records(peer_id, &record).await?;
            self.signaling.send_offer(peer_id, &sdp, &session_id)?;
            record.mark_offer_sent();
            Ok::<_, Error>(live)
        }
        .await;

        let live = match outcome {
            Ok(live) => live,
            Err(e) => {
                if created {
                    self.discard_record(peer_id, &record).await;
                }
                return Err(e);
            }
        };

        self.state.merge(peer_id, display_name);
        self.state.set_call_active(true);
        drop(live);
        info!("Offer sent to {}", peer_id);
        Ok(())
    }

    /// Answer an offer from `from`
    ///
    /// Reuses an existing record (renegotiation) and adopts the offer's
    /// session id. A failed remote description leaves the record in
    /// `Negotiating`.
    #[instrument(skip(self, sdp), fields(peer_id = %from))]
    pub async fn handle_offer(
        &self,
        sdp: &str,
        from: &str,
        display_name: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<()> {
        let result = self
            .try_handle_offer(sdp, from, display_name, session_id)
            .await;
        if let Err(e) = &result {
            self.report(format!("Failed to handle offer: {}", e), e);
        }
        result
    }

    async fn try_handle_offer(
        &self,
        sdp: &str,
        from: &str,
        display_name: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<()> {
        let stream = self
            .media
            .current()
            .ok_or(Error::LocalStreamNotInitialized)?;

        let (record, created) = self.get_or_create_record(from).await?;
        let _guard = record.lock_negotiation().await;

        drop(self.live_records(from, &record).await?);
        if created {
            record.link().add_local_stream(&stream).await?;
        }

        let live = self.live_records(from, &record).await?;
        match session_id {
            Some(id) => record.set_session_id(id),
            None if record.session_id().is_empty() => record.set_session_id(new_session_id()),
            None => {}
        }
        record.set_state(NegotiationState::Negotiating);

        let name = display_name
            .map(str::to_owned)
            .unwrap_or_else(|| default_display_name(from));
        self.state.merge(from, &name);
        drop(live);

        record
            .link()
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        let answer = record.link().create_answer().await?;

        let live = self.live_records(from, &record).await?;
        self.signaling
            .send_answer(from, &answer, &record.session_id())?;

        record.set_state(NegotiationState::Connected);
        self.state.set_call_active(true);
        drop(live);
        info!("Answer sent to {}", from);
        Ok(())
    }

    /// Apply an answer from `from`; ignored when no call to `from` exists
    #[instrument(skip(self, sdp), fields(peer_id = %from))]
    pub async fn handle_answer(
        &self,
        sdp: &str,
        from: &str,
        session_id: Option<&str>,
    ) -> Result<()> {
        let Some(record) = self.record(from).await else {
            debug!("No connection to {}, ignoring answer", from);
            return Ok(());
        };
        let _guard = record.lock_negotiation().await;

        if record.state() == NegotiationState::Closed {
            debug!("Connection to {} closed, ignoring answer", from);
            return Ok(());
        }
        if record.is_stale(session_id) {
            debug!("Discarding answer from {} for superseded session", from);
            return Ok(());
        }

        match record
            .link()
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            Ok(()) if record.state() == NegotiationState::Closed => {
                debug!("Connection to {} closed while applying answer", from);
                Ok(())
            }
            Ok(()) => {
                record.set_state(NegotiationState::Connected);
                info!("Call with {} connected", from);
                Ok(())
            }
            Err(e) => {
                self.report(format!("Failed to handle answer: {}", e), &e);
                Err(e)
            }
        }
    }

    /// Add a remote candidate; failures are logged and swallowed
    pub async fn handle_ice_candidate(
        &self,
        candidate: IceCandidate,
        from: &str,
        session_id: Option<&str>,
    ) -> Result<()> {
        let Some(record) = self.record(from).await else {
            debug!("No connection to {}, ignoring ICE candidate", from);
            return Ok(());
        };
        let _guard = record.lock_negotiation().await;

        if record.state() == NegotiationState::Closed {
            return Ok(());
        }
        if record.is_stale(session_id) {
            debug!("Discarding ICE candidate from {} for superseded session", from);
            return Ok(());
        }

        if let Err(e) = record.link().add_ice_candidate(candidate).await {
            warn!("Error adding ICE candidate from {}: {}", from, e);
        }
        Ok(())
    }

    /// Hang up on one participant; unknown ids are ignored
    #[instrument(skip(self), fields(peer_id = %peer_id))]
    pub async fn end_call_with_peer(&self, peer_id: &str) {
        let (record, remaining) = {
            let mut records = self.records.write().await;
            let record = records.remove(peer_id);
            (record, records.len())
        };

        if let Some(record) = record {
            record.teardown().await;
            info!("Ended call with {}", peer_id);
        }

        self.state.remove(peer_id);
        if remaining == 0 {
            self.state.set_call_active(false);
        }
    }

    /// Hang up on everyone and release local media
    pub async fn end_all_calls(&self) {
        let records: Vec<_> = self
            .records
            .write()
            .await
            .drain()
            .map(|(_, record)| record)
            .collect();

        let count = records.len();
        for record in records {
            record.teardown().await;
        }

        self.media.release();
        self.state.set_local_stream(None);
        self.state.clear();

        if count > 0 {
            info!("Ended {} calls", count);
        }
    }

    /// Fetch statistics for every live link and update quality classes
    pub async fn poll_quality(&self) {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();

        for record in records {
            if record.state() == NegotiationState::Closed {
                continue;
            }
            let peer_id = record.participant_id();
            match record.link().stats().await {
                Ok(stats) => {
                    let quality = stats.quality();
                    debug!(
                        "Peer {} rtt={:.0}ms lost={} quality={}",
                        peer_id, stats.round_trip_time_ms, stats.packets_lost, quality
                    );
                    self.state.set_quality(peer_id, quality);
                }
                Err(e) => warn!("Failed to get stats for {}: {}", peer_id, e),
            }
        }
    }

    /// Route an inbound signaling frame to the matching negotiation step
    pub async fn handle_signal(&self, message: &SignalMessage) {
        let kind = message.message_type();

        if kind == MessageType::Error {
            warn!(
                "Signaling server error: {}",
                message.error_message().unwrap_or("unknown")
            );
            return;
        }

        if !matches!(
            kind,
            MessageType::Offer | MessageType::Answer | MessageType::IceCandidate
        ) {
            return;
        }

        let Some(from) = message.from.as_deref() else {
            warn!("Received {} message without sender", message.kind);
            return;
        };
        let session_id = message.session_id();

        let result = match kind {
            MessageType::Offer => match message.sdp() {
                Some(sdp) => {
                    self.handle_offer(sdp, from, message.sender_name(), session_id)
                        .await
                }
                None => Ok(()),
            },
            MessageType::Answer => match message.sdp() {
                Some(sdp) => self.handle_answer(sdp, from, session_id).await,
                None => Ok(()),
            },
            MessageType::IceCandidate => match message.candidate() {
                Some(candidate) => self.handle_ice_candidate(candidate, from, session_id).await,
                None => Ok(()),
            },
            _ => Ok(()),
        };

        if let Err(e) = result {
            debug!("Error handling {} message: {}", message.kind, e);
        }
    }

    async fn record(&self, peer_id: &str) -> Option<Arc<ConnectionRecord>> {
        self.records.read().await.get(peer_id).cloned()
    }

    /// Read lock on the record map, granted only while `record` is still the
    /// open record registered for `peer_id`
    async fn live_records(
        &self,
        peer_id: &str,
        record: &Arc<ConnectionRecord>,
    ) -> Result<RwLockReadGuard<'_, RecordMap>> {
        let records = self.records.read().await;
        let registered = records
            .get(peer_id)
            .is_some_and(|current| Arc::ptr_eq(current, record));
        if !registered || record.state() == NegotiationState::Closed {
            debug!("Connection to {} closed during negotiation", peer_id);
            return Err(closed_during_negotiation());
        }
        Ok(records)
    }

    /// Look up the record for `peer_id`, creating it if absent
    async fn get_or_create_record(&self, peer_id: &str) -> Result<(Arc<ConnectionRecord>, bool)> {
        if let Some(record) = self.record(peer_id).await {
            return Ok((record, false));
        }

        let mut records = self.records.write().await;
        if let Some(record) = records.get(peer_id) {
            return Ok((Arc::clone(record), false));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let link = self
            .backend
            .create_link(peer_id, &self.ice_servers, tx)
            .await?;
        let record = Arc::new(ConnectionRecord::new(peer_id, link));
        record.attach_events_task(self.spawn_link_events(&record, rx));
        records.insert(peer_id.to_string(), Arc::clone(&record));

        debug!("Created connection record for {}", peer_id);
        Ok((record, true))
    }

    /// Remove `record` if it is still the one registered, then tear it down
    async fn discard_record(&self, peer_id: &str, record: &Arc<ConnectionRecord>) {
        {
            let mut records = self.records.write().await;
            if records
                .get(peer_id)
                .is_some_and(|current| Arc::ptr_eq(current, record))
            {
                records.remove(peer_id);
            }
        }
        record.teardown().await;
    }

    fn spawn_link_events(
        &self,
        record: &Arc<ConnectionRecord>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> JoinHandle<()> {
        let record = Arc::downgrade(record);
        let signaling = Arc::clone(&self.signaling);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(record) = record.upgrade() else {
                    break;
                };
                let peer_id = record.participant_id();

                match event {
                    LinkEvent::LocalCandidate(candidate) => {
                        if let Err(e) =
                            signaling.send_ice_candidate(peer_id, &candidate, &record.session_id())
                        {
                            warn!("Failed to relay ICE candidate to {}: {}", peer_id, e);
                        }
                    }
                    LinkEvent::RemoteTrack(track) => {
                        debug!("Remote {} track {} from {}", track.kind, track.id, peer_id);
                        state.attach_remote_track(peer_id, track);
                    }
                    LinkEvent::StateChanged(LinkState::Failed) => {
                        warn!("Link to {} failed", peer_id);
                    }
                    LinkEvent::StateChanged(link_state) => {
                        info!("Link to {} is {}", peer_id, link_state);
                    }
                }
            }
        })
    }
}
