//! Per-participant connection record

use crate::peer::PeerLink;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where the offer/answer exchange with one participant stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    NoConnection,
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::NoConnection => "no-connection",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The link to one remote participant and its negotiation bookkeeping
pub struct ConnectionRecord {
    participant_id: String,
    link: Arc<dyn PeerLink>,
    offer_sent: AtomicBool,
    session_id: Mutex<String>,
    state: Mutex<NegotiationState>,
    /// Held for the whole of each negotiation step on this participant
    negotiation: tokio::sync::Mutex<()>,
    events_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionRecord {
    pub fn new(participant_id: impl Into<String>, link: Arc<dyn PeerLink>) -> Self {
        Self {
            participant_id: participant_id.into(),
            link,
            offer_sent: AtomicBool::new(false),
            session_id: Mutex::new(String::new()),
            state: Mutex::new(NegotiationState::NoConnection),
            negotiation: tokio::sync::Mutex::new(()),
            events_task: Mutex::new(None),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn link(&self) -> &Arc<dyn PeerLink> {
        &self.link
    }

    pub fn offer_sent(&self) -> bool {
        self.offer_sent.load(Ordering::SeqCst)
    }

    pub fn mark_offer_sent(&self) {
        self.offer_sent.store(true, Ordering::SeqCst);
    }

    pub fn session_id(&self) -> String {
        self.session_id.lock().clone()
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.lock() = session_id.into();
    }

    /// Whether a message tagged `session_id` belongs to a superseded attempt
    ///
    /// Untagged messages are never stale.
    pub fn is_stale(&self, session_id: Option<&str>) -> bool {
        match session_id {
            Some(id) => {
                let current = self.session_id.lock();
                !current.is_empty() && *current != id
            }
            None => false,
        }
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    pub fn set_state(&self, new_state: NegotiationState) {
        let mut state = self.state.lock();
        if *state != new_state {
            debug!(
                "Peer {} negotiation: {} -> {}",
                self.participant_id, *state, new_state
            );
            *state = new_state;
        }
    }

    /// Serialize negotiation steps on this participant
    pub async fn lock_negotiation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.negotiation.lock().await
    }

    pub(crate) fn attach_events_task(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.events_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop link event handling and close the link
    pub async fn teardown(&self) {
        if let Some(task) = self.events_task.lock().take() {
            task.abort();
        }
        self.set_state(NegotiationState::Closed);

        if let Err(e) = self.link.close().await {
            warn!("Error closing link to {}: {}", self.participant_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;

    #[test]
    fn test_stale_session_detection() {
        let record = ConnectionRecord::new("p1", Arc::new(MockLink::default()));
        assert!(!record.is_stale(Some("s1")));
        assert!(!record.is_stale(None));

        record.set_session_id("s1");
        assert!(!record.is_stale(Some("s1")));
        assert!(record.is_stale(Some("s0")));
        assert!(!record.is_stale(None));
    }

    #[tokio::test]
    async fn test_teardown_closes_link() {
        let link = Arc::new(MockLink::default());
        let record = ConnectionRecord::new("p1", link.clone());
        record.set_state(NegotiationState::Connected);

        record.teardown().await;
        assert_eq!(record.state(), NegotiationState::Closed);
        assert!(link.is_closed());
    }
}
