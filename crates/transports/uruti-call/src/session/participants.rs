//! Participant presentation state
//!
//! The UI renders from a [`CallSnapshot`] published through a watch channel,
//! and reacts to discrete changes through the [`CallEvent`] broadcast.

use crate::media::LocalMediaStream;
use crate::peer::{RemoteStream, RemoteTrack};
use crate::quality::QualityClass;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

/// A remote participant as shown in the call view
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    /// Remote media, once the first track arrives
    pub media_stream: Option<RemoteStream>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub quality: QualityClass,
}

/// Name shown for a participant that did not announce one
pub fn default_display_name(id: &str) -> String {
    format!("Peer {}", id.chars().take(6).collect::<String>())
}

/// Everything the call view renders
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub participants: Vec<Participant>,
    pub local_stream: Option<Arc<LocalMediaStream>>,
    pub is_call_active: bool,
    pub is_video_on: bool,
    pub is_audio_on: bool,
    pub error: Option<String>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            participants: Vec::new(),
            local_stream: None,
            is_call_active: false,
            is_video_on: true,
            is_audio_on: true,
            error: None,
        }
    }
}

impl CallSnapshot {
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }
}

/// Discrete changes to the call
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    ParticipantJoined { id: String, display_name: String },
    ParticipantLeft { id: String },
    QualityChanged { id: String, quality: QualityClass },
    Error(String),
}

/// Publisher of [`CallSnapshot`] and [`CallEvent`]
pub struct CallState {
    snapshot: watch::Sender<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
}

impl Default for CallState {
    fn default() -> Self {
        Self::new()
    }
}

impl CallState {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(CallSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { snapshot, events }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Insert a participant unless one with the same id exists
    pub fn merge(&self, id: &str, display_name: &str) -> bool {
        let inserted = self.snapshot.send_if_modified(|snapshot| {
            if snapshot.participant(id).is_some() {
                return false;
            }
            snapshot.participants.push(Participant {
                id: id.to_string(),
                display_name: display_name.to_string(),
                media_stream: None,
                audio_enabled: snapshot.is_audio_on,
                video_enabled: snapshot.is_video_on,
                quality: QualityClass::Good,
            });
            true
        });

        if inserted {
            debug!("Participant {} ({}) added", id, display_name);
            self.emit(CallEvent::ParticipantJoined {
                id: id.to_string(),
                display_name: display_name.to_string(),
            });
        }
        inserted
    }

    /// Attach a remote track to a participant's stream
    pub fn attach_remote_track(&self, id: &str, track: RemoteTrack) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            let Some(participant) = snapshot.participants.iter_mut().find(|p| p.id == id) else {
                return false;
            };
            match participant.media_stream.as_mut() {
                Some(stream) if stream.id == track.stream_id => stream.add_track(track),
                _ => {
                    participant.media_stream = Some(RemoteStream::new(track));
                    true
                }
            }
        })
    }

    /// Record a new quality class; emits an event only on change
    pub fn set_quality(&self, id: &str, quality: QualityClass) -> bool {
        let changed = self.snapshot.send_if_modified(|snapshot| {
            match snapshot.participants.iter_mut().find(|p| p.id == id) {
                Some(participant) if participant.quality != quality => {
                    participant.quality = quality;
                    true
                }
                _ => false,
            }
        });

        if changed {
            self.emit(CallEvent::QualityChanged {
                id: id.to_string(),
                quality,
            });
        }
        changed
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.snapshot.send_if_modified(|snapshot| {
            let before = snapshot.participants.len();
            snapshot.participants.retain(|p| p.id != id);
            snapshot.participants.len() != before
        });

        if removed {
            debug!("Participant {} removed", id);
            self.emit(CallEvent::ParticipantLeft { id: id.to_string() });
        }
        removed
    }

    /// Drop every participant and mark the call inactive
    pub fn clear(&self) {
        let removed: Vec<String> = {
            let mut removed = Vec::new();
            self.snapshot.send_if_modified(|snapshot| {
                removed = snapshot.participants.drain(..).map(|p| p.id).collect();
                let was_active = snapshot.is_call_active;
                snapshot.is_call_active = false;
                !removed.is_empty() || was_active
            });
            removed
        };

        for id in removed {
            self.emit(CallEvent::ParticipantLeft { id });
        }
    }

    pub fn set_call_active(&self, active: bool) {
        self.snapshot.send_if_modified(|snapshot| {
            let changed = snapshot.is_call_active != active;
            snapshot.is_call_active = active;
            changed
        });
    }

    pub fn set_local_stream(&self, stream: Option<Arc<LocalMediaStream>>) {
        self.snapshot.send_modify(|snapshot| snapshot.local_stream = stream);
    }

    /// Update the local video flag and mirror it on every participant
    pub fn set_video_on(&self, on: bool) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.is_video_on = on;
            for participant in &mut snapshot.participants {
                participant.video_enabled = on;
            }
        });
    }

    /// Update the local audio flag and mirror it on every participant
    pub fn set_audio_on(&self, on: bool) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.is_audio_on = on;
            for participant in &mut snapshot.participants {
                participant.audio_enabled = on;
            }
        });
    }

    /// Record a human-readable error and notify subscribers
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.snapshot
            .send_modify(|snapshot| snapshot.error = Some(message.clone()));
        self.emit(CallEvent::Error(message));
    }

    pub fn clear_error(&self) {
        self.snapshot.send_if_modified(|snapshot| snapshot.error.take().is_some());
    }
}
