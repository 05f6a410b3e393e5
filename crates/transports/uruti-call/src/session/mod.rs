//! Call sessions: negotiation, connection records and participant state

pub mod negotiator;
pub mod participants;
pub mod record;

pub use negotiator::{ErrorCallback, SessionNegotiator};
pub use participants::{default_display_name, CallEvent, CallSnapshot, CallState, Participant};
pub use record::{ConnectionRecord, NegotiationState};
