//! Event hub for the Approval UI's `/events` stream.
//!
//! One broadcast channel shared by the domain and command queues. Each
//! subscriber gets its own bounded lane; a subscriber that falls behind
//! loses its oldest unread events (tokio's broadcast semantics) rather
//! than blocking publishers or growing without bound — the Approval UI
//! treats a lag as a cue to re-fetch the pending-lists snapshot instead
//! of replaying history.

use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// One state change in a queue, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardianEvent {
    /// A domain request was added (new or coalesced into an existing one).
    DomainAdded(Uuid),
    /// A domain request left the queue (resolved, timed out, or the
    /// daemon is shutting down).
    DomainRemoved(Uuid),
    /// A command request was added.
    CommandAdded(Uuid),
    /// A command request left the queue.
    CommandRemoved(Uuid),
}

/// Shared broadcast point for queue state changes.
pub struct EventHub {
    tx: broadcast::Sender<GuardianEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Build a hub with room for [`CHANNEL_CAPACITY`] buffered events per
    /// subscriber.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the event stream (one lane per SSE client).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GuardianEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A no-op if nobody is currently subscribed.
    pub fn publish(&self, event: GuardianEvent) {
        let _ = self.tx.send(event);
    }
}
