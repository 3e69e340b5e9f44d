//! The pending-domain-approval queue.
//!
//! Requests coalesce by `token:domain`: a second container connection
//! asking about the same host while the first is still pending subscribes
//! to the same decision rather than opening a second prompt. Every
//! pending entry carries its own timeout task, cancelled on resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use guardian_core::ApprovalScope;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hub::{EventHub, GuardianEvent};

/// Default wait before a domain request is treated as timed out.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A host awaiting a human decision.
#[derive(Debug, Clone)]
pub struct DomainRequest {
    pub id: Uuid,
    pub token: String,
    pub cloister: String,
    pub project: String,
    pub domain: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

/// Resolution of a [`DomainRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainOutcome {
    /// Allow, at the given persistence scope. `pattern` is set when the
    /// human chose to approve the whole wildcard suffix rather than just
    /// the exact host.
    Approved {
        scope: ApprovalScope,
        pattern: Option<String>,
    },
    /// Deny, at the given persistence scope. `wildcard` mirrors `pattern`
    /// above for the deny side.
    Denied { scope: ApprovalScope, wildcard: bool },
    /// Nobody decided before `expires`.
    Timeout,
    /// The daemon is shutting down with this request still pending.
    ShuttingDown,
}

struct Entry {
    request: DomainRequest,
    key: String,
    tx: broadcast::Sender<DomainOutcome>,
    timeout_task: JoinHandle<()>,
}

/// Coalescing queue of pending domain approvals.
pub struct DomainQueue {
    entries: Mutex<HashMap<Uuid, Entry>>,
    by_key: Mutex<HashMap<String, Uuid>>,
    hub: Arc<EventHub>,
    default_timeout: Duration,
}

impl DomainQueue {
    /// Build a queue publishing to `hub`, with `default_timeout` applied
    /// to every new request.
    #[must_use]
    pub fn new(hub: Arc<EventHub>, default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            by_key: Mutex::new(HashMap::new()),
            hub,
            default_timeout,
        })
    }

    /// Add a request, or subscribe to an existing one coalesced on the
    /// same `token:domain` key. Returns the request id and a receiver
    /// that yields exactly one [`DomainOutcome`].
    pub fn add(
        self: &Arc<Self>,
        token: impl Into<String>,
        cloister: impl Into<String>,
        project: impl Into<String>,
        domain: impl Into<String>,
    ) -> (Uuid, broadcast::Receiver<DomainOutcome>) {
        let token = token.into();
        let domain = domain.into();
        let key = format!("{token}:{domain}");

        if let Some(id) = self.by_key.lock().expect("lock poisoned").get(&key).copied() {
            if let Some(entry) = self.entries.lock().expect("lock poisoned").get(&id) {
                return (id, entry.tx.subscribe());
            }
        }

        let id = Uuid::new_v4();
        let created = Utc::now();
        let expires = created
            + chrono::Duration::from_std(self.default_timeout).unwrap_or(chrono::Duration::seconds(60));
        let request = DomainRequest {
            id,
            token,
            cloister: cloister.into(),
            project: project.into(),
            domain,
            created,
            expires,
        };
        let (tx, rx) = broadcast::channel(4);

        let queue = Arc::clone(self);
        let wait = self.default_timeout;
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            queue.fire_timeout(id);
        });

        self.entries.lock().expect("lock poisoned").insert(
            id,
            Entry {
                request,
                key: key.clone(),
                tx,
                timeout_task,
            },
        );
        self.by_key.lock().expect("lock poisoned").insert(key, id);
        self.hub.publish(GuardianEvent::DomainAdded(id));
        (id, rx)
    }

    /// Resolve a pending request, broadcasting `outcome` to every
    /// subscriber and cancelling its timeout task. Returns `false` if
    /// `id` is not (or no longer) pending.
    pub fn resolve(&self, id: Uuid, outcome: DomainOutcome) -> bool {
        let removed = self.entries.lock().expect("lock poisoned").remove(&id);
        let Some(entry) = removed else {
            return false;
        };
        entry.timeout_task.abort();
        self.by_key.lock().expect("lock poisoned").remove(&entry.key);
        let _ = entry.tx.send(outcome);
        self.hub.publish(GuardianEvent::DomainRemoved(id));
        true
    }

    fn fire_timeout(&self, id: Uuid) {
        self.resolve(id, DomainOutcome::Timeout);
    }

    /// Snapshot of every currently pending request, for the Approval UI's
    /// `GET /pending-domains`.
    #[must_use]
    pub fn list(&self) -> Vec<DomainRequest> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .values()
            .map(|e| e.request.clone())
            .collect()
    }

    /// Number of currently pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every pending request as [`DomainOutcome::ShuttingDown`].
    /// Called once, from the daemon's shutdown path.
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.entries.lock().expect("lock poisoned").keys().copied().collect();
        for id in ids {
            self.resolve(id, DomainOutcome::ShuttingDown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(timeout: Duration) -> Arc<DomainQueue> {
        DomainQueue::new(Arc::new(EventHub::new()), timeout)
    }

    #[tokio::test]
    async fn add_then_resolve_delivers_outcome() {
        let q = queue(DEFAULT_TIMEOUT);
        let (id, mut rx) = q.add("tok", "c", "p", "example.com");
        assert!(q.resolve(
            id,
            DomainOutcome::Approved {
                scope: ApprovalScope::Once,
                pattern: None
            }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            DomainOutcome::Approved {
                scope: ApprovalScope::Once,
                pattern: None
            }
        );
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn second_add_for_same_key_coalesces() {
        let q = queue(DEFAULT_TIMEOUT);
        let (id_a, mut rx_a) = q.add("tok", "c", "p", "example.com");
        let (id_b, mut rx_b) = q.add("tok", "c", "p", "example.com");
        assert_eq!(id_a, id_b);
        assert_eq!(q.len(), 1);

        q.resolve(
            id_a,
            DomainOutcome::Denied {
                scope: ApprovalScope::Session,
                wildcard: false,
            },
        );
        assert_eq!(
            rx_a.recv().await.unwrap(),
            DomainOutcome::Denied {
                scope: ApprovalScope::Session,
                wildcard: false
            }
        );
        assert_eq!(
            rx_b.recv().await.unwrap(),
            DomainOutcome::Denied {
                scope: ApprovalScope::Session,
                wildcard: false
            }
        );
    }

    #[tokio::test]
    async fn different_domain_gets_its_own_entry() {
        let q = queue(DEFAULT_TIMEOUT);
        let (id_a, _rx_a) = q.add("tok", "c", "p", "a.example.com");
        let (id_b, _rx_b) = q.add("tok", "c", "p", "b.example.com");
        assert_ne!(id_a, id_b);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn timeout_fires_and_removes_entry() {
        let q = queue(Duration::from_millis(20));
        let (_id, mut rx) = q.add("tok", "c", "p", "slow.example.com");
        assert_eq!(rx.recv().await.unwrap(), DomainOutcome::Timeout);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn resolve_unknown_id_returns_false() {
        let q = queue(DEFAULT_TIMEOUT);
        assert!(!q.resolve(Uuid::new_v4(), DomainOutcome::Timeout));
    }

    #[tokio::test]
    async fn shutdown_resolves_every_pending_request() {
        let q = queue(DEFAULT_TIMEOUT);
        let (_id_a, mut rx_a) = q.add("tok", "c", "p", "a.example.com");
        let (_id_b, mut rx_b) = q.add("tok", "c", "p", "b.example.com");
        q.shutdown();
        assert_eq!(rx_a.recv().await.unwrap(), DomainOutcome::ShuttingDown);
        assert_eq!(rx_b.recv().await.unwrap(), DomainOutcome::ShuttingDown);
        assert!(q.is_empty());
    }
}
