//! The pending-command-approval queue.
//!
//! Mirrors [`crate::domain_queue::DomainQueue`] but coalesces on
//! `token:fingerprint`, where the fingerprint hashes the command, its
//! arguments, and its working directory — two requests for the same
//! program with different arguments are distinct prompts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hub::{EventHub, GuardianEvent};

/// Default wait before a command request is treated as timed out.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A host-command line awaiting a human decision.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub id: Uuid,
    pub token: String,
    pub cloister: String,
    pub project: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl CommandRequest {
    /// The full command line as classified by [`guardian_policy::CommandMatcher`].
    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Resolution of a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Run it.
    Approved,
    /// Reject it.
    Denied { reason: String },
    /// Nobody decided before `expires`.
    Timeout,
    /// The daemon is shutting down with this request still pending.
    ShuttingDown,
}

/// Hash `(command, args, cwd)` into the coalescing fingerprint used as
/// part of the queue key. Two requests with the same program but
/// different arguments or working directory are distinct prompts.
#[must_use]
pub fn fingerprint(command: &str, args: &[String], cwd: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_bytes());
    for arg in args {
        hasher.update([0u8]);
        hasher.update(arg.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(cwd.as_bytes());
    hex::encode(hasher.finalize())
}

struct Entry {
    request: CommandRequest,
    key: String,
    tx: broadcast::Sender<CommandOutcome>,
    timeout_task: JoinHandle<()>,
}

/// Coalescing queue of pending command approvals.
pub struct CommandQueue {
    entries: Mutex<HashMap<Uuid, Entry>>,
    by_key: Mutex<HashMap<String, Uuid>>,
    hub: Arc<EventHub>,
    default_timeout: Duration,
}

impl CommandQueue {
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
    /// same `token:fingerprint` key.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        self: &Arc<Self>,
        token: impl Into<String>,
        cloister: impl Into<String>,
        project: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        cwd: impl Into<String>,
    ) -> (Uuid, broadcast::Receiver<CommandOutcome>) {
        let token = token.into();
        let command = command.into();
        let cwd = cwd.into();
        let key = format!("{token}:{}", fingerprint(&command, &args, &cwd));

        if let Some(id) = self.by_key.lock().expect("lock poisoned").get(&key).copied() {
            if let Some(entry) = self.entries.lock().expect("lock poisoned").get(&id) {
                return (id, entry.tx.subscribe());
            }
        }

        let id = Uuid::new_v4();
        let created = Utc::now();
        let expires = created
            + chrono::Duration::from_std(self.default_timeout).unwrap_or(chrono::Duration::seconds(300));
        let request = CommandRequest {
            id,
            token,
            cloister: cloister.into(),
            project: project.into(),
            command,
            args,
            cwd,
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
        self.hub.publish(GuardianEvent::CommandAdded(id));
        (id, rx)
    }

    /// Resolve a pending request, broadcasting `outcome` and cancelling
    /// its timeout task. Returns `false` if `id` is not pending.
    pub fn resolve(&self, id: Uuid, outcome: CommandOutcome) -> bool {
        let removed = self.entries.lock().expect("lock poisoned").remove(&id);
        let Some(entry) = removed else {
            return false;
        };
        entry.timeout_task.abort();
        self.by_key.lock().expect("lock poisoned").remove(&entry.key);
        let _ = entry.tx.send(outcome);
        self.hub.publish(GuardianEvent::CommandRemoved(id));
        true
    }

    fn fire_timeout(&self, id: Uuid) {
        self.resolve(id, CommandOutcome::Timeout);
    }

    /// Snapshot of every currently pending request, for the Approval UI's
    /// `GET /pending-commands`.
    #[must_use]
    pub fn list(&self) -> Vec<CommandRequest> {
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

    /// Resolve every pending request as [`CommandOutcome::ShuttingDown`].
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.entries.lock().expect("lock poisoned").keys().copied().collect();
        for id in ids {
            self.resolve(id, CommandOutcome::ShuttingDown);
        }
    }
}
