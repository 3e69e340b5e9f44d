//! Signal handling: SIGHUP reloads the policy cache in place; SIGINT and
//! SIGTERM drain every pending approval as [`guardian_approval::DomainOutcome::ShuttingDown`]
//! / [`guardian_approval::CommandOutcome::ShuttingDown`] and trigger the
//! servers' graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use guardian_approval::{CommandQueue, DomainQueue};
use guardian_policy::PolicyCache;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

/// Time budget given to in-flight connections after shutdown is signalled
/// before the process exits regardless.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Owns the signal-driven half of the daemon's lifecycle. Constructed once
/// at startup and run to completion from the main task.
pub struct Lifecycle {
    policy: Arc<PolicyCache>,
    domain_queue: Arc<DomainQueue>,
    command_queue: Arc<CommandQueue>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(policy: Arc<PolicyCache>, domain_queue: Arc<DomainQueue>, command_queue: Arc<CommandQueue>) -> Self {
        Self {
            policy,
            domain_queue,
            command_queue,
        }
    }

    /// Block until SIGINT or SIGTERM arrives, reloading on every SIGHUP in
    /// the meantime. Sends `true` on `shutdown_tx` once a terminal signal
    /// is received, then drains both approval queues.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three signal handlers cannot be
    /// installed (e.g. the process has no controlling signal disposition).
    pub async fn run(&self, shutdown_tx: watch::Sender<bool>) -> std::io::Result<()> {
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading policy cache");
                    self.policy.reload();
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    break;
                }
            }
        }

        if shutdown_tx.send(true).is_err() {
            warn!("shutdown signal had no receivers");
        }
        self.drain_queues();
        Ok(())
    }

    /// Resolve every pending domain/command approval as shutting-down so
    /// no caller is left waiting past process exit.
    fn drain_queues(&self) {
        self.domain_queue.shutdown();
        self.command_queue.shutdown();
        info!("pending approvals resolved for shutdown");
    }
}
