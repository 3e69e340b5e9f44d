//! Entry point for the host-side Executor process.
//!
//! Binds a TCP listener (ephemeral by default, or `CLOISTER_EXECUTOR_PORT`
//! if set), writes the discovery file so the Guardian container can find
//! it, and runs until SIGINT/SIGTERM, at which point it stops accepting,
//! drains in-flight connections, and removes the discovery file.

use std::process;
use std::sync::Arc;

use guardian_core::paths::GuardianPaths;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("GUARDIAN_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let secret = match std::env::var("CLOISTER_SHARED_SECRET") {
        Ok(s) if !s.is_empty() => s,
        _ => {
            tracing::error!("CLOISTER_SHARED_SECRET must be set to a non-empty value");
            process::exit(1);
        }
    };

    let port: u16 = std::env::var("CLOISTER_EXECUTOR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind executor listener");
            process::exit(1);
        }
    };
    let bound_port = listener.local_addr().expect("bound socket has a local address").port();

    let paths = match GuardianPaths::resolve() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve executor state directory");
            process::exit(1);
        }
    };
    let state_path = paths.executor_state_file();
    let state = guardian_executor::DaemonState {
        pid: process::id(),
        secret: secret.clone(),
        tcp_port: bound_port,
    };
    if let Err(e) = guardian_executor::state::write(&state_path, &state) {
        tracing::error!(error = %e, "failed to write executor discovery file");
        process::exit(1);
    }
    tracing::info!(port = bound_port, path = %state_path.display(), "executor listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve_task = tokio::spawn(guardian_executor::serve(listener, Arc::from(secret.as_str()), shutdown_rx));

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    let _ = serve_task.await;
    if let Err(e) = guardian_executor::state::remove(&state_path) {
        tracing::warn!(error = %e, "failed to remove executor discovery file on shutdown");
    }
}
