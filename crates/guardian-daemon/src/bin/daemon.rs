//! Entry point for the Guardian daemon process (`guardiand`): binds the
//! four network servers (Proxy, API, Request, Approval UI), recovers
//! token state from disk, and runs until a terminal signal arrives.
//!
//! SIGHUP reloads the policy cache in place; SIGINT/SIGTERM drain every
//! pending approval and stop accepting new connections within a 30s
//! grace period (see [`guardian_daemon::lifecycle::SHUTDOWN_GRACE`]).

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use guardian_approval::{command_queue, domain_queue, CommandQueue, DomainQueue, EventHub};
use guardian_core::GuardianPaths;
use guardian_daemon::{api, approval_ui, lifecycle, proxy, request, Lifecycle, SharedState};
use guardian_policy::PolicyCache;
use guardian_tokens::TokenRegistry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// CLI flags for the Guardian daemon. Every flag also reads from an env
/// var of the same shape, matching the layout `guardian-core::paths`
/// already draws from the environment.
#[derive(Parser, Debug)]
#[command(name = "guardiand", author, version, about = "Per-host network egress control plane")]
struct Args {
    /// Bind address for the CONNECT proxy (container-network-facing).
    #[arg(long, env = "CLOISTER_PROXY_ADDR", default_value = "0.0.0.0:8443")]
    proxy_addr: SocketAddr,
    /// Bind address for the token API server (localhost).
    #[arg(long, env = "CLOISTER_API_ADDR", default_value = "127.0.0.1:8080")]
    api_addr: SocketAddr,
    /// Bind address for the host-command request server (localhost).
    #[arg(long, env = "CLOISTER_REQUEST_ADDR", default_value = "127.0.0.1:8081")]
    request_addr: SocketAddr,
    /// Bind address for the human approval UI server (localhost).
    #[arg(long, env = "CLOISTER_APPROVAL_UI_ADDR", default_value = "127.0.0.1:8082")]
    approval_ui_addr: SocketAddr,
    /// Emit structured JSON logs instead of the default human-readable format.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_json);

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "guardiand exited with an error");
        process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env("GUARDIAN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let paths = GuardianPaths::resolve()?;

    let tokens = Arc::new(TokenRegistry::new(paths.tokens_dir()));
    tokens.load_all();
    tracing::info!(count = tokens.list().len(), "recovered tokens from disk");

    let policy = Arc::new(PolicyCache::new(paths.clone(), tokens.clone()));
    let hub = Arc::new(EventHub::new());
    let domain_queue = DomainQueue::new(hub.clone(), domain_queue::DEFAULT_TIMEOUT);
    let command_queue = CommandQueue::new(hub.clone(), command_queue::DEFAULT_TIMEOUT);

    let (executor_addr, executor_secret) = resolve_executor(&paths)?;

    let state = SharedState {
        paths,
        tokens,
        policy: policy.clone(),
        domain_queue: domain_queue.clone(),
        command_queue: command_queue.clone(),
        hub,
        executor_addr,
        executor_secret,
    };

    let proxy_listener = TcpListener::bind(args.proxy_addr).await?;
    let api_listener = TcpListener::bind(args.api_addr).await?;
    let request_listener = TcpListener::bind(args.request_addr).await?;
    let approval_listener = TcpListener::bind(args.approval_ui_addr).await?;

    tracing::info!(
        proxy = %args.proxy_addr,
        api = %args.api_addr,
        request = %args.request_addr,
        approval_ui = %args.approval_ui_addr,
        "guardiand listening"
    );

    let trace = tower_http::trace::TraceLayer::new_for_http();
    let proxy_app = Router::new()
        .fallback(proxy::handle)
        .layer(trace.clone())
        .with_state(state.clone());
    let api_app = api::router().layer(trace.clone()).with_state(state.clone());
    let request_app = request::router().layer(trace.clone()).with_state(state.clone());
    let approval_app = approval_ui::router().layer(trace).with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_task = tokio::spawn(serve_with_shutdown(proxy_listener, proxy_app, shutdown_rx.clone()));
    let api_task = tokio::spawn(serve_with_shutdown(api_listener, api_app, shutdown_rx.clone()));
    let request_task = tokio::spawn(serve_with_shutdown(request_listener, request_app, shutdown_rx.clone()));
    let approval_task = tokio::spawn(serve_with_shutdown(approval_listener, approval_app, shutdown_rx));

    let life = Lifecycle::new(policy, domain_queue, command_queue);
    life.run(shutdown_tx).await?;

    let drained = tokio::time::timeout(lifecycle::SHUTDOWN_GRACE, async {
        let _ = tokio::join!(proxy_task, api_task, request_task, approval_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("shutdown grace period elapsed before every server stopped");
    }

    Ok(())
}

async fn serve_with_shutdown(listener: TcpListener, app: Router, mut shutdown: watch::Receiver<bool>) {
    let result = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "server exited with an error");
    }
}

/// Resolve the executor's address and shared secret: `CLOISTER_EXECUTOR_PORT`
/// plus `CLOISTER_SHARED_SECRET` take priority, falling back to the
/// discovery file the executor process writes at its own startup.
fn resolve_executor(paths: &GuardianPaths) -> anyhow::Result<(SocketAddr, Arc<str>)> {
    if let (Ok(port), Ok(secret)) = (
        std::env::var("CLOISTER_EXECUTOR_PORT"),
        std::env::var("CLOISTER_SHARED_SECRET"),
    ) {
        let port: u16 = port.parse()?;
        return Ok((SocketAddr::from(([127, 0, 0, 1], port)), Arc::from(secret.as_str())));
    }

    let state_path = paths.executor_state_file();
    let contents = std::fs::read_to_string(&state_path).map_err(|e| {
        anyhow::anyhow!("could not read executor discovery file {}: {e}", state_path.display())
    })?;
    let discovered: guardian_executor::DaemonState = serde_json::from_str(&contents)?;
    Ok((
        SocketAddr::from(([127, 0, 0, 1], discovered.tcp_port)),
        Arc::from(discovered.secret.as_str()),
    ))
}
