//! The Proxy server (component D.1): CONNECT-only, container-network-facing.
//!
//! A CONNECT handler owns its request until completion — accept, decide,
//! possibly suspend on an approval channel, then either tunnel or deny.
//! Unknown hosts enqueue a [`guardian_approval::DomainRequest`] and block
//! until resolved; the handler then re-decides once against the refreshed
//! cache rather than trusting the queue outcome directly, so a concurrent
//! reload is never raced past.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use guardian_approval::{apply_domain_decision, wildcard_suffix, DomainOutcome};
use guardian_core::TokenInfo;
use guardian_policy::Decision;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::state::SharedState;

/// `CONNECT host:port` entry point. Any other method is rejected before
/// authentication is even attempted.
pub async fn handle(State(state): State<SharedState>, req: Request) -> Response {
    if req.method() != Method::CONNECT {
        return (StatusCode::METHOD_NOT_ALLOWED, "only CONNECT is supported\n").into_response();
    }

    let Some(target) = req.uri().authority().map(ToString::to_string) else {
        return (StatusCode::BAD_REQUEST, "CONNECT target must be host:port\n").into_response();
    };

    let Some(token) = extract_token(req.headers()) else {
        return proxy_auth_required();
    };

    let Some(info) = state.tokens.lookup(&token) else {
        return proxy_auth_required();
    };

    let host = target
        .rsplit_once(':')
        .map_or(target.as_str(), |(h, _)| h)
        .to_string();

    let decision = match state.policy.decide(&token, &host) {
        Decision::Unknown => match await_domain_approval(&state, &token, &info, &host).await {
            Ok(decision) => decision,
            Err(response) => return response,
        },
        decided => decided,
    };

    match decision {
        Decision::Allow => tunnel(req, target).await,
        Decision::Deny | Decision::Unknown => deny_response(&host),
    }
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::PROXY_AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (scheme, token) = decoded.split_once(':')?;
    (scheme == "token").then(|| token.to_string())
}

fn proxy_auth_required() -> Response {
    (
        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        [("Proxy-Authenticate", "Basic realm=\"cloister\"")],
        "missing or invalid Proxy-Authorization\n",
    )
        .into_response()
}

fn deny_response(host: &str) -> Response {
    (StatusCode::FORBIDDEN, format!("denied: {host}\n")).into_response()
}

/// Enqueue a domain approval, suspend until resolved, persist the
/// decision per its scope, and re-decide once.
///
/// Returns `Err(response)` for every terminal outcome that does not
/// require a re-decide (deny, timeout, shutdown) — the caller returns
/// that response directly.
async fn await_domain_approval(
    state: &SharedState,
    token: &str,
    info: &TokenInfo,
    host: &str,
) -> Result<Decision, Response> {
    let (_id, mut rx) = state
        .domain_queue
        .add(token, &info.cloister, &info.project, host);

    let outcome = rx.recv().await.unwrap_or(DomainOutcome::Timeout);

    match outcome {
        DomainOutcome::Approved { scope, pattern } => {
            if let Err(e) = apply_domain_decision(
                &state.paths,
                &state.policy,
                token,
                &info.project,
                host,
                true,
                scope,
                pattern.as_deref(),
            ) {
                tracing::warn!(error = %e, host, "failed to persist domain approval");
            }
            Ok(state.policy.decide(token, host))
        }
        DomainOutcome::Denied { scope, wildcard } => {
            let pattern = wildcard.then(|| wildcard_suffix(host).ok()).flatten();
            if let Err(e) = apply_domain_decision(
                &state.paths,
                &state.policy,
                token,
                &info.project,
                host,
                false,
                scope,
                pattern.as_deref(),
            ) {
                tracing::warn!(error = %e, host, "failed to persist domain denial");
            }
            Err(deny_response(host))
        }
        DomainOutcome::Timeout => Err((StatusCode::FORBIDDEN, "approval timed out\n").into_response()),
        DomainOutcome::ShuttingDown => {
            Err((StatusCode::FORBIDDEN, "server shutting down\n").into_response())
        }
    }
}

/// Respond `200 Connection Established`, then splice the upgraded
/// connection to `target` bidirectionally until either side closes.
async fn tunnel(req: Request, target: String) -> Response {
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = splice(upgraded, &target).await {
                    tracing::debug!(error = %e, target, "tunnel ended");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to upgrade CONNECT tunnel"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())
        .expect("static response is well-formed")
}

async fn splice(upgraded: hyper::upgrade::Upgraded, target: &str) -> std::io::Result<()> {
    let mut server = TcpStream::connect(target).await?;
    let mut client = TokioIo::new(upgraded);
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}
