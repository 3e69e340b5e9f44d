//! The Approval UI server (component D.4): pending-request listing,
//! human decisions, and an SSE stream of queue changes. Localhost-only,
//! same trust boundary as the API server.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use futures::StreamExt;
use guardian_approval::{CommandOutcome, CommandRequest, DomainOutcome, DomainRequest, GuardianEvent};
use guardian_core::ApprovalScope;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/pending-domains", get(pending_domains))
        .route("/pending-commands", get(pending_commands))
        .route("/approve-domain/:id", post(approve_domain))
        .route("/deny-domain/:id", post(deny_domain))
        .route("/approve-command/:id", post(approve_command))
        .route("/deny-command/:id", post(deny_command))
        .route("/events", get(events))
}

#[derive(Debug, Serialize)]
struct PendingDomain {
    id: Uuid,
    cloister: String,
    project: String,
    domain: String,
    created: DateTime<Utc>,
    expires: DateTime<Utc>,
}

impl From<DomainRequest> for PendingDomain {
    fn from(r: DomainRequest) -> Self {
        Self {
            id: r.id,
            cloister: r.cloister,
            project: r.project,
            domain: r.domain,
            created: r.created,
            expires: r.expires,
        }
    }
}

#[derive(Debug, Serialize)]
struct PendingCommand {
    id: Uuid,
    cloister: String,
    project: String,
    command: String,
    args: Vec<String>,
    cwd: String,
    created: DateTime<Utc>,
    expires: DateTime<Utc>,
}

impl From<CommandRequest> for PendingCommand {
    fn from(r: CommandRequest) -> Self {
        Self {
            id: r.id,
            cloister: r.cloister,
            project: r.project,
            command: r.command,
            args: r.args,
            cwd: r.cwd,
            created: r.created,
            expires: r.expires,
        }
    }
}

async fn pending_domains(State(state): State<SharedState>) -> Json<Vec<PendingDomain>> {
    Json(state.domain_queue.list().into_iter().map(Into::into).collect())
}

async fn pending_commands(State(state): State<SharedState>) -> Json<Vec<PendingCommand>> {
    Json(state.command_queue.list().into_iter().map(Into::into).collect())
}

#[derive(Debug, Deserialize)]
struct DomainDecision {
    #[serde(default)]
    scope: ApprovalScope,
    #[serde(default)]
    wildcard: bool,
}

async fn approve_domain(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DomainDecision>,
) -> StatusCode {
    let pattern = if body.wildcard {
        state
            .domain_queue
            .list()
            .into_iter()
            .find(|r| r.id == id)
            .and_then(|r| guardian_approval::wildcard_suffix(&r.domain).ok())
    } else {
        None
    };
    let resolved = state.domain_queue.resolve(
        id,
        DomainOutcome::Approved {
            scope: body.scope,
            pattern,
        },
    );
    if resolved {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn deny_domain(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DomainDecision>,
) -> StatusCode {
    let resolved = state.domain_queue.resolve(
        id,
        DomainOutcome::Denied {
            scope: body.scope,
            wildcard: body.wildcard,
        },
    );
    if resolved {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Default, Deserialize)]
struct CommandDenial {
    #[serde(default)]
    reason: String,
}

async fn approve_command(State(state): State<SharedState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.command_queue.resolve(id, CommandOutcome::Approved) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn deny_command(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CommandDenial>,
) -> StatusCode {
    let reason = if body.reason.is_empty() {
        "denied by operator".to_string()
    } else {
        body.reason
    };
    if state.command_queue.resolve(id, CommandOutcome::Denied { reason }) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Stream queue-change notifications as SSE `event: <kind>` frames. A
/// lagging subscriber silently drops its oldest events (broadcast
/// semantics) rather than the stream erroring out — clients treat a gap
/// as a cue to re-fetch the pending-list snapshot.
async fn events(State(state): State<SharedState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.hub.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => Some(Ok(to_sse(event))),
            Err(_lagged) => Some(Ok(Event::default().event("lagged").data("events were dropped"))),
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse(event: GuardianEvent) -> Event {
    match event {
        GuardianEvent::DomainAdded(id) => Event::default().event("domain_added").data(id.to_string()),
        GuardianEvent::DomainRemoved(id) => Event::default().event("domain_removed").data(id.to_string()),
        GuardianEvent::CommandAdded(id) => Event::default().event("command_added").data(id.to_string()),
        GuardianEvent::CommandRemoved(id) => Event::default().event("command_removed").data(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn pending_domains_lists_an_added_request() {
        let (state, _dir) = test_state();
        let (_id, _rx) = state.domain_queue.add("tok", "c", "p", "example.com");
        let app = router().with_state(state);
        let resp = app
            .oneshot(Request::get("/pending-domains").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let list: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["domain"], "example.com");
    }

    #[tokio::test]
    async fn approve_domain_resolves_pending_request() {
        let (state, _dir) = test_state();
        let (id, mut rx) = state.domain_queue.add("tok", "c", "p", "example.com");
        let app = router().with_state(state);
        let body = serde_json::to_vec(&serde_json::json!({"scope": "once"})).unwrap();
        let resp = app
            .oneshot(
                Request::post(format!("/approve-domain/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            rx.recv().await.unwrap(),
            DomainOutcome::Approved {
                scope: ApprovalScope::Once,
                pattern: None
            }
        );
    }

    #[tokio::test]
    async fn approve_unknown_domain_is_not_found() {
        let (state, _dir) = test_state();
        let app = router().with_state(state);
        let body = serde_json::to_vec(&serde_json::json!({})).unwrap();
        let resp = app
            .oneshot(
                Request::post(format!("/approve-domain/{}", Uuid::new_v4()))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deny_command_defaults_reason_when_absent() {
        let (state, _dir) = test_state();
        let (id, mut rx) = state.command_queue.add("tok", "c", "p", "git", vec!["push".to_string()], "/repo");
        let app = router().with_state(state);
        let body = serde_json::to_vec(&serde_json::json!({})).unwrap();
        let resp = app
            .oneshot(
                Request::post(format!("/deny-command/{id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            rx.recv().await.unwrap(),
            CommandOutcome::Denied {
                reason: "denied by operator".to_string()
            }
        );
    }
}
