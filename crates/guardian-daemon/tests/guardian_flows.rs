//! End-to-end scenarios against the four servers wired together exactly
//! as `guardiand` wires them: a real `TcpListener` for the proxy (so
//! CONNECT tunnels are genuine spliced TCP connections) plus in-process
//! `tower::oneshot` calls against the API/Request/Approval-UI routers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use guardian_approval::{CommandQueue, DomainQueue, EventHub};
use guardian_core::decisions::DecisionsFile;
use guardian_core::{AllowEntry, GuardianPaths};
use guardian_daemon::{api, approval_ui, proxy, request, SharedState};
use guardian_policy::PolicyCache;
use guardian_tokens::TokenRegistry;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

/// One running Guardian under test: its state plus a live proxy listener.
struct Harness {
    _dir: TempDir,
    paths: GuardianPaths,
    state: SharedState,
    proxy_addr: SocketAddr,
}

async fn start_harness() -> Harness {
    start_harness_with_timeout(Duration::from_millis(500)).await
}

async fn start_harness_with_timeout(approval_timeout: Duration) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = GuardianPaths::rooted_at(dir.path());
    let tokens = Arc::new(TokenRegistry::new(paths.tokens_dir()));
    let policy = Arc::new(PolicyCache::new(paths.clone(), tokens.clone()));
    let hub = Arc::new(EventHub::new());
    let domain_queue = DomainQueue::new(hub.clone(), approval_timeout);
    let command_queue = CommandQueue::new(hub.clone(), approval_timeout);

    let state = SharedState {
        paths: paths.clone(),
        tokens,
        policy,
        domain_queue,
        command_queue,
        hub,
        executor_addr: "127.0.0.1:1".parse().expect("valid loopback addr"),
        executor_secret: Arc::from("test-secret"),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy listener");
    let proxy_addr = listener.local_addr().expect("listener has a local addr");
    let app = Router::new().fallback(proxy::handle).with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });

    Harness {
        _dir: dir,
        paths,
        state,
        proxy_addr,
    }
}

/// A TCP echo server standing in for a real upstream, bound loopback so
/// tunneled bytes can be observed round-tripping through a real splice.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo listener");
    let addr = listener.local_addr().expect("listener has a local addr");
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    let n = match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    if sock.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

fn basic_proxy_auth(token: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("token:{token}"))
}

/// Open a raw connection to the proxy and send one `CONNECT` request,
/// returning the response head (terminated at `\r\n\r\n`) and the live
/// stream so a 200 response can be followed by real tunneled bytes.
async fn send_connect(proxy_addr: SocketAddr, target: &str, token: Option<&str>) -> (String, TcpStream) {
    let mut stream = TcpStream::connect(proxy_addr).await.expect("connect to proxy");
    let mut req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(token) = token {
        req.push_str(&format!("Proxy-Authorization: Basic {}\r\n", basic_proxy_auth(token)));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await.expect("write CONNECT request");

    let head = read_response_head(&mut stream).await;
    (head, stream)
}

async fn read_response_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.expect("read response");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn oneshot_json(app: Router, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
                .expect("build request"),
        )
        .await
        .expect("router did not error");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.expect("read body");
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

async fn register_token(harness: &Harness, cloister: &str, project: &str) -> String {
    let app = api::router().with_state(harness.state.clone());
    let (status, body) = oneshot_json(app, "POST", "/tokens", json!({"cloister": cloister, "project": project})).await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().expect("token in response").to_string()
}

#[tokio::test]
async fn non_connect_method_is_rejected_with_no_queue_entry() {
    let harness = start_harness().await;
    let mut stream = TcpStream::connect(harness.proxy_addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();
    let head = read_response_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 405"), "unexpected response: {head}");
    assert!(harness.state.domain_queue.is_empty());
}

#[tokio::test]
async fn missing_auth_header_is_407() {
    let harness = start_harness().await;
    let (head, _stream) = send_connect(harness.proxy_addr, "example.com:443", None).await;
    assert!(head.starts_with("HTTP/1.1 407"), "unexpected response: {head}");
}

#[tokio::test]
async fn s1_deny_once_reprompts_on_next_connect() {
    let harness = start_harness().await;
    let token = register_token(&harness, "c1", "p").await;

    let (head_task, proxy_addr) = (harness.proxy_addr, harness.proxy_addr);
    let _ = head_task;
    let token_clone = token.clone();
    let first = tokio::spawn(async move { send_connect(proxy_addr, "unlisted.example.com:443", Some(&token_clone)).await.0 });

    let id = wait_for_pending_domain(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    let (status, _) = oneshot_json(approval_app, "POST", &format!("/deny-domain/{id}"), json!({"scope": "once"})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let head = first.await.unwrap();
    assert!(head.starts_with("HTTP/1.1 403"), "unexpected response: {head}");

    // Second CONNECT to the same host re-prompts: nothing was persisted.
    let token_clone = token.clone();
    let second = tokio::spawn(async move {
        send_connect(proxy_addr, "unlisted.example.com:443", Some(&token_clone)).await.0
    });
    let id2 = wait_for_pending_domain(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    oneshot_json(approval_app, "POST", &format!("/deny-domain/{id2}"), json!({"scope": "once"})).await;
    let head2 = second.await.unwrap();
    assert!(head2.starts_with("HTTP/1.1 403"));
}

#[tokio::test]
async fn s2_allow_session_tunnels_real_bytes_and_skips_second_prompt() {
    let harness = start_harness().await;
    let token = register_token(&harness, "c1", "p").await;
    let echo_addr = spawn_echo_server().await;
    let target = format!("127.0.0.1:{}", echo_addr.port());

    let proxy_addr = harness.proxy_addr;
    let target_clone = target.clone();
    let token_clone = token.clone();
    let first = tokio::spawn(async move { send_connect(proxy_addr, &target_clone, Some(&token_clone)).await });

    let id = wait_for_pending_domain(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    let (status, _) = oneshot_json(approval_app, "POST", &format!("/approve-domain/{id}"), json!({"scope": "session"})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (head, mut stream) = first.await.unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");

    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    // No approvals file was written for a session-scoped decision.
    assert!(!harness.paths.project_approvals("p").exists());
    assert!(!harness.paths.global_approvals().exists());

    // Second CONNECT to the same host succeeds immediately, no prompt.
    let (head2, _stream2) = send_connect(harness.proxy_addr, &target, Some(&token)).await;
    assert!(head2.starts_with("HTTP/1.1 200"), "unexpected response: {head2}");
    assert!(harness.state.domain_queue.is_empty());
}

#[tokio::test]
async fn s3_project_scope_survives_a_simulated_restart() {
    let harness = start_harness().await;
    let token = register_token(&harness, "c1", "p").await;

    let proxy_addr = harness.proxy_addr;
    let token_clone = token.clone();
    let first = tokio::spawn(async move {
        send_connect(proxy_addr, "project-allow.example.com:443", Some(&token_clone)).await.0
    });
    let id = wait_for_pending_domain(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    oneshot_json(approval_app, "POST", &format!("/approve-domain/{id}"), json!({"scope": "project"})).await;
    let _ = first.await.unwrap();

    let file = DecisionsFile::read_tolerant(&harness.paths.project_approvals("p")).unwrap();
    assert_eq!(file.proxy.allow, vec![AllowEntry::domain("project-allow.example.com")]);

    // Simulate a full restart: brand-new registry (recovered from disk)
    // and a brand-new policy cache, no UI interaction involved.
    let restarted_tokens = Arc::new(TokenRegistry::new(harness.paths.tokens_dir()));
    restarted_tokens.load_all();
    let restarted_policy = PolicyCache::new(harness.paths.clone(), restarted_tokens.clone());
    assert_eq!(
        restarted_policy.decide(&token, "project-allow.example.com"),
        guardian_policy::Decision::Allow
    );
}

#[tokio::test]
async fn s4_wildcard_matches_one_label_only() {
    let harness = start_harness().await;
    let token = register_token(&harness, "c1", "p").await;

    let proxy_addr = harness.proxy_addr;
    let token_clone = token.clone();
    let first = tokio::spawn(async move { send_connect(proxy_addr, "api.wild.com:443", Some(&token_clone)).await.0 });
    let id = wait_for_pending_domain(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    oneshot_json(
        approval_app,
        "POST",
        &format!("/approve-domain/{id}"),
        json!({"scope": "project", "wildcard": true}),
    )
    .await;
    let head = first.await.unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");

    // One label under the approved suffix: no prompt.
    let (head2, _s) = send_connect(harness.proxy_addr, "cdn.wild.com:443", Some(&token)).await;
    assert!(head2.starts_with("HTTP/1.1 200"), "unexpected response: {head2}");

    // Two labels under the approved suffix: re-prompts.
    let proxy_addr = harness.proxy_addr;
    let token_clone = token.clone();
    let third = tokio::spawn(async move {
        send_connect(proxy_addr, "deep.cdn.wild.com:443", Some(&token_clone)).await.0
    });
    let id3 = wait_for_pending_domain(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    oneshot_json(approval_app, "POST", &format!("/deny-domain/{id3}"), json!({"scope": "once"})).await;
    let head3 = third.await.unwrap();
    assert!(head3.starts_with("HTTP/1.1 403"));
}

#[tokio::test]
async fn s6_concurrent_connects_to_same_host_coalesce_into_one_prompt() {
    let harness = start_harness().await;
    let token = register_token(&harness, "c1", "p").await;

    let proxy_addr = harness.proxy_addr;
    let t1 = token.clone();
    let first = tokio::spawn(async move { send_connect(proxy_addr, "coalesce.example.com:443", Some(&t1)).await.0 });
    let t2 = token.clone();
    let second = tokio::spawn(async move { send_connect(proxy_addr, "coalesce.example.com:443", Some(&t2)).await.0 });

    let id = wait_for_pending_domain(&harness).await;
    assert_eq!(harness.state.domain_queue.len(), 1, "two concurrent requests should coalesce into one entry");

    let approval_app = approval_ui::router().with_state(harness.state.clone());
    oneshot_json(approval_app, "POST", &format!("/approve-domain/{id}"), json!({"scope": "session"})).await;

    let (head1, head2) = tokio::join!(first, second);
    assert!(head1.unwrap().starts_with("HTTP/1.1 200"));
    assert!(head2.unwrap().starts_with("HTTP/1.1 200"));
}

async fn wait_for_pending_domain(harness: &Harness) -> uuid::Uuid {
    for _ in 0..200 {
        if let Some(req) = harness.state.domain_queue.list().into_iter().next() {
            return req.id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no pending domain request appeared in time");
}

async fn wait_for_pending_command(harness: &Harness) -> uuid::Uuid {
    for _ in 0..200 {
        if let Some(req) = harness.state.command_queue.list().into_iter().next() {
            return req.id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no pending command request appeared in time");
}

fn write_global_commands(paths: &GuardianPaths, yaml: &str) {
    std::fs::create_dir_all(paths.global_config().parent().unwrap()).unwrap();
    std::fs::write(paths.global_config(), yaml).unwrap();
}

#[tokio::test]
async fn command_auto_approve_runs_immediately_through_a_real_executor() {
    let harness = start_harness().await;
    write_global_commands(
        &harness.paths,
        "commands:\n  auto_approve:\n    - \"echo *\"\n",
    );
    harness.state.policy.reload();
    let token = register_token(&harness, "c1", "p").await;

    let secret: Arc<str> = Arc::from("exec-secret");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let executor_addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(guardian_executor::serve(listener, secret.clone(), shutdown_rx));

    let mut state = harness.state.clone();
    state.executor_addr = executor_addr;
    state.executor_secret = secret;

    let app = request::router().with_state(state);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/execute")
                .header("content-type", "application/json")
                .header("X-Cloister-Token", token)
                .body(Body::from(
                    serde_json::to_vec(&json!({"command": "echo", "args": ["hello"]})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["denied"], false);
    assert_eq!(body["exitCode"], 0);
    assert_eq!(body["stdout"], "hello\n");
}

#[tokio::test]
async fn command_manual_approve_waits_for_a_human_decision() {
    let harness = start_harness_with_timeout(Duration::from_secs(5)).await;
    write_global_commands(
        &harness.paths,
        "commands:\n  manual_approve:\n    - \"sleep *\"\n",
    );
    harness.state.policy.reload();
    let token = register_token(&harness, "c1", "p").await;

    let secret: Arc<str> = Arc::from("exec-secret");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let executor_addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(guardian_executor::serve(listener, secret.clone(), shutdown_rx));

    let mut state = harness.state.clone();
    state.executor_addr = executor_addr;
    state.executor_secret = secret;

    let submit_state = state.clone();
    let submit = tokio::spawn(async move {
        let app = request::router().with_state(submit_state);
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/execute")
                .header("content-type", "application/json")
                .header("X-Cloister-Token", token)
                .body(Body::from(
                    serde_json::to_vec(&json!({"command": "sleep", "args": ["0"]})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap()
    });

    let id = wait_for_pending_command(&harness).await;
    let approval_app = approval_ui::router().with_state(harness.state.clone());
    let (status, _) = oneshot_json(approval_app, "POST", &format!("/approve-command/{id}"), json!({})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let resp = submit.await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["denied"], false);
    assert_eq!(body["exitCode"], 0);
}
