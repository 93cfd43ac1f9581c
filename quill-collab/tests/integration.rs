//! Integration tests for end-to-end long-poll collaboration.
//!
//! These tests start a real server and connect real clients, verifying
//! the full poll/update pipeline including XSRF enforcement and backoff.

use quill_collab::client::{PadClient, PadEvent};
use quill_collab::protocol::{signature, ProtocolError, XSRF_COOKIE};
use quill_collab::server::{PadServer, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return its base URL and a handle to it.
async fn start_test_server() -> (String, Arc<PadServer>) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };
    let server = Arc::new(PadServer::new(config));
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    // Give the server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://127.0.0.1:{port}"), server)
}

/// A connected client (cookies already issued).
async fn connected_client(url: &str) -> PadClient {
    let client = PadClient::new(url).unwrap();
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn test_connect_issues_cookies() {
    let (url, _server) = start_test_server().await;
    let client = PadClient::new(&url).unwrap();

    assert!(client.xsrf_token().is_none());
    client.connect().await.unwrap();
    assert!(client.xsrf_token().is_some());
}

#[tokio::test]
async fn test_first_poll_returns_initial_snapshot() {
    let (url, _server) = start_test_server().await;
    let client = connected_client(&url).await;

    let snap = timeout(Duration::from_secs(2), client.poll_once())
        .await
        .expect("First poll should answer immediately")
        .unwrap();
    assert_eq!(snap.body, "Hello World");
    assert_eq!(snap.sig, signature("Hello World"));
}

#[tokio::test]
async fn test_poll_without_cookies_fails() {
    let (url, _server) = start_test_server().await;
    let client = PadClient::new(&url).unwrap();

    // Never connected: no token to attach, same failure path as transport.
    let err = client.poll_once().await.unwrap_err();
    assert!(matches!(err, ProtocolError::MissingToken));
}

#[tokio::test]
async fn test_xsrf_mismatch_rejected() {
    let (url, server) = start_test_server().await;

    let jar = std::sync::Arc::new(reqwest::cookie::Jar::default());
    let http = reqwest::Client::builder()
        .cookie_provider(jar)
        .build()
        .unwrap();
    http.get(&url).send().await.unwrap();

    // Valid cookies, wrong form token.
    let resp = http
        .post(format!("{url}/a/text/listen"))
        .form(&[(XSRF_COOKIE, "bogus")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = http
        .post(format!("{url}/a/text/update"))
        .form(&[("body", "hijacked"), (XSRF_COOKIE, "bogus")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Buffer untouched.
    assert_eq!(server.board().snapshot().await.body, "Hello World");
    assert_eq!(server.stats().await.forbidden_requests, 2);
}

#[tokio::test]
async fn test_poll_blocks_until_change() {
    let (url, server) = start_test_server().await;
    let client = connected_client(&url).await;

    let snap = client.poll_once().await.unwrap();
    client.apply_snapshot(snap).await;

    // Up-to-date signature: the server holds the request open.
    let parked = timeout(Duration::from_millis(300), client.poll_once()).await;
    assert!(parked.is_err(), "Poll with current sig should stay parked");

    let stats = server.stats().await;
    assert_eq!(stats.parked_waiters, 1);
    assert_eq!(stats.immediate_responses, 1);
}

#[tokio::test]
async fn test_edit_propagates_between_sessions() {
    let (url, _server) = start_test_server().await;

    let bob = Arc::new(connected_client(&url).await);
    let first = bob.poll_once().await.unwrap();
    bob.apply_snapshot(first).await;

    // Bob's next poll parks, waiting for someone to edit.
    let parked = {
        let bob = bob.clone();
        tokio::spawn(async move { bob.poll_once().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let alice = connected_client(&url).await;
    assert!(alice.send("collaborative hello").await);

    let snap = timeout(Duration::from_secs(2), parked)
        .await
        .expect("Parked poll should resolve after the edit")
        .unwrap()
        .unwrap();
    assert_eq!(snap.body, "collaborative hello");
    assert_eq!(snap.sig, signature("collaborative hello"));
}

#[tokio::test]
async fn test_send_unchanged_text_fires_no_request() {
    let (url, server) = start_test_server().await;
    let client = connected_client(&url).await;

    let snap = client.poll_once().await.unwrap();
    client.apply_snapshot(snap).await;

    assert!(!client.send("Hello World").await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.stats().await.total_updates, 0);

    assert!(client.send("Hello World, edited").await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.stats().await.total_updates, 1);
    assert_eq!(server.board().snapshot().await.body, "Hello World, edited");
}

#[tokio::test]
async fn test_own_edit_confirmed_via_poll_loop() {
    let (url, _server) = start_test_server().await;

    let client = connected_client(&url).await;
    let mut events = client.take_event_rx().await.unwrap();
    let client = Arc::new(client);
    let _loop = client.start();

    // First poll: initial snapshot.
    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    match event {
        Some(PadEvent::Updated(snap)) => assert_eq!(snap.body, "Hello World"),
        other => panic!("Expected Updated event, got {other:?}"),
    }

    // Let the loop's next poll park on the server.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // send() does not touch the local view; only the loop does.
    assert!(client.send("typed text").await);
    assert_ne!(client.body().await.as_deref(), Some("typed text"));

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    match event {
        Some(PadEvent::Updated(snap)) => assert_eq!(snap.body, "typed text"),
        other => panic!("Expected Updated event, got {other:?}"),
    }

    // Now confirmed: re-sending the same text is a no-op.
    assert_eq!(client.body().await.as_deref(), Some("typed text"));
    assert!(!client.send("typed text").await);
}

#[tokio::test]
async fn test_unreachable_server_backs_off() {
    // Nothing listens on port 1.
    let client = PadClient::new("http://127.0.0.1:1").unwrap();

    let outcome = client.poll_once().await;
    assert!(outcome.is_err());
    let delay = client.apply_outcome(outcome).await;
    assert_eq!(delay, Duration::from_millis(1000));

    let outcome = client.poll_once().await;
    let delay = client.apply_outcome(outcome).await;
    assert_eq!(delay, Duration::from_millis(2000));
}

#[tokio::test]
async fn test_malformed_listen_payload_backs_off() {
    use axum::routing::{get, post};
    use axum_extra::extract::cookie::{Cookie, CookieJar};

    // A server that issues cookies but answers listens with the literal
    // "ok" the original handed to writers — unparseable as a snapshot.
    async fn bad_index(jar: CookieJar) -> (CookieJar, &'static str) {
        let jar = jar
            .add(Cookie::build((XSRF_COOKIE, "tok")).path("/").build())
            .add(Cookie::build(("session", "00000000-0000-4000-8000-000000000000")).path("/").build());
        (jar, "hi")
    }
    let app = axum::Router::new()
        .route("/", get(bad_index))
        .route("/a/text/listen", post(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = PadClient::new(&format!("http://{addr}")).unwrap();
    client.connect().await.unwrap();

    let outcome = client.poll_once().await;
    assert!(matches!(outcome, Err(ProtocolError::Malformed(_))));

    // Same retry path as a transport failure: counter doubles.
    let delay = client.apply_outcome(outcome).await;
    assert_eq!(delay, Duration::from_millis(1000));
    let delay = client
        .apply_outcome(client.poll_once().await)
        .await;
    assert_eq!(delay, Duration::from_millis(2000));
}

#[tokio::test]
async fn test_poll_carries_latest_sig() {
    let (url, server) = start_test_server().await;
    let client = connected_client(&url).await;

    // First poll, no sig: immediate.
    let snap = client.poll_once().await.unwrap();
    client.apply_snapshot(snap).await;

    // Someone else edits; our stale sig makes the next poll immediate too.
    let editor = connected_client(&url).await;
    assert!(editor.send("second revision").await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snap = timeout(Duration::from_secs(2), client.poll_once())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snap.body, "second revision");
    client.apply_snapshot(snap).await;
    assert_eq!(client.sig().await.unwrap(), signature("second revision"));

    // Exactly one poll per response so far: both were immediate.
    let stats = server.stats().await;
    assert_eq!(stats.total_listens, 2);
    assert_eq!(stats.immediate_responses, 2);
    assert_eq!(stats.parked_waiters, 0);
}
