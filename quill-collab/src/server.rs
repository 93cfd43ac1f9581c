//! HTTP server for the shared pad.
//!
//! Three routes:
//! - `GET  /` — serves the pad page and issues the `_xsrf` and session
//!   cookies on first visit
//! - `POST /a/text/listen` — long-poll: held open until the buffer differs
//!   from the caller's signature, then answered with a JSON snapshot
//! - `POST /a/text/update` — replaces the buffer; always answers `"ok"`
//!
//! Mutating requests must repeat the `_xsrf` cookie value in the form
//! field of the same name; a mismatch (or a missing session cookie) is a
//! 403.

use std::sync::Arc;
use std::time::Duration;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::board::{Board, Delivery};
use crate::protocol::{ListenForm, UpdateForm, SESSION_COOKIE, XSRF_COOKIE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Buffer body before anyone has edited.
    pub initial_body: String,
    /// Writer-lock countdown in seconds.
    pub lock_countdown_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8888".to_string(),
            initial_body: "Hello World".to_string(),
            lock_countdown_secs: 5,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_listens: u64,
    pub immediate_responses: u64,
    pub parked_waiters: u64,
    pub total_updates: u64,
    pub rejected_updates: u64,
    pub forbidden_requests: u64,
}

#[derive(Clone)]
struct AppState {
    board: Arc<Board>,
    stats: Arc<RwLock<ServerStats>>,
}

/// The pad server.
pub struct PadServer {
    config: ServerConfig,
    board: Arc<Board>,
    stats: Arc<RwLock<ServerStats>>,
}

impl PadServer {
    /// Create a new pad server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let board = Arc::new(Board::new(
            &config.initial_body,
            Duration::from_secs(config.lock_countdown_secs),
        ));
        Self {
            config,
            board,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Build the router. Exposed so tests can drive handlers directly.
    pub fn router(&self) -> Router {
        let state = AppState {
            board: self.board.clone(),
            stats: self.stats.clone(),
        };
        Router::new()
            .route("/", get(index))
            .route("/a/text/listen", post(listen))
            .route("/a/text/update", post(update))
            .with_state(state)
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Pad server listening on {}", self.config.bind_addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// The shared board.
    pub fn board(&self) -> &Arc<Board> {
        &self.board
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

const INDEX_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Quill</title></head>\n<body>\n<textarea id=\"padarea\" rows=\"24\" cols=\"80\"></textarea>\n</body>\n</html>\n";

/// Serve the pad page, issuing `_xsrf` and session cookies when absent.
async fn index(jar: CookieJar) -> (CookieJar, Html<&'static str>) {
    let mut jar = jar;
    if jar.get(XSRF_COOKIE).is_none() {
        let token = Uuid::new_v4().simple().to_string();
        jar = jar.add(Cookie::build((XSRF_COOKIE, token)).path("/").build());
    }
    if jar.get(SESSION_COOKIE).is_none() {
        let session = Uuid::new_v4().to_string();
        jar = jar.add(Cookie::build((SESSION_COOKIE, session)).path("/").build());
    }
    (jar, Html(INDEX_PAGE))
}

/// Check the form token against the `_xsrf` cookie and extract the session.
fn authenticate(jar: &CookieJar, form_token: &str) -> Option<Uuid> {
    let cookie_token = jar.get(XSRF_COOKIE)?.value();
    if cookie_token != form_token {
        return None;
    }
    Uuid::parse_str(jar.get(SESSION_COOKIE)?.value()).ok()
}

async fn listen(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<ListenForm>,
) -> Response {
    let Some(session) = authenticate(&jar, &form.xsrf) else {
        log::warn!("Rejecting listen: XSRF/session check failed");
        state.stats.write().await.forbidden_requests += 1;
        return StatusCode::FORBIDDEN.into_response();
    };

    state.stats.write().await.total_listens += 1;

    match state.board.subscribe(form.sig.as_deref(), session).await {
        Delivery::Immediate(snapshot) => {
            state.stats.write().await.immediate_responses += 1;
            Json(snapshot).into_response()
        }
        Delivery::Parked(rx) => {
            state.stats.write().await.parked_waiters += 1;
            log::debug!("Parking listener for session {session}");
            match rx.await {
                Ok(snapshot) => Json(snapshot).into_response(),
                // The update that would have resolved us never sent.
                Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            }
        }
    }
}

async fn update(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<UpdateForm>,
) -> Response {
    let Some(session) = authenticate(&jar, &form.xsrf) else {
        log::warn!("Rejecting update: XSRF/session check failed");
        state.stats.write().await.forbidden_requests += 1;
        return StatusCode::FORBIDDEN.into_response();
    };

    match state.board.update(form.body, session).await {
        Ok(_) => {
            state.stats.write().await.total_updates += 1;
        }
        Err(e) => {
            // Matches the original: the rejection is visible in the log
            // only, the response stays "ok".
            log::warn!("Session {session} didn't have the writer lock: {e}");
            state.stats.write().await.rejected_updates += 1;
        }
    }

    "ok".into_response()
}
