//! Long-poll client for the shared pad.
//!
//! Provides:
//! - The resilient poll loop: immediate re-poll on success, exponential
//!   backoff on failure
//! - Fire-and-forget edit submission (`send`)
//! - Events for an embedding UI
//!
//! Polls are strictly sequential: the next listen request is issued only
//! after the previous one resolves, success or failure. Edits ride a
//! separate path and may overlap an outstanding poll freely; the only way a
//! submitted edit reaches the local view is through the poll loop.

use std::sync::Arc;
use std::time::Duration;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::protocol::{ListenForm, ProtocolError, TextSnapshot, UpdateForm, XSRF_COOKIE};

/// Listen endpoint path.
pub const LISTEN_PATH: &str = "/a/text/listen";
/// Update endpoint path.
pub const UPDATE_PATH: &str = "/a/text/update";

/// Default backoff floor: 500 ms.
pub const BACKOFF_FLOOR: Duration = Duration::from_millis(500);

/// Exponential retry delay for the poll loop.
///
/// Doubled on each consecutive failure with no ceiling (a deliberate
/// compatibility choice), reset to the floor on any success. The first
/// failure after a success therefore sleeps `2 × floor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `floor`.
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            current: floor,
        }
    }

    /// Double the counter and return the delay before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2);
        self.current
    }

    /// Reset the counter to its floor.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    /// Current counter value.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Configured floor.
    pub fn floor(&self) -> Duration {
        self.floor
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_FLOOR)
    }
}

/// Events emitted by the pad client.
#[derive(Debug, Clone)]
pub enum PadEvent {
    /// A poll succeeded and the local view was replaced.
    Updated(TextSnapshot),
    /// A poll failed; the loop retries after `retry_in`.
    PollFailed { retry_in: Duration },
}

/// Local view of the shared buffer.
///
/// Both fields are unknown until the first successful poll; mutated only
/// by a poll response, never by `send`.
#[derive(Debug, Clone, Default)]
struct PadView {
    body: Option<String>,
    sig: Option<String>,
}

/// The pad client: one owned poller instance.
///
/// Construct once at startup and share behind an [`Arc`]; whatever handles
/// user input calls [`PadClient::send`] while the poll loop runs.
pub struct PadClient {
    http: reqwest::Client,

    /// Cookie jar shared with `http`, re-read on every request for the
    /// anti-forgery token.
    jar: Arc<Jar>,

    /// Pad root, used for cookie lookup and the bootstrap GET.
    base: Url,
    listen_url: Url,
    update_url: Url,

    /// Local view of the shared buffer.
    view: RwLock<PadView>,

    /// Retry delay state for the poll loop.
    backoff: Mutex<Backoff>,

    /// Event sender (events are dropped when nobody is listening).
    event_tx: mpsc::Sender<PadEvent>,
    /// Event receiver for the application.
    event_rx: Mutex<Option<mpsc::Receiver<PadEvent>>>,
}

impl PadClient {
    /// Create a client for the pad served at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ProtocolError> {
        Self::with_backoff(base_url, Backoff::default())
    }

    /// Create a client with an explicit backoff configuration.
    pub fn with_backoff(base_url: &str, backoff: Backoff) -> Result<Self, ProtocolError> {
        let base = Url::parse(base_url).map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let listen_url = base
            .join(LISTEN_PATH)
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let update_url = base
            .join(UPDATE_PATH)
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(256);

        Ok(Self {
            http,
            jar,
            base,
            listen_url,
            update_url,
            view: RwLock::new(PadView::default()),
            backoff: Mutex::new(backoff),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Take the event receiver (can only be called once).
    pub async fn take_event_rx(&self) -> Option<mpsc::Receiver<PadEvent>> {
        self.event_rx.lock().await.take()
    }

    /// Bootstrap GET against the pad root so the server issues the `_xsrf`
    /// and session cookies (the browser equivalent of loading the page).
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let resp = self
            .http
            .get(self.base.clone())
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProtocolError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    /// Read the anti-forgery token fresh from the cookie jar.
    ///
    /// String matching on the cookie header, never cached.
    pub fn xsrf_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let raw = header.to_str().ok()?;
        raw.split(';')
            .map(str::trim)
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == XSRF_COOKIE)
            .map(|(_, value)| value.to_owned())
    }

    /// Issue a single listen request, carrying the token and the last-seen
    /// signature if known.
    ///
    /// The server holds the request open until the buffer differs from the
    /// given signature. A malformed payload is indistinguishable from a
    /// transport failure to callers.
    pub async fn poll_once(&self) -> Result<TextSnapshot, ProtocolError> {
        let xsrf = self.xsrf_token().ok_or(ProtocolError::MissingToken)?;
        let sig = self.view.read().await.sig.clone();
        let form = ListenForm { xsrf, sig };

        let resp = self
            .http
            .post(self.listen_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProtocolError::Status(resp.status().as_u16()));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        TextSnapshot::parse(&text)
    }

    /// Replace the local view with a poll response and notify listeners.
    pub async fn apply_snapshot(&self, snapshot: TextSnapshot) {
        {
            let mut view = self.view.write().await;
            view.body = Some(snapshot.body.clone());
            view.sig = Some(snapshot.sig.clone());
        }
        let _ = self.event_tx.try_send(PadEvent::Updated(snapshot));
    }

    /// Fold one poll outcome into the loop state.
    ///
    /// Success: overwrite the view, reset the backoff, re-poll immediately
    /// (returns [`Duration::ZERO`]). Failure of any kind: double the
    /// backoff and return the delay before the next attempt.
    pub async fn apply_outcome(
        &self,
        outcome: Result<TextSnapshot, ProtocolError>,
    ) -> Duration {
        match outcome {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot).await;
                self.backoff.lock().await.reset();
                Duration::ZERO
            }
            Err(e) => {
                let retry_in = self.backoff.lock().await.record_failure();
                log::warn!("Poll error: {e}; sleeping for {}ms", retry_in.as_millis());
                let _ = self.event_tx.try_send(PadEvent::PollFailed { retry_in });
                retry_in
            }
        }
    }

    /// Run the poll loop forever.
    ///
    /// At most one poll is in flight at a time; there is no cancellation
    /// and no client-side timeout.
    pub async fn run(&self) {
        loop {
            let outcome = self.poll_once().await;
            let delay = self.apply_outcome(outcome).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Spawn the poll loop on the runtime.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }

    /// Submit the current editor text if it differs from the last-known
    /// buffer body.
    ///
    /// Fire-and-forget: the request is spawned and never awaited, failures
    /// are logged and dropped, and the local view is left untouched — the
    /// edit is only confirmed once the poll loop observes it. Returns
    /// whether a request was dispatched.
    pub async fn send(&self, current_text: &str) -> bool {
        {
            let view = self.view.read().await;
            if view.body.as_deref() == Some(current_text) {
                return false;
            }
        }

        let Some(xsrf) = self.xsrf_token() else {
            log::warn!("Dropping update: no XSRF token");
            return false;
        };

        let form = UpdateForm {
            body: current_text.to_owned(),
            xsrf,
        };
        let request = self.http.post(self.update_url.clone()).form(&form);
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                log::warn!("Update dropped: {e}");
            }
        });
        true
    }

    /// Last-known buffer body (None before the first successful poll).
    pub async fn body(&self) -> Option<String> {
        self.view.read().await.body.clone()
    }

    /// Last-seen signature (None before the first successful poll).
    pub async fn sig(&self) -> Option<String> {
        self.view.read().await.sig.clone()
    }

    /// Current backoff counter.
    pub async fn backoff_current(&self) -> Duration {
        self.backoff.lock().await.current()
    }

    /// The pad root URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }
}
