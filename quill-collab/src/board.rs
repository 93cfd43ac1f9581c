//! Server-side shared buffer with long-poll waiters.
//!
//! One buffer per server. A listen request whose signature is stale gets
//! the current snapshot immediately; otherwise it is parked as a waiter
//! until the next update flushes everyone. A short-lived writer lock keeps
//! the active typist from being echoed their own keystrokes on the
//! immediate path.

use std::time::{Duration, Instant};
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::protocol::TextSnapshot;

/// Writer-lock countdown used by [`Board::with_initial`]: 5 seconds.
pub const LOCK_COUNTDOWN: Duration = Duration::from_secs(5);

/// How a listen request is answered.
pub enum Delivery {
    /// The caller's signature was stale; here is the current snapshot.
    Immediate(TextSnapshot),
    /// Nothing new for this caller; resolved by the next update.
    Parked(oneshot::Receiver<TextSnapshot>),
}

/// Board errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// Another session holds an unexpired writer lock.
    Locked(Uuid),
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked(holder) => write!(f, "Writer lock held by session {holder}"),
        }
    }
}

impl std::error::Error for BoardError {}

struct WriterLock {
    session: Uuid,
    acquired: Instant,
}

struct BoardInner {
    snapshot: TextSnapshot,
    waiters: Vec<oneshot::Sender<TextSnapshot>>,
    writer: Option<WriterLock>,
}

/// The shared text buffer and its parked listeners.
pub struct Board {
    inner: RwLock<BoardInner>,
    lock_countdown: Duration,
}

impl Board {
    /// Create a board with the given initial body and writer-lock countdown.
    pub fn new(initial_body: impl Into<String>, lock_countdown: Duration) -> Self {
        Self {
            inner: RwLock::new(BoardInner {
                snapshot: TextSnapshot::new(initial_body),
                waiters: Vec::new(),
                writer: None,
            }),
            lock_countdown,
        }
    }

    /// Create a board with the default 5 s writer-lock countdown.
    pub fn with_initial(initial_body: impl Into<String>) -> Self {
        Self::new(initial_body, LOCK_COUNTDOWN)
    }

    /// The session currently holding an unexpired writer lock, if any.
    fn active_writer(inner: &BoardInner, countdown: Duration) -> Option<Uuid> {
        inner
            .writer
            .as_ref()
            .filter(|lock| lock.acquired.elapsed() < countdown)
            .map(|lock| lock.session)
    }

    /// Answer a listen request.
    ///
    /// Responds immediately when `sig` differs from the current signature
    /// (or is absent) and the caller is not the active writer; otherwise
    /// parks a waiter. Parked waiters are held until the next update — no
    /// server-side timeout.
    pub async fn subscribe(&self, sig: Option<&str>, session: Uuid) -> Delivery {
        let mut inner = self.inner.write().await;
        let changed = sig != Some(inner.snapshot.sig.as_str());
        let writer = Self::active_writer(&inner, self.lock_countdown);

        if changed && writer != Some(session) {
            return Delivery::Immediate(inner.snapshot.clone());
        }

        let (tx, rx) = oneshot::channel();
        inner.waiters.push(tx);
        Delivery::Parked(rx)
    }

    /// Like [`Board::subscribe`], but awaits the parked case.
    pub async fn wait_for_change(&self, sig: Option<&str>, session: Uuid) -> TextSnapshot {
        match self.subscribe(sig, session).await {
            Delivery::Immediate(snapshot) => snapshot,
            Delivery::Parked(rx) => match rx.await {
                Ok(snapshot) => snapshot,
                // Sender dropped without an update; fall back to current.
                Err(_) => self.snapshot().await,
            },
        }
    }

    /// Replace the buffer body and flush every parked waiter.
    ///
    /// Acquires or refreshes the writer lock for `session`; fails without
    /// touching the buffer when another session holds an unexpired lock.
    pub async fn update(
        &self,
        body: impl Into<String>,
        session: Uuid,
    ) -> Result<TextSnapshot, BoardError> {
        let (snapshot, flushed) = {
            let mut inner = self.inner.write().await;
            if let Some(holder) = Self::active_writer(&inner, self.lock_countdown) {
                if holder != session {
                    return Err(BoardError::Locked(holder));
                }
            }
            inner.writer = Some(WriterLock {
                session,
                acquired: Instant::now(),
            });

            inner.snapshot = TextSnapshot::new(body);
            let snapshot = inner.snapshot.clone();

            let waiters: Vec<_> = inner.waiters.drain(..).collect();
            let flushed = waiters.len();
            for tx in waiters {
                // A waiter whose connection already closed just drops the rx.
                let _ = tx.send(snapshot.clone());
            }
            (snapshot, flushed)
        };

        log::info!("Sending new text to {flushed} listeners");
        Ok(snapshot)
    }

    /// Current snapshot of the buffer.
    pub async fn snapshot(&self) -> TextSnapshot {
        self.inner.read().await.snapshot.clone()
    }

    /// Number of parked waiters.
    pub async fn waiter_count(&self) -> usize {
        self.inner.read().await.waiters.len()
    }

    /// Whether a session holds an unexpired writer lock.
    pub async fn writer(&self) -> Option<Uuid> {
        let inner = self.inner.read().await;
        Self::active_writer(&inner, self.lock_countdown)
    }
}
