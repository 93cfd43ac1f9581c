//! # quill-collab — long-polled shared text pad
//!
//! One server-held text buffer, long-polled over plain HTTP by every
//! connected client, updated by fire-and-forget POSTs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  POST /a/text/listen  ┌─────────────┐
//! │ PadClient   │ ─────────────────────► │ PadServer   │
//! │ (poll loop) │ ◄───────────────────── │ (axum)      │
//! └──────┬──────┘   JSON {body, sig}     └──────┬──────┘
//!        │                                      │
//!        │  POST /a/text/update                 ▼
//!        └────────────────────────────►  ┌─────────────┐
//!               (fire-and-forget)        │ Board       │
//!                                        │ buffer +    │
//!                                        │ waiters     │
//!                                        └─────────────┘
//! ```
//!
//! The server holds each listen request open until the buffer's signature
//! differs from the one the caller last saw, then answers everyone at
//! once. Clients re-poll immediately after every success and back off
//! exponentially (without cap) after any failure, including a malformed
//! payload.
//!
//! ## Modules
//!
//! - [`protocol`] — wire types (`TextSnapshot`, form bodies, signature)
//! - [`client`] — poll loop with backoff + edit submission
//! - [`board`] — shared buffer, parked waiters, writer lock
//! - [`server`] — axum routes with XSRF enforcement

pub mod protocol;
pub mod client;
pub mod board;
pub mod server;

// Re-exports for convenience
pub use protocol::{
    signature, ListenForm, ProtocolError, TextSnapshot, UpdateForm, SESSION_COOKIE, XSRF_COOKIE,
};
pub use client::{Backoff, PadClient, PadEvent, BACKOFF_FLOOR, LISTEN_PATH, UPDATE_PATH};
pub use board::{Board, BoardError, Delivery, LOCK_COUNTDOWN};
pub use server::{PadServer, ServerConfig, ServerStats};
