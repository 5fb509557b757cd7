//! # ftx-ws
//!
//! Resilient WebSocket client for the FTX exchange.
//!
//! One persistent duplex connection per client, kept alive by an
//! application-level ping/pong heartbeat and reconnected transparently with
//! a fixed backoff after any transport loss. Subscriptions survive
//! reconnects: the registry replays every tracked `(market, channel)` pair,
//! in registration order, before sends queued during the outage resume.
//! Private sessions log in with an HMAC-SHA256 signed timestamp on every
//! (re)connect.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ftx_ws::{WsClient, WsConfig};
//!
//! let mut client = WsClient::new(WsConfig::default());
//! client.connect().await?;
//!
//! let mut ticker = client.listen("ticker", Some("BTC-PERP"));
//! client.subscribe("ticker", Some("BTC-PERP")).await?;
//!
//! while let Some(data) = ticker.recv().await {
//!     println!("{data}");
//! }
//! ```

// ── Leaves ───────────────────────────────────────────────────────────────────

/// Client error types.
pub mod error;

/// Network URL constants.
pub mod network;

/// Login credential derivation (HMAC-SHA256 signed timestamp).
pub mod auth;

/// Wire-level message types.
pub mod message;

// ── Connection internals ─────────────────────────────────────────────────────

/// Subscription tracking: topic keys, dedup, ack signals, replay.
pub mod subscriptions;

mod liveness;
mod router;

// ── Lifecycle manager ────────────────────────────────────────────────────────

/// `WsClient`, the connection lifecycle manager.
pub mod client;

pub use auth::Credentials;
pub use client::{ReadyState, StatusEvent, WsClient, WsConfig};
pub use error::WsError;
pub use message::{MessageIn, MessageOut};
pub use network::DEFAULT_WS_URL;
pub use subscriptions::{topic_key, SubscriptionAck};
