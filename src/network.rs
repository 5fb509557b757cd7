//! Network URL constants.

/// Default venue WebSocket URL.
pub const DEFAULT_WS_URL: &str = "wss://ftx.com/ws/";
