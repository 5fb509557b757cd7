//! Liveness bookkeeping: ping/pong timestamps and the staleness verdict.
//!
//! Staleness is only detected when a pong *did* arrive after the last ping
//! but took longer than the threshold. A pong that never arrives at all is
//! not flagged; the connection then limps along on unanswered pings.

use std::time::Duration;

use tokio::time::Instant;

pub(crate) struct Liveness {
    /// Window after a ping during which a pong is counted. Same as the ping
    /// period.
    pong_window: Duration,
    stale_after: Duration,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl Liveness {
    pub fn new(pong_window: Duration, stale_after: Duration) -> Self {
        Self {
            pong_window,
            stale_after,
            last_ping: None,
            last_pong: None,
        }
    }

    /// Record an inbound pong. Counted only within the pong window of the
    /// last ping; a pong with no recent ping is ignored.
    pub fn record_pong(&mut self) {
        if let Some(ping) = self.last_ping {
            if ping.elapsed() <= self.pong_window {
                self.last_pong = Some(Instant::now());
            }
        }
    }

    /// Periodic tick. Returns `true` if the connection is stale (late pong
    /// round-trip over the threshold); the caller must then tear the
    /// connection down. Otherwise records now as the last ping time; the
    /// caller sends a ping frame.
    pub fn tick(&mut self) -> bool {
        if let (Some(ping), Some(pong)) = (self.last_ping, self.last_pong) {
            if pong > ping && pong.duration_since(ping) > self.stale_after {
                return true;
            }
        }
        self.last_ping = Some(Instant::now());
        false
    }
}
