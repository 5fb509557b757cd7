//! Subscription tracking: topic keys, de-duplication, ack signals, replay.
//!
//! The registry is append-only: there is no unsubscribe op on the wire, so
//! entries live for the lifetime of the client and are replayed verbatim
//! after every reconnect.

use tokio::sync::oneshot;

use crate::error::WsError;
use crate::message::MessageOut;

/// Topic key for a routable stream: `channel` alone, or `market::channel`.
///
/// Used both as the registry's de-duplication key and as the listener
/// routing key.
pub fn topic_key(channel: &str, market: Option<&str>) -> String {
    match market {
        Some(market) => format!("{market}::{channel}"),
        None => channel.to_string(),
    }
}

/// Caller-side handle resolved when the venue acknowledges a subscription.
///
/// Created once at registration and never recreated: after a reconnect the
/// replayed subscription's ack resolves this same handle if it is still
/// pending.
#[derive(Debug)]
pub struct SubscriptionAck {
    rx: oneshot::Receiver<()>,
}

impl SubscriptionAck {
    /// Wait for the venue's `subscribed` ack.
    pub async fn acknowledged(self) -> Result<(), WsError> {
        self.rx.await.map_err(|_| WsError::NotConnected)
    }
}

struct Entry {
    market: Option<String>,
    channel: String,
    // Taken on first ack; later acks for the same pair are no-ops.
    ack: Option<oneshot::Sender<()>>,
}

/// Ordered set of tracked subscriptions, keyed by `(market, channel)`.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Vec<Entry>,
}

impl SubscriptionRegistry {
    /// Track a new `(market, channel)` pair. Returns `None` if the pair is
    /// already registered.
    pub fn register(&mut self, channel: &str, market: Option<&str>) -> Option<SubscriptionAck> {
        let exists = self
            .entries
            .iter()
            .any(|e| e.channel == channel && e.market.as_deref() == market);
        if exists {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        self.entries.push(Entry {
            market: market.map(Into::into),
            channel: channel.to_string(),
            ack: Some(tx),
        });
        Some(SubscriptionAck { rx })
    }

    /// Resolve the pending ack of every entry matching the pair. Returns
    /// whether any entry matched.
    pub fn acknowledge(&mut self, channel: &str, market: Option<&str>) -> bool {
        let mut matched = false;
        for entry in &mut self.entries {
            if entry.channel == channel && entry.market.as_deref() == market {
                matched = true;
                if let Some(tx) = entry.ack.take() {
                    let _ = tx.send(());
                }
            }
        }
        matched
    }

    /// Subscribe ops for every tracked entry, in registration order.
    pub fn replay_messages(&self) -> Vec<MessageOut> {
        self.entries
            .iter()
            .map(|e| MessageOut::subscribe(e.channel.clone(), e.market.as_deref()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
