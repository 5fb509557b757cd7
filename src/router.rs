//! Message routing: per-topic listener registration and dispatch.
//!
//! Listeners are plain unbounded channels keyed by topic string. A listener
//! whose receiver was dropped is pruned on the next dispatch to its topic.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Default)]
pub(crate) struct Router {
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
}

impl Router {
    /// Register a listener for a topic key.
    pub fn listen(&mut self, topic: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.entry(topic.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver a data payload to every live listener on the topic. Returns
    /// the number of listeners reached.
    pub fn dispatch(&mut self, topic: &str, data: &Value) -> usize {
        let Some(senders) = self.listeners.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(data.clone()).is_ok());
        senders.len()
    }
}
