//! Shared fixtures for the huddle benchmarks.

use huddle_core::{ConnectionId, DeliveryError, Hub, Outbox};
use huddle_protocol::Encoded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An outbox that only counts what it is handed.
#[derive(Debug, Default, Clone)]
pub struct CountingOutbox {
    delivered: Arc<AtomicU64>,
}

impl CountingOutbox {
    /// Events delivered so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Outbox for CountingOutbox {
    fn deliver(&self, _event: &Encoded) -> Result<(), DeliveryError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A hub with `n` open connections sharing one counting outbox.
#[must_use]
pub fn hub_with_connections(n: usize) -> (Hub, Vec<ConnectionId>, CountingOutbox) {
    let hub = Hub::new();
    let outbox = CountingOutbox::default();
    let conns = (0..n).map(|_| hub.connect(outbox.clone())).collect();
    (hub, conns, outbox)
}

/// A serialized `typing` event as a client would send it.
#[must_use]
pub fn typing_event(user: &str, is_typing: bool) -> Vec<u8> {
    serde_json::json!({
        "type": "typing",
        "conversationId": "bench",
        "userId": user,
        "isTyping": is_typing,
    })
    .to_string()
    .into_bytes()
}

/// A serialized `init` event.
#[must_use]
pub fn init_event(user: &str) -> Vec<u8> {
    serde_json::json!({ "type": "init", "userId": user })
        .to_string()
        .into_bytes()
}
