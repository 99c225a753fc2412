//! Best-effort broadcast to open connections.

use crate::connection::ConnectionId;
use crate::registry::Registry;
use huddle_protocol::Encoded;
use tracing::trace;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients whose outbox accepted the event.
    pub delivered: usize,
    /// Recipients whose outbox rejected the event.
    pub dropped: usize,
}

impl FanoutReport {
    /// Total recipients attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped
    }
}

/// Deliver `event` to every registered connection except `exclude`.
///
/// A failed delivery is counted and skipped; it never stops delivery to the
/// remaining recipients. No registry lock is held while delivering.
pub fn broadcast(registry: &Registry, event: &Encoded, exclude: Option<ConnectionId>) -> FanoutReport {
    let mut report = FanoutReport::default();

    for (connection, outbox) in registry.all_connections_except(exclude) {
        match outbox.deliver(event) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.dropped += 1;
                trace!(connection = %connection, error = %e, "Delivery dropped");
            }
        }
    }

    trace!(
        delivered = report.delivered,
        dropped = report.dropped,
        bytes = event.len(),
        "Broadcast"
    );
    report
}
