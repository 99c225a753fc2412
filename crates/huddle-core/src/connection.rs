//! Connection identity and the outbound delivery seam.

use huddle_protocol::{Encoded, UserId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Process-wide connection counter.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a fresh identifier. Never returns the same value twice in a
    /// process.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a delivery to one connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's outbound buffer is full.
    #[error("Outbound buffer full")]
    Full,

    /// The connection's writer has gone away.
    #[error("Connection closed")]
    Closed,
}

/// Per-connection send handle used by broadcast fan-out.
///
/// Implementations must not block: a slow peer may lose events, but it must
/// never hold up delivery to other peers.
pub trait Outbox: Send + Sync {
    /// Queue an event for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be queued.
    fn deliver(&self, event: &Encoded) -> Result<(), DeliveryError>;
}

impl Outbox for mpsc::Sender<Encoded> {
    fn deliver(&self, event: &Encoded) -> Result<(), DeliveryError> {
        self.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl Outbox for mpsc::UnboundedSender<Encoded> {
    fn deliver(&self, event: &Encoded) -> Result<(), DeliveryError> {
        self.send(event.clone()).map_err(|_| DeliveryError::Closed)
    }
}

/// Protocol state of an open connection.
///
/// A closed connection has no state; it is simply absent from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened, no `init` received yet.
    Unidentified,
    /// Bound to a user.
    Identified(UserId),
}

impl ConnectionState {
    /// The bound user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            ConnectionState::Unidentified => None,
            ConnectionState::Identified(user) => Some(user),
        }
    }

    /// Whether the connection has been identified.
    #[must_use]
    pub fn is_identified(&self) -> bool {
        matches!(self, ConnectionState::Identified(_))
    }
}

/// How a connection ended. Cleanup is identical for every reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection or the stream ended.
    Closed,
    /// The transport reported an error.
    Error,
    /// No frames arrived within the heartbeat timeout.
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::Closed => "closed",
            CloseReason::Error => "error",
            CloseReason::Timeout => "timeout",
        })
    }
}
