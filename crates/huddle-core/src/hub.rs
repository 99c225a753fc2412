//! The realtime messaging hub.
//!
//! The hub owns the per-connection protocol state machine:
//!
//! ```text
//!   connect ──▶ Unidentified ──init(u)──▶ Identified(u) ──init(v)──▶ Identified(v)
//!                    │                          │
//!                    └──── close / error ───────┴──▶ (removed)
//! ```
//!
//! Inbound payloads are decoded and either bind the connection to a user or
//! are relayed verbatim to every other connection. Presence transitions
//! reported by the counter are turned into `presence` broadcasts, queued
//! before the next transition may start. Nothing in
//! here is fatal: a bad payload is dropped and a failing recipient is skipped.

use crate::connection::{CloseReason, ConnectionId, ConnectionState, Outbox};
use crate::fanout::{self, FanoutReport};
use crate::presence::PresenceCounter;
use crate::registry::{Identified, Registry, RepeatIdentify, Unregistered};
use huddle_protocol::{codec, ClientEvent, Encoded, ProtocolError, RelayKind, ServerEvent, UserId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// What a repeated `init` for the already-bound user does.
    pub repeat_identify: RepeatIdentify,
    /// Inbound payloads larger than this are dropped.
    pub max_event_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            repeat_identify: RepeatIdentify::default(),
            max_event_size: codec::MAX_EVENT_SIZE,
        }
    }
}

/// Why an inbound payload was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The payload exceeded the configured size limit.
    TooLarge,
    /// Not JSON, not an object, or a required field is missing.
    Malformed,
    /// The `type` field names an event the hub does not handle.
    UnknownType(String),
    /// The connection is no longer registered.
    UnknownConnection,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::TooLarge => "too_large",
            DropReason::Malformed => "malformed",
            DropReason::UnknownType(_) => "unknown_type",
            DropReason::UnknownConnection => "unknown_connection",
        }
    }
}

impl From<&ProtocolError> for DropReason {
    fn from(e: &ProtocolError) -> Self {
        match e {
            ProtocolError::EventTooLarge(..) => DropReason::TooLarge,
            ProtocolError::UnknownType(t) => DropReason::UnknownType(t.clone()),
            ProtocolError::Json(_) | ProtocolError::NotAnObject | ProtocolError::MissingField(_) => {
                DropReason::Malformed
            }
        }
    }
}

/// What the hub did with one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// An `init` bound the connection to a user.
    Identified(Identified),
    /// A relay event was fanned out to the other connections.
    Relayed {
        /// The relayed event type.
        kind: RelayKind,
        /// Delivery outcome.
        report: FanoutReport,
    },
    /// The payload was ignored.
    Dropped(DropReason),
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Open connections.
    pub connections: usize,
    /// Open connections bound to a user.
    pub identified_connections: usize,
    /// Users with at least one presence slot.
    pub online_users: usize,
}

/// The realtime hub: connection registry, presence and fan-out.
///
/// Construct one per server and share it behind an `Arc`.
pub struct Hub {
    registry: Registry,
    presence: PresenceCounter,
    config: HubConfig,
    /// Held from a presence change until its broadcast has been queued, so
    /// every peer observes one user's edges in the order they happened.
    transitions: Mutex<()>,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            registry: Registry::new(),
            presence: PresenceCounter::new(),
            config,
            transitions: Mutex::new(()),
        }
    }

    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a newly opened connection. It starts unidentified.
    pub fn connect(&self, outbox: impl Outbox + 'static) -> ConnectionId {
        self.registry.register(Arc::new(outbox))
    }

    /// Decode and dispatch one inbound payload from `conn`.
    pub fn handle_text(&self, conn: ConnectionId, data: &[u8]) -> Dispatch {
        if !self.registry.contains(conn) {
            return Dispatch::Dropped(DropReason::UnknownConnection);
        }

        let event = match codec::decode_with_limit(data, self.config.max_event_size) {
            Ok(event) => event,
            Err(e) => {
                debug!(connection = %conn, error = %e, "Dropping inbound event");
                return Dispatch::Dropped(DropReason::from(&e));
            }
        };

        trace!(connection = %conn, event = event.event_type(), "Inbound event");

        match event {
            ClientEvent::Init { user_id } => match self.identify(conn, &user_id) {
                Some(identified) => Dispatch::Identified(identified),
                None => Dispatch::Dropped(DropReason::UnknownConnection),
            },
            ClientEvent::Relay { kind, payload } => match codec::encode_relay(&payload) {
                Ok(encoded) => {
                    let report = self.broadcast(&encoded, Some(conn));
                    debug!(
                        connection = %conn,
                        kind = %kind,
                        recipients = report.delivered,
                        "Relayed"
                    );
                    Dispatch::Relayed { kind, report }
                }
                Err(e) => {
                    warn!(connection = %conn, error = %e, "Failed to re-encode relay event");
                    Dispatch::Dropped(DropReason::Malformed)
                }
            },
        }
    }

    /// Bind `conn` to `user_id`.
    ///
    /// Broadcasts `presence` offline for a previously bound user that lost its
    /// last slot, and `presence` online (to everyone but `conn`) if `user_id`
    /// just came online. Returns `None` if the connection is closed.
    pub fn identify(&self, conn: ConnectionId, user_id: &str) -> Option<Identified> {
        let _transition = self.lock_transitions();
        let identified =
            self.registry
                .identify(conn, user_id, &self.presence, self.config.repeat_identify)?;

        if let Some(released) = &identified.released {
            debug!(
                connection = %conn,
                from = %released.user,
                to = %user_id,
                "Connection re-identified"
            );
            if released.went_offline {
                self.announce(&released.user, false, None);
            }
        }

        if identified.came_online {
            self.announce(user_id, true, Some(conn));
        }

        debug!(
            connection = %conn,
            user = %user_id,
            slots = self.presence.count(user_id),
            "Identified"
        );
        Some(identified)
    }

    /// Clean up after a closed or failed connection.
    ///
    /// Safe to call more than once: only the first call for a connection has
    /// any effect, later calls return `None`.
    pub fn disconnect(&self, conn: ConnectionId, reason: CloseReason) -> Option<Unregistered> {
        let _transition = self.lock_transitions();
        let Some(unregistered) = self.registry.unregister(conn, &self.presence) else {
            trace!(connection = %conn, reason = %reason, "Already cleaned up");
            return None;
        };

        debug!(connection = %conn, reason = %reason, "Disconnected");

        if let Some(released) = &unregistered.released {
            if released.went_offline {
                self.announce(&released.user, false, None);
            }
        }

        Some(unregistered)
    }

    /// Deliver a serialized event to every connection except `exclude`.
    pub fn broadcast(&self, event: &Encoded, exclude: Option<ConnectionId>) -> FanoutReport {
        fanout::broadcast(&self.registry, event, exclude)
    }

    fn announce(&self, user: &str, online: bool, exclude: Option<ConnectionId>) -> FanoutReport {
        info!(user = %user, online, "Presence changed");
        match codec::encode(&ServerEvent::presence(user, online)) {
            Ok(encoded) => self.broadcast(&encoded, exclude),
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to encode presence event");
                FanoutReport::default()
            }
        }
    }

    /// Number of presence slots held by `user`.
    #[must_use]
    pub fn presence_count(&self, user: &str) -> usize {
        self.presence.count(user)
    }

    /// Whether `user` has at least one open connection.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.presence.is_online(user)
    }

    /// All users currently online.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.online_users()
    }

    /// Protocol state of `conn`, or `None` once it has been cleaned up.
    #[must_use]
    pub fn connection_state(&self, conn: ConnectionId) -> Option<ConnectionState> {
        self.registry.state(conn)
    }

    /// Number of open connections bound to `user`.
    #[must_use]
    pub fn connections_of(&self, user: &str) -> usize {
        self.registry.connections_of(user)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            identified_connections: self.registry.identified_count(),
            online_users: self.presence.len(),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
