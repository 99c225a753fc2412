//! Connection registry.
//!
//! Maps every open connection to its outbox and, once identified, to the user
//! it represents. Presence slots are acquired and released while the
//! connection's entry is held, so a racing close and identify on the same
//! connection cannot leave the counter out of step with the registry.

use crate::connection::{ConnectionId, ConnectionState, Outbox};
use crate::presence::PresenceCounter;
use dashmap::DashMap;
use huddle_protocol::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What a repeated `init` with the already-bound user id does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatIdentify {
    /// Every `init` acquires one more presence slot. All slots are released
    /// together when the connection closes or is re-bound.
    #[default]
    AddSlot,
    /// A repeated `init` for the bound user is a no-op.
    Ignore,
}

/// Slots given up by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    /// The user the slots belonged to.
    pub user: UserId,
    /// How many slots were released.
    pub slots: usize,
    /// Whether the user has no slots left.
    pub went_offline: bool,
}

/// Result of binding a connection to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    /// The user now bound to the connection.
    pub user: UserId,
    /// Whether this bind took the user from offline to online.
    pub came_online: bool,
    /// Whether a presence slot was acquired.
    pub slot_added: bool,
    /// Slots released from a previously bound, different user.
    pub released: Option<Released>,
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    /// Slots released from the bound user, if the connection was identified.
    pub released: Option<Released>,
}

struct Entry {
    user: Option<UserId>,
    slots: usize,
    outbox: Arc<dyn Outbox>,
}

/// Registry of open connections.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<ConnectionId, Entry>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection in the unidentified state.
    pub fn register(&self, outbox: Arc<dyn Outbox>) -> ConnectionId {
        let id = ConnectionId::generate();
        self.entries.insert(
            id,
            Entry {
                user: None,
                slots: 0,
                outbox,
            },
        );
        debug!(connection = %id, connections = self.entries.len(), "Registered");
        id
    }

    /// Bind `conn` to `user`, moving presence slots as needed.
    ///
    /// If the connection was bound to a different user, all of that user's
    /// slots held by this connection are released first. Returns `None` if
    /// the connection is not registered.
    pub fn identify(
        &self,
        conn: ConnectionId,
        user: &str,
        presence: &PresenceCounter,
        repeat: RepeatIdentify,
    ) -> Option<Identified> {
        let mut entry = self.entries.get_mut(&conn)?;
        let bound = entry.user.clone();
        let mut released = None;

        match bound {
            Some(current) if current == user => {
                if repeat == RepeatIdentify::Ignore {
                    return Some(Identified {
                        user: current,
                        came_online: false,
                        slot_added: false,
                        released: None,
                    });
                }
            }
            Some(previous) => {
                let slots = entry.slots;
                let went_offline = presence.release(&previous, slots);
                entry.user = None;
                entry.slots = 0;
                released = Some(Released {
                    user: previous,
                    slots,
                    went_offline,
                });
            }
            None => {}
        }

        let came_online = presence.increment(user);
        entry.user = Some(user.to_owned());
        entry.slots += 1;

        Some(Identified {
            user: user.to_owned(),
            came_online,
            slot_added: true,
            released,
        })
    }

    /// Remove `conn`, releasing its presence slots.
    ///
    /// Returns `None` if the connection was already removed, so a second
    /// cleanup for the same connection changes nothing.
    pub fn unregister(&self, conn: ConnectionId, presence: &PresenceCounter) -> Option<Unregistered> {
        let (_, Entry { user, slots, .. }) = self.entries.remove(&conn)?;

        let released = user.map(|user| {
            let went_offline = presence.release(&user, slots);
            Released {
                user,
                slots,
                went_offline,
            }
        });

        debug!(connection = %conn, connections = self.entries.len(), "Unregistered");
        Some(Unregistered { released })
    }

    /// Snapshot of every open connection except `exclude`.
    ///
    /// Order is unspecified.
    #[must_use]
    pub fn all_connections_except(
        &self,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, Arc<dyn Outbox>)> {
        self.entries
            .iter()
            .filter(|e| Some(*e.key()) != exclude)
            .map(|e| (*e.key(), Arc::clone(&e.value().outbox)))
            .collect()
    }

    /// Protocol state of `conn`, or `None` if it is closed.
    #[must_use]
    pub fn state(&self, conn: ConnectionId) -> Option<ConnectionState> {
        self.entries.get(&conn).map(|e| match &e.user {
            Some(user) => ConnectionState::Identified(user.clone()),
            None => ConnectionState::Unidentified,
        })
    }

    /// Whether `conn` is open.
    #[must_use]
    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.entries.contains_key(&conn)
    }

    /// Number of open connections bound to `user`.
    #[must_use]
    pub fn connections_of(&self, user: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.user.as_deref() == Some(user))
            .count()
    }

    /// Presence slots held for `user` across all open connections.
    #[must_use]
    pub fn slots_of(&self, user: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.user.as_deref() == Some(user))
            .map(|e| e.slots)
            .sum()
    }

    /// Number of open connections that have been identified.
    #[must_use]
    pub fn identified_count(&self) -> usize {
        self.entries.iter().filter(|e| e.user.is_some()).count()
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no open connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::Encoded;
    use tokio::sync::mpsc;

    fn outbox() -> Arc<dyn Outbox> {
        let (tx, _rx) = mpsc::unbounded_channel::<Encoded>();
        Arc::new(tx)
    }

    #[test]
    fn test_register_starts_unidentified() {
        let registry = Registry::new();
        let conn = registry.register(outbox());

        assert_eq!(registry.state(conn), Some(ConnectionState::Unidentified));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.identified_count(), 0);
    }

    #[test]
    fn test_identify_binds_and_counts() {
        let registry = Registry::new();
        let presence = PresenceCounter::new();
        let conn = registry.register(outbox());

        let identified = registry
            .identify(conn, "u1", &presence, RepeatIdentify::AddSlot)
            .unwrap();
        assert!(identified.came_online);
        assert!(identified.released.is_none());
        assert_eq!(
            registry.state(conn),
            Some(ConnectionState::Identified("u1".into()))
        );
        assert_eq!(presence.count("u1"), 1);
    }

    #[test]
    fn test_reidentify_moves_slots_to_new_user() {
        let registry = Registry::new();
        let presence = PresenceCounter::new();
        let conn = registry.register(outbox());
        let other = registry.register(outbox());

        registry.identify(conn, "a", &presence, RepeatIdentify::AddSlot);
        registry.identify(other, "a", &presence, RepeatIdentify::AddSlot);
        assert_eq!(presence.count("a"), 2);

        let identified = registry
            .identify(conn, "b", &presence, RepeatIdentify::AddSlot)
            .unwrap();
        assert_eq!(
            identified.released,
            Some(Released {
                user: "a".into(),
                slots: 1,
                went_offline: false,
            })
        );
        assert!(identified.came_online);
        assert_eq!(presence.count("a"), 1);
        assert_eq!(presence.count("b"), 1);
    }

    #[test]
    fn test_repeat_identify_policies() {
        let registry = Registry::new();
        let presence = PresenceCounter::new();
        let conn = registry.register(outbox());

        registry.identify(conn, "u1", &presence, RepeatIdentify::AddSlot);
        let again = registry
            .identify(conn, "u1", &presence, RepeatIdentify::AddSlot)
            .unwrap();
        assert!(again.slot_added);
        assert!(!again.came_online);
        assert_eq!(presence.count("u1"), 2);
        assert_eq!(registry.slots_of("u1"), 2);

        let ignored = registry
            .identify(conn, "u1", &presence, RepeatIdentify::Ignore)
            .unwrap();
        assert!(!ignored.slot_added);
        assert_eq!(presence.count("u1"), 2);

        // Every slot this connection holds goes away with it.
        let gone = registry.unregister(conn, &presence).unwrap();
        assert_eq!(gone.released.map(|r| (r.slots, r.went_offline)), Some((2, true)));
        assert!(!presence.is_online("u1"));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        let presence = PresenceCounter::new();
        let a = registry.register(outbox());
        let b = registry.register(outbox());
        registry.identify(a, "u1", &presence, RepeatIdentify::AddSlot);
        registry.identify(b, "u1", &presence, RepeatIdentify::AddSlot);

        assert!(registry.unregister(a, &presence).is_some());
        assert!(registry.unregister(a, &presence).is_none());
        assert_eq!(presence.count("u1"), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identify_after_close_is_ignored() {
        let registry = Registry::new();
        let presence = PresenceCounter::new();
        let conn = registry.register(outbox());
        registry.unregister(conn, &presence);

        assert!(registry
            .identify(conn, "u1", &presence, RepeatIdentify::AddSlot)
            .is_none());
        assert!(!presence.is_online("u1"));
    }

    #[test]
    fn test_all_connections_except() {
        let registry = Registry::new();
        let ids: Vec<_> = (0..4).map(|_| registry.register(outbox())).collect();

        let all = registry.all_connections_except(None);
        assert_eq!(all.len(), 4);

        let rest: Vec<_> = registry
            .all_connections_except(Some(ids[2]))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(rest.len(), 3);
        assert!(!rest.contains(&ids[2]));
    }
}
