//! Presence counting for huddle.
//!
//! A user is online while at least one of their connections is open. The
//! counter tracks how many presence slots each user holds and reports the
//! edge transitions (offline to online, online to offline) so the caller can
//! decide what to broadcast. It performs no I/O.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_protocol::UserId;
use tracing::{debug, warn};

/// Reference-counted presence per user.
///
/// Zero is never stored: a user with no slots has no entry.
#[derive(Debug, Default)]
pub struct PresenceCounter {
    counts: DashMap<UserId, usize>,
}

impl PresenceCounter {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one slot for `user`.
    ///
    /// Returns `true` if the user just came online (0 to 1).
    pub fn increment(&self, user: &str) -> bool {
        let mut count = self.counts.entry(user.to_owned()).or_insert(0);
        *count += 1;

        debug!(user = %user, count = *count, "Presence: slot acquired");
        *count == 1
    }

    /// Remove one slot for `user`.
    ///
    /// Returns `true` if the user just went offline.
    pub fn decrement(&self, user: &str) -> bool {
        self.release(user, 1)
    }

    /// Remove `slots` slots for `user` at once.
    ///
    /// Returns `true` if the user just went offline. Releasing more slots than
    /// are held removes the entry; it never leaves a zero or negative count.
    pub fn release(&self, user: &str, slots: usize) -> bool {
        match self.counts.entry(user.to_owned()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= slots {
                    entry.remove();
                    debug!(user = %user, "Presence: last slot released");
                    true
                } else {
                    *entry.get_mut() -= slots;
                    debug!(user = %user, count = *entry.get(), "Presence: slot released");
                    false
                }
            }
            Entry::Vacant(_) => {
                warn!(user = %user, slots, "Presence: release for user with no slots");
                true
            }
        }
    }

    /// Number of slots held by `user`.
    #[must_use]
    pub fn count(&self, user: &str) -> usize {
        self.counts.get(user).map(|c| *c).unwrap_or(0)
    }

    /// Whether `user` holds at least one slot.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.counts.contains_key(user)
    }

    /// All users currently online, in no particular order.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.counts.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of users currently online.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
