//! Name entries and queued-waiter records.
//!
//! Entries and waiters are stored in arenas keyed by stable ids and cross-
//! linked by id, never by pointer: an entry holds the ordered ids of its
//! waiters, a waiter holds the id of its entry, and each connection holds
//! the ids of the entries it owns and the waits it has queued. Unlinking
//! any record is O(length of the short list it sits in).
//!
//! All mutation happens in `registry.rs` under the registry lock; this
//! module only defines the data.

use std::sync::Arc;

use smallvec::SmallVec;

use fbus_bus::Connection;
use fbus_types::{EntryId, NameFlags, WaiterId};

/// The registry record for one currently-owned name.
pub(crate) struct NameEntry {
    /// The owned name (immutable after creation).
    pub name: Box<str>,
    /// The connection currently holding the name. Holds one `Arc` reference.
    pub owner: Arc<Connection>,
    /// Current acquisition flags.
    pub flags: NameFlags,
    /// Fallback owner: while set, the entry outlives transient owners and is
    /// handed back on release. Holds one `Arc` reference.
    pub activator: Option<Arc<Connection>>,
    /// FIFO takeover queue; the head is next in line.
    pub waiters: SmallVec<[WaiterId; 4]>,
}

impl NameEntry {
    /// Whether the entry may be dropped once unindexed.
    pub fn is_freeable(&self) -> bool {
        self.waiters.is_empty() && self.activator.is_none()
    }
}

impl std::fmt::Debug for NameEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameEntry")
            .field("name", &self.name)
            .field("owner", &self.owner.id())
            .field("flags", &self.flags)
            .field("activator", &self.activator.as_ref().map(|a| a.id()))
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// One queued request to take a name over once the current owner releases.
///
/// `flags` are stored with `IN_QUEUE` cleared; the bit exists only in the
/// status reported back to the queued caller.
pub(crate) struct Waiter {
    pub conn: Arc<Connection>,
    pub flags: NameFlags,
    /// The entry this waiter is queued on.
    pub entry: EntryId,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("conn", &self.conn.id())
            .field("flags", &self.flags)
            .field("entry", &self.entry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbus_bus::Bus;
    use fbus_types::ConnectionFlags;

    #[test]
    fn freeable_only_without_waiters_and_activator() {
        let bus = Bus::new("test");
        let owner = bus.connect(ConnectionFlags::empty());
        let fallback = bus.connect(ConnectionFlags::ACTIVATOR);

        let mut entry = NameEntry {
            name: "a.b".into(),
            owner,
            flags: NameFlags::empty(),
            activator: None,
            waiters: SmallVec::new(),
        };
        assert!(entry.is_freeable());

        entry.waiters.push(WaiterId(1));
        assert!(!entry.is_freeable());
        entry.waiters.clear();

        entry.activator = Some(fallback);
        assert!(!entry.is_freeable());
    }
}
