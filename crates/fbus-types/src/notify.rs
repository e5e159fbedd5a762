//! Name-change notification events and the per-operation event log.
//!
//! The registry appends events while holding its lock; the caller hands the
//! filled [`NotifyLog`] to the bus's broadcast facility only after the lock
//! is dropped. Delivery may allocate and touch other connections, so keeping
//! it outside the registry lock is what prevents lock inversion.

use crate::flags::NameFlags;
use crate::ConnectionId;

/// What happened to a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NameEventKind {
    /// A new entry was indexed.
    Add,
    /// Ownership moved: takeover, waiter promotion, or activator rebind.
    Change,
    /// The entry was unindexed and freed.
    Remove,
}

/// One ownership-change record.
///
/// On the wire an absent peer is encoded as id 0: `Add` carries no old
/// owner, `Remove` no new owner.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NameEvent {
    pub kind: NameEventKind,
    pub old_owner: Option<ConnectionId>,
    pub new_owner: Option<ConnectionId>,
    pub flags: NameFlags,
    pub name: String,
}

impl NameEvent {
    /// Wire encoding of the old owner (0 when absent).
    #[must_use]
    pub fn old_owner_raw(&self) -> u64 {
        self.old_owner.map_or(0, ConnectionId::get)
    }

    /// Wire encoding of the new owner (0 when absent).
    #[must_use]
    pub fn new_owner_raw(&self) -> u64 {
        self.new_owner.map_or(0, ConnectionId::get)
    }
}

/// Ordered append-only buffer of pending [`NameEvent`]s.
///
/// One log instance accompanies one registry operation; the emission order
/// within the log matches the mutation order under the registry lock.
#[derive(Debug, Default)]
pub struct NotifyLog {
    events: Vec<NameEvent>,
}

impl NotifyLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an `Add` event.
    pub fn push_add(&mut self, new_owner: ConnectionId, flags: NameFlags, name: &str) {
        self.events.push(NameEvent {
            kind: NameEventKind::Add,
            old_owner: None,
            new_owner: Some(new_owner),
            flags,
            name: name.to_owned(),
        });
    }

    /// Append a `Change` event.
    pub fn push_change(
        &mut self,
        old_owner: ConnectionId,
        new_owner: ConnectionId,
        flags: NameFlags,
        name: &str,
    ) {
        self.events.push(NameEvent {
            kind: NameEventKind::Change,
            old_owner: Some(old_owner),
            new_owner: Some(new_owner),
            flags,
            name: name.to_owned(),
        });
    }

    /// Append a `Remove` event.
    pub fn push_remove(&mut self, old_owner: ConnectionId, flags: NameFlags, name: &str) {
        self.events.push(NameEvent {
            kind: NameEventKind::Remove,
            old_owner: Some(old_owner),
            new_owner: None,
            flags,
            name: name.to_owned(),
        });
    }

    /// Drop everything appended so far (failure paths must not leak events).
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// View the pending events without consuming them.
    #[must_use]
    pub fn events(&self) -> &[NameEvent] {
        &self.events
    }

    /// Take the pending events, leaving the log empty.
    pub fn drain(&mut self) -> Vec<NameEvent> {
        std::mem::take(&mut self.events)
    }
}
