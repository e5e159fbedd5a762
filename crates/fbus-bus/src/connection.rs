//! Bus connections.
//!
//! A [`Connection`] is shared (`Arc`) between the bus, the name registry,
//! and user code. The registry stores its per-connection state here as
//! non-owning handles behind the connection's own lock: the entries a
//! connection owns and the waiter records it has queued. The connection
//! itself never interprets those handles.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use fbus_error::Result;
use fbus_types::{ConnectionFlags, ConnectionId, EntryId, NameEvent, WaiterId};

use crate::pool::ReceivePool;

/// Registry-owned anchors, guarded by the connection lock.
///
/// `owned.len()` is the owner accounting the registry's quota check reads;
/// the registry keeps it equal to the number of entries whose owner is this
/// connection at every registry unlock.
#[derive(Debug, Default)]
pub struct NameAnchors {
    pub owned: Vec<EntryId>,
    pub queued: Vec<WaiterId>,
}

impl NameAnchors {
    pub fn add_owned(&mut self, entry: EntryId) {
        debug_assert!(!self.owned.contains(&entry));
        self.owned.push(entry);
    }

    pub fn remove_owned(&mut self, entry: EntryId) {
        if let Some(pos) = self.owned.iter().position(|e| *e == entry) {
            self.owned.swap_remove(pos);
        }
    }

    pub fn add_queued(&mut self, waiter: WaiterId) {
        debug_assert!(!self.queued.contains(&waiter));
        self.queued.push(waiter);
    }

    pub fn remove_queued(&mut self, waiter: WaiterId) {
        if let Some(pos) = self.queued.iter().position(|w| *w == waiter) {
            self.queued.swap_remove(pos);
        }
    }
}

/// One client of the bus.
pub struct Connection {
    id: ConnectionId,
    flags: ConnectionFlags,
    names: Mutex<NameAnchors>,
    pool: Mutex<ReceivePool>,
    events: Mutex<VecDeque<NameEvent>>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, flags: ConnectionFlags, pool_capacity: usize) -> Self {
        Self {
            id,
            flags,
            names: Mutex::new(NameAnchors::default()),
            pool: Mutex::new(ReceivePool::new(pool_capacity)),
            events: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn flags(&self) -> ConnectionFlags {
        self.flags
    }

    #[must_use]
    pub fn is_activator(&self) -> bool {
        self.flags.contains(ConnectionFlags::ACTIVATOR)
    }

    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.flags.contains(ConnectionFlags::PRIVILEGED)
    }

    /// Lock the name anchors (the connection lock).
    ///
    /// Lock order: the registry lock, if held, is acquired first; the bus
    /// lock is never held around this.
    pub fn names(&self) -> MutexGuard<'_, NameAnchors> {
        self.names.lock()
    }

    /// Number of names this connection currently owns.
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.names.lock().owned.len()
    }

    /// Splice both anchor lists out, leaving them empty.
    ///
    /// Eviction uses this to drain the connection's registry state under the
    /// connection lock alone, before the registry lock is taken.
    pub fn drain_anchors(&self) -> (Vec<EntryId>, Vec<WaiterId>) {
        let mut anchors = self.names.lock();
        (
            std::mem::take(&mut anchors.owned),
            std::mem::take(&mut anchors.queued),
        )
    }

    /// Lock the receive pool.
    pub fn pool(&self) -> MutexGuard<'_, ReceivePool> {
        self.pool.lock()
    }

    /// Park a message from `sender` in this connection's pool.
    pub fn enqueue_message(&self, sender: ConnectionId, payload: &[u8]) -> Result<()> {
        self.pool.lock().enqueue_message(sender, payload)
    }

    /// Move every message queued at `src` into this connection's pool.
    ///
    /// Fails without side effects if this pool cannot hold them all. The two
    /// pool locks are taken in ascending connection-id order so concurrent
    /// migrations cannot deadlock.
    pub fn adopt_messages_from(&self, src: &Arc<Connection>) -> Result<usize> {
        assert!(self.id != src.id, "cannot migrate messages to self");
        let (mut dst_guard, mut src_guard);
        if self.id < src.id {
            dst_guard = self.pool.lock();
            src_guard = src.pool.lock();
        } else {
            src_guard = src.pool.lock();
            dst_guard = self.pool.lock();
        }

        let moved = ReceivePool::move_messages(&mut dst_guard, &mut src_guard)?;
        if moved > 0 {
            tracing::debug!(dst = %self.id, src = %src.id, moved, "migrated queued messages");
        }
        Ok(moved)
    }

    /// Deliver a name-change event into this connection's inbox.
    pub fn push_event(&self, event: NameEvent) {
        self.events.lock().push_back(event);
    }

    /// Take all pending events, oldest first.
    pub fn drain_events(&self) -> Vec<NameEvent> {
        self.events.lock().drain(..).collect()
    }

    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
