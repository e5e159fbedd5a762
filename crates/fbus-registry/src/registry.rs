//! The name registry: ownership arbitration for well-known names.
//!
//! One registry exists per bus. All entry state is guarded by a single
//! registry-wide mutex; per-connection anchor lists are guarded by the
//! connection lock, which is only ever taken while the registry lock is
//! already held (eviction drains the anchors first, precisely so it never
//! needs the reverse order).
//!
//! Lock order: bus lock -> registry lock -> connection lock / pool lock.
//!
//! Operations append [`NameEvent`]s to a caller-provided [`NotifyLog`];
//! callers broadcast the log only after the registry lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info};

use fbus_bus::Connection;
use fbus_error::{BusError, Result};
use fbus_types::{ConnectionId, EntryId, NameFlags, NotifyLog, WaiterId};

use crate::entry::{NameEntry, Waiter};

/// Successful outcome of an acquire.
///
/// Non-fatal conditions are outcomes, not errors: a repeat acquire by the
/// owner reports [`AlreadyOwner`](Self::AlreadyOwner) and a queued caller
/// reports [`Queued`](Self::Queued); both leave the caller with a valid
/// standing on the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The caller is now the owner.
    Acquired,
    /// The caller was the owner already; the entry flags were replaced.
    AlreadyOwner,
    /// The caller was appended to (or already sat in) the takeover queue.
    Queued,
}

impl Acquisition {
    /// Whether the caller holds the name after this outcome.
    #[must_use]
    pub fn is_owner(self) -> bool {
        matches!(self, Self::Acquired | Self::AlreadyOwner)
    }

    /// Whether the caller is waiting in the takeover queue.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Point-in-time view of one entry, for lookups and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NameSnapshot {
    pub name: String,
    pub owner: ConnectionId,
    pub flags: NameFlags,
    pub activator: Option<ConnectionId>,
    /// Queued waiters, head (next in line) first.
    pub waiters: Vec<ConnectionId>,
}

// ---------------------------------------------------------------------------
// RegistryInner
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RegistryInner {
    /// Name -> entry handle. At most one entry per name.
    pub(crate) index: HashMap<Box<str>, EntryId>,
    /// Entry arena. Every entry in here is indexed.
    pub(crate) entries: HashMap<EntryId, NameEntry>,
    /// Waiter arena. Every waiter in here is linked on exactly one entry.
    pub(crate) waiters: HashMap<WaiterId, Waiter>,
    next_entry_id: u64,
    next_waiter_id: u64,
}

impl RegistryInner {
    fn alloc_entry_id(&mut self) -> EntryId {
        let id = EntryId(self.next_entry_id);
        self.next_entry_id += 1;
        id
    }

    /// Append `conn` to the entry's takeover queue and link the record into
    /// the connection's queued-waits anchor.
    fn queue_waiter(&mut self, eid: EntryId, conn: &Arc<Connection>, flags: NameFlags) -> WaiterId {
        let wid = WaiterId(self.next_waiter_id);
        self.next_waiter_id += 1;
        self.waiters.insert(
            wid,
            Waiter {
                conn: Arc::clone(conn),
                flags: flags & !NameFlags::IN_QUEUE,
                entry: eid,
            },
        );
        self.entries
            .get_mut(&eid)
            .expect("queueing on an indexed entry")
            .waiters
            .push(wid);
        conn.names().add_queued(wid);
        wid
    }

    /// Find `conn`'s waiter record on an entry, if any.
    fn find_waiter(&self, eid: EntryId, conn: &Arc<Connection>) -> Option<WaiterId> {
        self.entries.get(&eid)?.waiters.iter().copied().find(|wid| {
            self.waiters
                .get(wid)
                .is_some_and(|w| Arc::ptr_eq(&w.conn, conn))
        })
    }

    /// Unlink a waiter from its entry and its connection, and free it.
    fn free_waiter(&mut self, wid: WaiterId) {
        let Some(waiter) = self.waiters.remove(&wid) else {
            return;
        };
        waiter.conn.names().remove_queued(wid);
        if let Some(entry) = self.entries.get_mut(&waiter.entry) {
            if let Some(pos) = entry.waiters.iter().position(|w| *w == wid) {
                entry.waiters.remove(pos);
            }
        }
    }

    /// Conflict state machine: `conn` requested a name owned by someone else.
    fn handle_conflict(
        &mut self,
        conn: &Arc<Connection>,
        eid: EntryId,
        req_flags: NameFlags,
        log: &mut NotifyLog,
    ) -> Result<Acquisition> {
        let (own_flags, old_owner, activator, name) = {
            let entry = self.entries.get(&eid).expect("indexed entry");
            (
                entry.flags,
                Arc::clone(&entry.owner),
                entry.activator.clone(),
                entry.name.clone(),
            )
        };

        if req_flags.contains(NameFlags::REPLACE_EXISTING)
            && own_flags.contains(NameFlags::ALLOW_REPLACEMENT)
        {
            // Takeover. When the name is parked at its activator, the
            // messages that accumulated there follow the name to the new
            // owner. Migration is the only fallible step, so it runs before
            // any mutation; a failure leaves the entry, both queues, and
            // the log untouched.
            if let Some(activator) = &activator {
                if Arc::ptr_eq(activator, &old_owner) {
                    conn.adopt_messages_from(activator)?;
                }
            }

            // A queue-willing incumbent rejoins at the tail; a later release
            // by the new owner rotates ownership back.
            if own_flags.contains(NameFlags::QUEUE) {
                self.queue_waiter(eid, &old_owner, own_flags);
            }

            // The requester stops being a waiter the moment it becomes owner.
            if let Some(wid) = self.find_waiter(eid, conn) {
                self.free_waiter(wid);
            }

            // The activator reference, if any, stays: the entry outlives
            // transient owners until the activator itself disconnects.
            old_owner.names().remove_owned(eid);
            conn.names().add_owned(eid);
            {
                let entry = self.entries.get_mut(&eid).expect("indexed entry");
                entry.owner = Arc::clone(conn);
                entry.flags = req_flags;
            }

            log.push_change(old_owner.id(), conn.id(), req_flags, &name);
            debug!(
                name = &*name,
                old = %old_owner.id(),
                new = %conn.id(),
                "name taken over"
            );
            return Ok(Acquisition::Acquired);
        }

        if req_flags.contains(NameFlags::QUEUE) {
            if let Some(wid) = self.find_waiter(eid, conn) {
                // Already queued: refresh the recorded flags in place rather
                // than appending a second record.
                self.waiters
                    .get_mut(&wid)
                    .expect("linked waiter exists")
                    .flags = req_flags & !NameFlags::IN_QUEUE;
            } else {
                self.queue_waiter(eid, conn, req_flags);
            }
            debug!(name = &*name, conn = %conn.id(), "caller queued for name");
            return Ok(Acquisition::Queued);
        }

        Err(BusError::exists(name))
    }

    /// Detach the entry from its owner, then hand it on or free it.
    fn release_entry(&mut self, eid: EntryId, log: &mut NotifyLog) {
        {
            let entry = self.entries.get(&eid).expect("indexed entry");
            entry.owner.names().remove_owned(eid);
        }
        self.finish_release(eid, log);
    }

    /// The post-detach half of a release: promote the head waiter, rebind to
    /// the activator, or unindex and free.
    ///
    /// The caller must already have removed the entry from the (former)
    /// owner's anchor list; this function does not touch that connection's
    /// lock.
    fn finish_release(&mut self, eid: EntryId, log: &mut NotifyLog) {
        let head = {
            let entry = self.entries.get(&eid).expect("indexed entry");
            entry.waiters.first().copied()
        };

        if let Some(wid) = head {
            let waiter = self.waiters.remove(&wid).expect("linked waiter exists");
            waiter.conn.names().remove_queued(wid);
            waiter.conn.names().add_owned(eid);

            let flags = waiter.flags & !NameFlags::IN_QUEUE;
            let entry = self.entries.get_mut(&eid).expect("indexed entry");
            entry.waiters.remove(0);
            let old_id = entry.owner.id();
            entry.owner = waiter.conn;
            entry.flags = flags;
            log.push_change(old_id, entry.owner.id(), flags, &entry.name);
            debug!(name = &*entry.name, old = %old_id, new = %entry.owner.id(), "waiter promoted");
            return;
        }

        let has_activator = self.entries[&eid].activator.is_some();
        if has_activator {
            let entry = self.entries.get_mut(&eid).expect("indexed entry");
            let activator = entry
                .activator
                .clone()
                .expect("activator checked above");
            activator.names().add_owned(eid);
            let old_id = entry.owner.id();
            entry.owner = Arc::clone(&activator);
            entry.flags = NameFlags::ALLOW_REPLACEMENT;
            log.push_change(old_id, activator.id(), entry.flags, &entry.name);
            debug!(name = &*entry.name, old = %old_id, activator = %activator.id(), "name handed back to activator");
            return;
        }

        let entry = self.entries.remove(&eid).expect("indexed entry");
        debug_assert!(entry.is_freeable());
        self.index.remove(&entry.name);
        log.push_remove(entry.owner.id(), entry.flags, &entry.name);
        debug!(name = &*entry.name, old = %entry.owner.id(), "name removed");
    }
}

// ---------------------------------------------------------------------------
// NameRegistry
// ---------------------------------------------------------------------------

/// The per-bus name registry.
pub struct NameRegistry {
    pub(crate) inner: Mutex<RegistryInner>,
}

impl NameRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        info!("name registry created");
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Look up the current state of a name. No side effects.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<NameSnapshot> {
        let inner = self.inner.lock();
        let &eid = inner.index.get(name)?;
        let entry = inner.entries.get(&eid)?;
        Some(NameSnapshot {
            name: entry.name.to_string(),
            owner: entry.owner.id(),
            flags: entry.flags,
            activator: entry.activator.as_ref().map(|a| a.id()),
            waiters: entry
                .waiters
                .iter()
                .filter_map(|wid| inner.waiters.get(wid).map(|w| w.conn.id()))
                .collect(),
        })
    }

    /// Acquire `name` for `conn`.
    ///
    /// The caller is responsible for the preconditions: a valid name, the
    /// per-connection quota, and policy approval. Events for any ownership
    /// change are appended to `log`.
    pub fn acquire(
        &self,
        conn: &Arc<Connection>,
        name: &str,
        flags: NameFlags,
        log: &mut NotifyLog,
    ) -> Result<Acquisition> {
        let mut inner = self.inner.lock();

        if let Some(&eid) = inner.index.get(name) {
            let is_owner = Arc::ptr_eq(&inner.entries[&eid].owner, conn);
            if is_owner {
                inner.entries.get_mut(&eid).expect("indexed entry").flags = flags;
                return Ok(Acquisition::AlreadyOwner);
            }
            return inner.handle_conflict(conn, eid, flags, log);
        }

        // No entry: create one. An activator never blocks takeover, so its
        // requested flags are overridden wholesale.
        let mut flags = flags;
        let activator = if conn.is_activator() {
            flags = NameFlags::ALLOW_REPLACEMENT;
            Some(Arc::clone(conn))
        } else {
            None
        };

        let eid = inner.alloc_entry_id();
        let boxed_name: Box<str> = name.into();
        conn.names().add_owned(eid);
        inner.index.insert(boxed_name.clone(), eid);
        inner.entries.insert(
            eid,
            NameEntry {
                name: boxed_name,
                owner: Arc::clone(conn),
                flags,
                activator,
                waiters: SmallVec::new(),
            },
        );
        log.push_add(conn.id(), flags, name);
        debug!(name, conn = %conn.id(), ?flags, "name acquired");
        Ok(Acquisition::Acquired)
    }

    /// Release `conn`'s standing on `name`: ownership if it is the owner,
    /// otherwise its queued wait (cancellation, no notification).
    pub fn release(&self, name: &str, conn: &Arc<Connection>, log: &mut NotifyLog) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(&eid) = inner.index.get(name) else {
            return Err(BusError::not_found(name));
        };

        if Arc::ptr_eq(&inner.entries[&eid].owner, conn) {
            inner.release_entry(eid, log);
            debug!(name, conn = %conn.id(), "name released");
            return Ok(());
        }

        if let Some(wid) = inner.find_waiter(eid, conn) {
            inner.free_waiter(wid);
            debug!(name, conn = %conn.id(), "queued wait cancelled");
            return Ok(());
        }

        Err(BusError::PermissionDenied)
    }

    /// Remove every trace of a disconnecting connection.
    ///
    /// The anchors are spliced out under the connection lock alone; only
    /// then is the registry lock taken, so this path never acquires the
    /// dying connection's lock inside the registry lock.
    pub fn evict_owner(&self, conn: &Arc<Connection>, log: &mut NotifyLog) {
        // Drop activator references held by the dying connection so no name
        // can later rebind to a disconnected fallback.
        {
            let mut inner = self.inner.lock();
            for entry in inner.entries.values_mut() {
                if entry
                    .activator
                    .as_ref()
                    .is_some_and(|a| Arc::ptr_eq(a, conn))
                {
                    entry.activator = None;
                }
            }
        }

        // The spliced lists go stale if a racing takeover or promotion slips
        // in between the connection-lock drain and the registry lock, so
        // each entry is re-checked for ownership and the drain repeats until
        // it comes back empty. Nothing re-populates the anchors once the
        // waiter records are gone, because only the connection itself could.
        let mut released = 0_usize;
        loop {
            let (owned, queued) = conn.drain_anchors();
            if owned.is_empty() && queued.is_empty() {
                break;
            }

            let mut inner = self.inner.lock();
            for wid in queued {
                if let Some(waiter) = inner.waiters.remove(&wid) {
                    if let Some(entry) = inner.entries.get_mut(&waiter.entry) {
                        if let Some(pos) = entry.waiters.iter().position(|w| *w == wid) {
                            entry.waiters.remove(pos);
                        }
                    }
                }
            }

            for eid in owned {
                let still_owned = inner
                    .entries
                    .get(&eid)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.owner, conn));
                if still_owned {
                    // The splice already detached the entry from the dying
                    // connection's anchors.
                    inner.finish_release(eid, log);
                    released += 1;
                }
            }
        }

        if released > 0 {
            info!(conn = %conn.id(), released, "connection evicted from name registry");
        }
    }

    /// Drop all entries and waiters without emitting notifications.
    ///
    /// Bus teardown only. Connection anchor lists are walked back so that
    /// any connection outliving the registry is left consistent.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let waiters: Vec<WaiterId> = inner.waiters.keys().copied().collect();
        for wid in waiters {
            if let Some(waiter) = inner.waiters.remove(&wid) {
                waiter.conn.names().remove_queued(wid);
            }
        }
        let entries: Vec<EntryId> = inner.entries.keys().copied().collect();
        for eid in entries {
            if let Some(entry) = inner.entries.remove(&eid) {
                entry.owner.names().remove_owned(eid);
            }
        }
        inner.index.clear();
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Number of queued waiters across all entries.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Walk the arenas and assert every structural invariant.
    ///
    /// Diagnostics and test support; panics on the first violation.
    pub fn check_invariants(&self) {
        let inner = self.inner.lock();

        // Uniqueness: the index and the entry arena agree exactly.
        assert_eq!(inner.index.len(), inner.entries.len());
        for (name, &eid) in &inner.index {
            let entry = inner.entries.get(&eid).expect("indexed entry exists");
            assert_eq!(&entry.name, name, "index key matches entry name");
        }

        // Owner accounting: every entry sits in its owner's anchor list, and
        // each owner's anchor list holds exactly its entries.
        let mut by_owner: HashMap<ConnectionId, (Arc<Connection>, Vec<EntryId>)> = HashMap::new();
        for (&eid, entry) in &inner.entries {
            by_owner
                .entry(entry.owner.id())
                .or_insert_with(|| (Arc::clone(&entry.owner), Vec::new()))
                .1
                .push(eid);
        }
        for (owner, mut eids) in by_owner.into_values() {
            let anchors = owner.names();
            let mut owned = anchors.owned.clone();
            drop(anchors);
            eids.sort();
            owned.sort();
            assert_eq!(owned, eids, "owner {} anchor list agrees", owner.id());
        }

        // Waiter linkage, FIFO lists, and per-entry uniqueness.
        for (&eid, entry) in &inner.entries {
            let mut seen: Vec<ConnectionId> = Vec::new();
            for wid in &entry.waiters {
                let waiter = inner.waiters.get(wid).expect("linked waiter exists");
                assert_eq!(waiter.entry, eid, "waiter back-reference agrees");
                assert!(
                    !Arc::ptr_eq(&waiter.conn, &entry.owner),
                    "a waiter is never the owner"
                );
                assert!(
                    !waiter.flags.contains(NameFlags::IN_QUEUE),
                    "stored waiter flags exclude IN_QUEUE"
                );
                assert!(
                    !seen.contains(&waiter.conn.id()),
                    "a connection queues at most once per name"
                );
                seen.push(waiter.conn.id());
                assert!(
                    waiter.conn.names().queued.contains(wid),
                    "waiter sits in its connection's queued anchor"
                );
            }
        }
        for (&wid, waiter) in &inner.waiters {
            let entry = inner
                .entries
                .get(&waiter.entry)
                .expect("waiter's entry exists");
            assert!(entry.waiters.contains(&wid), "entry links its waiter");
        }
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NameRegistry")
            .field("entries", &inner.entries.len())
            .field("waiters", &inner.waiters.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
