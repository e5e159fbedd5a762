//! The bus: the connection index and the notification broadcast facility.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use fbus_types::limits::DEFAULT_POOL_CAPACITY;
use fbus_types::{ConnectionFlags, ConnectionId, NotifyLog};

use crate::connection::Connection;

/// One bus instance: a set of live connections with unique, never-reused ids.
///
/// The connection index lock is the outermost lock in the system: it is
/// taken only for id resolution, registration, and snapshots, and never
/// while the registry lock is held.
pub struct Bus {
    name: String,
    connections: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl Bus {
    /// Create an empty bus.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(bus = %name, "bus created");
        Self {
            name,
            connections: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(ConnectionId::FIRST.get()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a new connection with the default pool capacity.
    pub fn connect(&self, flags: ConnectionFlags) -> Arc<Connection> {
        self.connect_with_pool_capacity(flags, DEFAULT_POOL_CAPACITY)
    }

    /// Register a new connection with an explicit pool capacity.
    pub fn connect_with_pool_capacity(
        &self,
        flags: ConnectionFlags,
        pool_capacity: usize,
    ) -> Arc<Connection> {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = ConnectionId::new(raw).expect("connection ids start at 1");
        let conn = Arc::new(Connection::new(id, flags, pool_capacity));
        self.connections.lock().insert(id, Arc::clone(&conn));
        debug!(bus = %self.name, conn = %id, ?flags, "connection registered");
        conn
    }

    /// Resolve an id to a live connection.
    #[must_use]
    pub fn find_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    /// Drop a connection from the index.
    ///
    /// The caller is responsible for evicting the connection from the name
    /// registry first; the bus only forgets the id.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.lock().remove(&id);
        if removed.is_some() {
            debug!(bus = %self.name, conn = %id, "connection removed");
        }
        removed
    }

    /// Snapshot of all live connections, ascending by id.
    #[must_use]
    pub fn connections_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Deliver every pending event in `log` to every live connection.
    ///
    /// Must be called only after the registry lock has been released; event
    /// delivery touches per-connection inboxes and may allocate.
    pub fn broadcast(&self, log: &mut NotifyLog) {
        let events = log.drain();
        if events.is_empty() {
            return;
        }
        let targets = self.connections_snapshot();
        debug!(
            bus = %self.name,
            events = events.len(),
            targets = targets.len(),
            "broadcasting name events"
        );
        for event in events {
            for conn in &targets {
                conn.push_event(event.clone());
            }
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbus_types::NameFlags;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let bus = Bus::new("test");
        let a = bus.connect(ConnectionFlags::empty());
        let b = bus.connect(ConnectionFlags::empty());
        assert_eq!(a.id().get(), 1);
        assert_eq!(b.id().get(), 2);

        bus.remove_connection(a.id());
        let c = bus.connect(ConnectionFlags::empty());
        assert_eq!(c.id().get(), 3);
    }

    #[test]
    fn find_connection_resolves_live_ids_only() {
        let bus = Bus::new("test");
        let a = bus.connect(ConnectionFlags::empty());
        assert!(bus.find_connection(a.id()).is_some());

        bus.remove_connection(a.id());
        assert!(bus.find_connection(a.id()).is_none());
        assert!(bus.find_connection(ConnectionId::new(42).unwrap()).is_none());
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let bus = Bus::new("test");
        let _a = bus.connect(ConnectionFlags::empty());
        let _b = bus.connect(ConnectionFlags::ACTIVATOR);
        let _c = bus.connect(ConnectionFlags::empty());

        let ids: Vec<u64> = bus
            .connections_snapshot()
            .iter()
            .map(|c| c.id().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn broadcast_reaches_every_connection_in_order() {
        let bus = Bus::new("test");
        let a = bus.connect(ConnectionFlags::empty());
        let b = bus.connect(ConnectionFlags::empty());

        let mut log = NotifyLog::new();
        log.push_add(a.id(), NameFlags::empty(), "x.y");
        log.push_change(a.id(), b.id(), NameFlags::empty(), "x.y");
        bus.broadcast(&mut log);

        assert!(log.is_empty());
        for conn in [&a, &b] {
            let events = conn.drain_events();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].kind, fbus_types::NameEventKind::Add);
            assert_eq!(events[1].kind, fbus_types::NameEventKind::Change);
        }
    }

    #[test]
    fn broadcast_of_empty_log_is_a_no_op() {
        let bus = Bus::new("test");
        let a = bus.connect(ConnectionFlags::empty());
        let mut log = NotifyLog::new();
        bus.broadcast(&mut log);
        assert_eq!(a.pending_event_count(), 0);
    }
}
