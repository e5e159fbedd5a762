//! Public API facade for FrankenBus.
//!
//! A [`Broker`] ties one [`Bus`] to one [`NameRegistry`] and an optional
//! ownership [`Policy`], and exposes the connection lifecycle plus the
//! name commands as one surface. Integration tests for the whole stack
//! live here as well.

use std::sync::Arc;

use tracing::info;

pub use fbus_bus::{AllowAll, Bus, Connection, Policy, PoolSlice, ReceivePool};
pub use fbus_error::{BusError, Errno, Result};
pub use fbus_registry::{
    acquire_name, list_names, release_name, AcquireNameReply, AcquireNameRequest, Acquisition,
    ListNamesRequest, NameRegistry, NameSnapshot, ReleaseNameRequest,
};
pub use fbus_types::{
    is_valid_name, ConnectionFlags, ConnectionId, ListFilter, NameEvent, NameEventKind,
    NameFlags, NotifyLog, MAX_NAMES_PER_CONNECTION, MAX_NAME_LEN,
};

/// One bus instance with its name registry and policy.
pub struct Broker {
    bus: Bus,
    registry: NameRegistry,
    policy: Option<Box<dyn Policy>>,
}

impl Broker {
    /// Create a broker with no ownership policy (everything allowed).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(bus = %name, "broker created");
        Self {
            bus: Bus::new(name),
            registry: NameRegistry::new(),
            policy: None,
        }
    }

    /// Create a broker enforcing `policy` on every acquisition.
    #[must_use]
    pub fn with_policy(name: impl Into<String>, policy: Box<dyn Policy>) -> Self {
        let mut broker = Self::new(name);
        broker.policy = Some(policy);
        broker
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    #[must_use]
    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Register a new connection.
    pub fn connect(&self, flags: ConnectionFlags) -> Arc<Connection> {
        self.bus.connect(flags)
    }

    /// Tear a connection down: evict it from the name registry, drop it
    /// from the bus, and broadcast the resulting ownership changes to the
    /// remaining connections.
    pub fn disconnect(&self, conn: &Arc<Connection>) {
        let mut log = NotifyLog::new();
        self.registry.evict_owner(conn, &mut log);
        self.bus.remove_connection(conn.id());
        self.bus.broadcast(&mut log);
    }

    /// Acquire a well-known name for `conn`.
    pub fn acquire_name(
        &self,
        conn: &Arc<Connection>,
        name: &str,
        flags: NameFlags,
    ) -> Result<AcquireNameReply> {
        acquire_name(
            &self.registry,
            &self.bus,
            self.policy.as_deref(),
            conn,
            &AcquireNameRequest {
                name: name.to_owned(),
                flags,
                target: None,
            },
        )
    }

    /// Release `conn`'s standing on a name.
    pub fn release_name(&self, conn: &Arc<Connection>, name: &str) -> Result<()> {
        release_name(
            &self.registry,
            &self.bus,
            conn,
            &ReleaseNameRequest {
                name: name.to_owned(),
                target: None,
            },
        )
    }

    /// Serialize the name table into `conn`'s receive pool.
    pub fn list_names(&self, conn: &Arc<Connection>, filter: ListFilter) -> Result<PoolSlice> {
        list_names(&self.registry, &self.bus, conn, &ListNamesRequest { filter })
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        // Walk anchor lists back so connections outliving the broker stay
        // consistent. No notifications on teardown.
        self.registry.clear();
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("bus", &self.bus)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_acquire_release() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        let observer = broker.connect(ConnectionFlags::empty());

        let reply = broker.acquire_name(&c1, "a.b", NameFlags::empty()).unwrap();
        assert_eq!(reply.acquisition, Acquisition::Acquired);

        broker.release_name(&c1, "a.b").unwrap();
        assert!(broker.registry().is_empty());

        let events = observer.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, NameEventKind::Add);
        assert_eq!(events[0].old_owner_raw(), 0);
        assert_eq!(events[0].new_owner_raw(), c1.id().get());
        assert_eq!(events[0].name, "a.b");
        assert_eq!(events[1].kind, NameEventKind::Remove);
        assert_eq!(events[1].old_owner_raw(), c1.id().get());
        assert_eq!(events[1].new_owner_raw(), 0);
    }

    #[test]
    fn test_takeover_of_replaceable_name() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        let c2 = broker.connect(ConnectionFlags::empty());

        broker
            .acquire_name(&c1, "x.y", NameFlags::ALLOW_REPLACEMENT)
            .unwrap();
        let reply = broker
            .acquire_name(&c2, "x.y", NameFlags::REPLACE_EXISTING)
            .unwrap();
        assert_eq!(reply.acquisition, Acquisition::Acquired);

        let snap = broker.registry().lookup("x.y").unwrap();
        assert_eq!(snap.owner, c2.id());
        assert_eq!(snap.flags, NameFlags::REPLACE_EXISTING);
        assert!(snap.waiters.is_empty());

        let events = c1.drain_events();
        let change = events.last().unwrap();
        assert_eq!(change.kind, NameEventKind::Change);
        assert_eq!(change.old_owner, Some(c1.id()));
        assert_eq!(change.new_owner, Some(c2.id()));
        assert_eq!(change.flags, NameFlags::REPLACE_EXISTING);
    }

    #[test]
    fn test_queue_then_promote_on_release() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        let c2 = broker.connect(ConnectionFlags::empty());

        broker
            .acquire_name(&c1, "svc.q", NameFlags::ALLOW_REPLACEMENT | NameFlags::QUEUE)
            .unwrap();
        let reply = broker.acquire_name(&c2, "svc.q", NameFlags::QUEUE).unwrap();
        assert_eq!(reply.acquisition, Acquisition::Queued);
        assert!(reply.flags.contains(NameFlags::IN_QUEUE));

        // Queuing itself is not observable.
        c2.drain_events();

        broker.release_name(&c1, "svc.q").unwrap();
        let snap = broker.registry().lookup("svc.q").unwrap();
        assert_eq!(snap.owner, c2.id());
        assert!(snap.waiters.is_empty());

        let events = c2.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NameEventKind::Change);
        assert_eq!(events[0].old_owner, Some(c1.id()));
        assert_eq!(events[0].new_owner, Some(c2.id()));
    }

    #[test]
    fn test_displaced_owner_rejoins_queue_and_rotates_back() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        let c2 = broker.connect(ConnectionFlags::empty());

        broker
            .acquire_name(&c1, "svc.rot", NameFlags::ALLOW_REPLACEMENT | NameFlags::QUEUE)
            .unwrap();
        broker
            .acquire_name(&c2, "svc.rot", NameFlags::REPLACE_EXISTING | NameFlags::QUEUE)
            .unwrap();

        let snap = broker.registry().lookup("svc.rot").unwrap();
        assert_eq!(snap.owner, c2.id());
        assert_eq!(snap.waiters, vec![c1.id()]);

        broker.release_name(&c2, "svc.rot").unwrap();
        assert_eq!(broker.registry().lookup("svc.rot").unwrap().owner, c1.id());
    }

    #[test]
    fn test_activator_handback_with_message_migration() {
        let broker = Broker::new("e2e");
        let activator = broker.connect(ConnectionFlags::ACTIVATOR);
        let c1 = broker.connect(ConnectionFlags::empty());
        let client = broker.connect(ConnectionFlags::empty());

        // Flags are coerced: an activator never blocks takeover.
        broker
            .acquire_name(&activator, "bus.svc", NameFlags::empty())
            .unwrap();
        assert_eq!(
            broker.registry().lookup("bus.svc").unwrap().flags,
            NameFlags::ALLOW_REPLACEMENT
        );

        // A client message accumulates at the activator while the real
        // service is down.
        activator.enqueue_message(client.id(), b"wake up").unwrap();

        // The service comes up and takes the name over; the parked message
        // follows it.
        broker
            .acquire_name(&c1, "bus.svc", NameFlags::REPLACE_EXISTING)
            .unwrap();
        let (from, payload) = c1.pool().dequeue_message().unwrap();
        assert_eq!(from, client.id());
        assert_eq!(payload, b"wake up");

        // The service exits: the entry is not freed, it goes back to the
        // activator.
        broker.release_name(&c1, "bus.svc").unwrap();
        let snap = broker.registry().lookup("bus.svc").unwrap();
        assert_eq!(snap.owner, activator.id());
    }

    #[test]
    fn test_disconnect_evicts_mixed_state() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        let c2 = broker.connect(ConnectionFlags::empty());

        broker.acquire_name(&c1, "a.b", NameFlags::empty()).unwrap();
        broker.acquire_name(&c1, "c.d", NameFlags::empty()).unwrap();
        broker.acquire_name(&c2, "e.f", NameFlags::empty()).unwrap();
        broker.acquire_name(&c1, "e.f", NameFlags::QUEUE).unwrap();
        c2.drain_events();

        broker.disconnect(&c1);

        assert!(broker.registry().lookup("a.b").is_none());
        assert!(broker.registry().lookup("c.d").is_none());
        let snap = broker.registry().lookup("e.f").unwrap();
        assert_eq!(snap.owner, c2.id());
        assert!(snap.waiters.is_empty());
        assert!(broker.bus().find_connection(c1.id()).is_none());

        // Two REMOVEs; no ownership-change event for the cancelled wait.
        let events = c2.drain_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == NameEventKind::Remove));
        assert!(events.iter().all(|e| e.name != "e.f"));
        broker.registry().check_invariants();
    }

    #[test]
    fn test_events_arrive_in_operation_order() {
        let broker = Broker::new("e2e");
        let observer = broker.connect(ConnectionFlags::empty());
        let c1 = broker.connect(ConnectionFlags::empty());
        let c2 = broker.connect(ConnectionFlags::empty());

        broker
            .acquire_name(&c1, "svc.ord", NameFlags::ALLOW_REPLACEMENT)
            .unwrap();
        broker
            .acquire_name(&c2, "svc.ord", NameFlags::REPLACE_EXISTING)
            .unwrap();
        broker.release_name(&c2, "svc.ord").unwrap();

        let kinds: Vec<_> = observer.drain_events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![NameEventKind::Add, NameEventKind::Change, NameEventKind::Remove]
        );
    }

    #[test]
    fn test_policy_gates_ownership() {
        struct OnlyExample;
        impl Policy for OnlyExample {
            fn can_own(&self, _conn: &Connection, name: &str) -> bool {
                name.starts_with("org.example.")
            }
        }

        let broker = Broker::with_policy("e2e", Box::new(OnlyExample));
        let c1 = broker.connect(ConnectionFlags::empty());

        broker
            .acquire_name(&c1, "org.example.App", NameFlags::empty())
            .unwrap();
        let err = broker
            .acquire_name(&c1, "org.other.App", NameFlags::empty())
            .unwrap_err();
        assert_eq!(err, BusError::PermissionDenied);
        assert_eq!(err.errno(), Errno::Perm);
    }

    #[test]
    fn test_list_round_trip_through_broker() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        let c2 = broker.connect(ConnectionFlags::empty());
        broker
            .acquire_name(&c1, "org.example.One", NameFlags::empty())
            .unwrap();
        broker
            .acquire_name(&c2, "org.example.Two", NameFlags::empty())
            .unwrap();

        let slice = broker
            .list_names(&c1, ListFilter::UNIQUE | ListFilter::NAMES)
            .unwrap();
        let pool = c1.pool();
        let bytes = pool.read(slice);
        let total = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
        assert_eq!(total as usize, bytes.len());
        // Two fixed-size unique records plus two name records.
        assert!(bytes.len() > 8 + 2 * 32);
    }

    #[test]
    fn test_broker_teardown_leaves_connections_consistent() {
        let broker = Broker::new("e2e");
        let c1 = broker.connect(ConnectionFlags::empty());
        broker.acquire_name(&c1, "a.b", NameFlags::empty()).unwrap();

        drop(broker);
        assert_eq!(c1.owned_count(), 0);
    }
}
