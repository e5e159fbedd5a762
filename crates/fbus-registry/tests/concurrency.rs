//! Concurrent acquire/release/evict against one registry.
//!
//! The registry serializes everything behind its lock; these tests check
//! that contended interleavings neither corrupt the arenas nor violate the
//! ownership invariants, and that eviction is safe against racing acquires
//! by other connections.

use std::sync::Arc;
use std::thread;

use fbus_bus::Bus;
use fbus_registry::NameRegistry;
use fbus_types::{ConnectionFlags, NameFlags, NotifyLog};

#[test]
fn test_contended_acquire_release_cycles() {
    let bus = Arc::new(Bus::new("stress"));
    let registry = Arc::new(NameRegistry::new());
    let names = ["stress.a", "stress.b", "stress.c"];

    let mut handles = Vec::new();
    for t in 0..4 {
        let bus = Arc::clone(&bus);
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            let conn = bus.connect(ConnectionFlags::empty());
            for round in 0..200 {
                let name = names[(t + round) % names.len()];
                let mut log = NotifyLog::new();
                let acquired = registry
                    .acquire(&conn, name, NameFlags::QUEUE, &mut log)
                    .is_ok();
                if acquired {
                    // Owner or queued; either way release our standing.
                    let _ = registry.release(name, &conn, &mut log);
                }
            }
            conn
        }));
    }

    let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    registry.check_invariants();

    // Every thread released everything it held or queued for.
    for conn in &conns {
        assert_eq!(conn.owned_count(), 0);
    }
    assert!(registry.is_empty());
    assert_eq!(registry.waiter_count(), 0);
}

#[test]
fn test_eviction_races_with_acquires_by_others() {
    let bus = Arc::new(Bus::new("stress"));
    let registry = Arc::new(NameRegistry::new());

    for round in 0..50 {
        let name = "stress.victim";
        let victim = bus.connect(ConnectionFlags::empty());
        {
            let mut log = NotifyLog::new();
            registry
                .acquire(&victim, name, NameFlags::ALLOW_REPLACEMENT, &mut log)
                .unwrap();
        }

        let contender = bus.connect(ConnectionFlags::empty());
        let contender_thread = {
            let registry = Arc::clone(&registry);
            let contender = Arc::clone(&contender);
            thread::spawn(move || {
                let mut log = NotifyLog::new();
                let _ = registry.acquire(
                    &contender,
                    name,
                    NameFlags::REPLACE_EXISTING | NameFlags::QUEUE,
                    &mut log,
                );
            })
        };

        let evict_thread = {
            let registry = Arc::clone(&registry);
            let victim = Arc::clone(&victim);
            thread::spawn(move || {
                let mut log = NotifyLog::new();
                registry.evict_owner(&victim, &mut log);
            })
        };

        contender_thread.join().unwrap();
        evict_thread.join().unwrap();
        registry.check_invariants();

        // Whatever the interleaving, the victim is fully gone.
        if let Some(snap) = registry.lookup(name) {
            assert_ne!(snap.owner, victim.id(), "round {round}");
            assert!(!snap.waiters.contains(&victim.id()));
        }
        assert_eq!(victim.owned_count(), 0);

        // Clean up for the next round.
        let mut log = NotifyLog::new();
        registry.evict_owner(&contender, &mut log);
        bus.remove_connection(victim.id());
        bus.remove_connection(contender.id());
    }

    assert!(registry.is_empty());
}
