//! Validated command layer over the registry.
//!
//! Requests arrive here already unmarshaled. This layer owns the
//! preconditions the registry itself assumes: name validity, the
//! per-connection quota, policy approval, and resolution of the privileged
//! act-on-behalf target. It also flushes the notification log through the
//! bus after the registry has released its lock.

use std::sync::Arc;

use tracing::debug;

use fbus_bus::{Bus, Connection, Policy, PoolSlice};
use fbus_error::{BusError, Result};
use fbus_types::{
    is_valid_name, ConnectionId, ListFilter, NameFlags, NotifyLog, MAX_NAMES_PER_CONNECTION,
};

use crate::registry::{Acquisition, NameRegistry};

/// Request to acquire a well-known name.
#[derive(Debug, Clone)]
pub struct AcquireNameRequest {
    pub name: String,
    pub flags: NameFlags,
    /// Act on behalf of this connection instead of the caller. Requires the
    /// caller to be privileged.
    pub target: Option<ConnectionId>,
}

/// Reply to a successful acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireNameReply {
    pub acquisition: Acquisition,
    /// The accepted request flags, with `IN_QUEUE` set when the subject was
    /// queued rather than made owner.
    pub flags: NameFlags,
}

/// Request to release a well-known name or cancel a queued wait.
#[derive(Debug, Clone)]
pub struct ReleaseNameRequest {
    pub name: String,
    /// Act on behalf of this connection instead of the caller. Requires the
    /// caller to be privileged.
    pub target: Option<ConnectionId>,
}

/// Request to list names and/or connections.
#[derive(Debug, Clone, Copy)]
pub struct ListNamesRequest {
    pub filter: ListFilter,
}

/// Resolve the connection a command operates on.
///
/// A target id different from the caller's own requires the caller to be
/// privileged and the id to resolve under the bus lock. The bus lock is
/// released before any registry call.
fn resolve_subject(
    bus: &Bus,
    conn: &Arc<Connection>,
    target: Option<ConnectionId>,
) -> Result<Arc<Connection>> {
    match target {
        Some(id) if id != conn.id() => {
            if !conn.is_privileged() {
                return Err(BusError::PermissionDenied);
            }
            bus.find_connection(id)
                .ok_or(BusError::NoSuchConnection { id: id.get() })
        }
        _ => Ok(Arc::clone(conn)),
    }
}

/// Acquire a name on behalf of `conn` (or its resolved target).
pub fn acquire_name(
    registry: &NameRegistry,
    bus: &Bus,
    policy: Option<&dyn Policy>,
    conn: &Arc<Connection>,
    req: &AcquireNameRequest,
) -> Result<AcquireNameReply> {
    if !is_valid_name(&req.name) {
        return Err(BusError::invalid_name(req.name.as_str()));
    }
    // IN_QUEUE is output-only; whatever the caller put there is dropped.
    let flags = req.flags & NameFlags::REQUEST_MASK;

    let subject = resolve_subject(bus, conn, req.target)?;

    let owned = subject.owned_count();
    if owned >= MAX_NAMES_PER_CONNECTION {
        return Err(BusError::TooManyNames {
            count: owned,
            max: MAX_NAMES_PER_CONNECTION,
        });
    }

    if let Some(policy) = policy {
        if !policy.can_own(&subject, &req.name) {
            debug!(name = %req.name, conn = %subject.id(), "policy refused ownership");
            return Err(BusError::PermissionDenied);
        }
    }

    let mut log = NotifyLog::new();
    let acquisition = registry.acquire(&subject, &req.name, flags, &mut log)?;
    bus.broadcast(&mut log);

    let mut reply_flags = flags;
    if acquisition.is_queued() {
        reply_flags |= NameFlags::IN_QUEUE;
    }
    Ok(AcquireNameReply {
        acquisition,
        flags: reply_flags,
    })
}

/// Release a name (or cancel a queued wait) on behalf of `conn`.
pub fn release_name(
    registry: &NameRegistry,
    bus: &Bus,
    conn: &Arc<Connection>,
    req: &ReleaseNameRequest,
) -> Result<()> {
    if !is_valid_name(&req.name) {
        return Err(BusError::invalid_name(req.name.as_str()));
    }
    let subject = resolve_subject(bus, conn, req.target)?;

    let mut log = NotifyLog::new();
    registry.release(&req.name, &subject, &mut log)?;
    bus.broadcast(&mut log);
    Ok(())
}

/// Serialize the name table into the caller's receive pool.
pub fn list_names(
    registry: &NameRegistry,
    bus: &Bus,
    conn: &Arc<Connection>,
    req: &ListNamesRequest,
) -> Result<PoolSlice> {
    registry.list(bus, conn, req.filter)
}
