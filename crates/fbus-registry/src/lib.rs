//! Well-known name registry for the FrankenBus IPC bus.
//!
//! The registry is the authority that answers "who currently holds name
//! `N`?". It arbitrates contention through a takeover state machine,
//! maintains a fair FIFO queue of would-be owners per name, hands
//! activator-held names back when their transient owner releases, evicts
//! every trace of a disconnecting connection in one pass, and emits ordered
//! change notifications that the bus broadcasts to all peers.
//!
//! Layering: all entry state lives behind one registry-wide lock; the
//! per-connection anchor lists live behind each connection's own lock and
//! are only ever taken inside the registry lock. Notification delivery is
//! staged into a [`fbus_types::NotifyLog`] under the lock and flushed by the
//! caller after it is released.

mod entry;

pub mod cmd;
pub mod list;
pub mod registry;

pub use cmd::{
    acquire_name, list_names, release_name, AcquireNameReply, AcquireNameRequest,
    ListNamesRequest, ReleaseNameRequest,
};
pub use list::{LIST_HEADER_SIZE, RECORD_HEADER_SIZE};
pub use registry::{Acquisition, NameRegistry, NameSnapshot};
