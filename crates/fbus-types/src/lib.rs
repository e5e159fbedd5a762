//! Shared vocabulary types for the FrankenBus IPC bus.
//!
//! This crate is dependency-light on purpose: identifiers, flag sets, wire
//! limits, the well-known-name validator, and the notification event types
//! that the registry emits and the bus broadcasts. Everything here is plain
//! data; all behavior lives in the subsystem crates.

pub mod flags;
pub mod limits;
pub mod name;
pub mod notify;

pub use flags::{ConnectionFlags, ListFilter, NameFlags};
pub use limits::{MAX_NAMES_PER_CONNECTION, MAX_NAME_LEN};
pub use name::is_valid_name;
pub use notify::{NameEvent, NameEventKind, NotifyLog};

use std::fmt;
use std::num::NonZeroU64;

/// Unique identifier of a connection on one bus.
///
/// Ids are allocated monotonically starting at 1 and are never reused for
/// the lifetime of the bus. On the wire, 0 encodes "no connection" (e.g. the
/// old-owner field of an `ADD` event), which is why the in-memory form is
/// non-zero and absent peers are `Option<ConnectionId>`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ConnectionId(NonZeroU64);

impl ConnectionId {
    /// The first id handed out by a freshly created bus.
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    /// Create a connection id from a raw u64.
    ///
    /// Returns `None` for 0, which is the wire sentinel for "no connection".
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for ConnectionId {
    type Error = InvalidConnectionId;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(InvalidConnectionId)
    }
}

/// Error returned when attempting to create a `ConnectionId` from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidConnectionId;

impl fmt::Display for InvalidConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection id 0 is reserved for \"no connection\"")
    }
}

impl std::error::Error for InvalidConnectionId {}

/// Stable handle of a name entry in the registry arena.
///
/// Handles are allocated from a monotonic counter and never reused, so a
/// stale handle can be detected instead of silently aliasing a new entry.
/// Ascending `EntryId` is also the entry creation order, which the list
/// operation uses as its stable enumeration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry#{}", self.0)
    }
}

/// Stable handle of a queued-waiter record in the registry arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct WaiterId(pub u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter#{}", self.0)
    }
}
