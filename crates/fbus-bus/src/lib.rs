//! Bus, connection, and receive-pool plumbing.
//!
//! The name registry treats everything in this crate as a collaborator: a
//! [`Connection`] carries the per-connection name anchors and a byte pool,
//! the [`Bus`] resolves ids and broadcasts notification events, and
//! [`Policy`] answers ownership questions. None of these types know how
//! names are arbitrated.

pub mod bus;
pub mod connection;
pub mod policy;
pub mod pool;

pub use bus::Bus;
pub use connection::{Connection, NameAnchors};
pub use policy::{AllowAll, Policy};
pub use pool::{PoolSlice, ReceivePool};
