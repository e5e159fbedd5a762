//! Error taxonomy for FrankenBus operations.
//!
//! One workspace-wide error enum with an errno mapping for the ioctl-style
//! command surface. Every error leaves bus and registry state unchanged;
//! none is retried automatically — retry is the caller's choice.

use thiserror::Error;

/// Primary error type for bus and name-registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The name failed well-known-name validation.
    #[error("invalid well-known name: '{name}'")]
    InvalidName { name: String },

    /// The connection already owns the maximum number of names.
    #[error("connection owns {count} names (limit {max})")]
    TooManyNames { count: usize, max: usize },

    /// No entry exists for the given name.
    #[error("name not found: '{name}'")]
    NameNotFound { name: String },

    /// The name is owned by another connection and neither takeover nor
    /// queuing resolved the conflict.
    #[error("name exists: '{name}'")]
    NameExists { name: String },

    /// The connection already owns the name (reported verbatim on the wire;
    /// not a failure for onward state).
    #[error("name already owned by this connection: '{name}'")]
    AlreadyOwner { name: String },

    /// Policy refused the acquisition, or the caller has no standing for the
    /// requested release or act-on-behalf operation.
    #[error("permission denied")]
    PermissionDenied,

    /// An act-on-behalf target id did not resolve to a live connection.
    #[error("no connection with id {id}")]
    NoSuchConnection { id: u64 },

    /// A receive pool could not satisfy an allocation.
    #[error("receive pool exhausted: {requested} bytes requested, {available} available")]
    PoolExhausted { requested: usize, available: usize },
}

/// Errno values reported on the command surface.
///
/// These match the Unix codes the equivalent kernel interface would return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errno {
    /// EPERM - operation not permitted.
    Perm = 1,
    /// ESRCH - no such entry.
    Srch = 3,
    /// ENXIO - no such device or address.
    Nxio = 6,
    /// E2BIG - argument list too long.
    TooBig = 7,
    /// ENOMEM - out of memory.
    NoMem = 12,
    /// EEXIST - already exists.
    Exist = 17,
    /// EINVAL - invalid argument.
    Inval = 22,
    /// EALREADY - operation already in progress.
    Already = 114,
}

impl BusError {
    /// Map this error to its wire errno.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::InvalidName { .. } => Errno::Inval,
            Self::TooManyNames { .. } => Errno::TooBig,
            Self::NameNotFound { .. } => Errno::Srch,
            Self::NameExists { .. } => Errno::Exist,
            Self::AlreadyOwner { .. } => Errno::Already,
            Self::PermissionDenied => Errno::Perm,
            Self::NoSuchConnection { .. } => Errno::Nxio,
            Self::PoolExhausted { .. } => Errno::NoMem,
        }
    }

    /// Whether the failure is a rejection of the request itself, as opposed
    /// to a resource condition that may clear on its own.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        !matches!(self, Self::PoolExhausted { .. })
    }

    /// Create an `InvalidName` error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// Create a `NameNotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NameNotFound { name: name.into() }
    }

    /// Create a `NameExists` error.
    pub fn exists(name: impl Into<String>) -> Self {
        Self::NameExists { name: name.into() }
    }

    /// Create an `AlreadyOwner` error.
    pub fn already_owner(name: impl Into<String>) -> Self {
        Self::AlreadyOwner { name: name.into() }
    }
}

/// Result type alias using [`BusError`].
pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BusError::invalid_name("not-a-name");
        assert_eq!(err.to_string(), "invalid well-known name: 'not-a-name'");

        let err = BusError::TooManyNames {
            count: 256,
            max: 256,
        };
        assert_eq!(err.to_string(), "connection owns 256 names (limit 256)");

        let err = BusError::PoolExhausted {
            requested: 64,
            available: 8,
        };
        assert_eq!(
            err.to_string(),
            "receive pool exhausted: 64 bytes requested, 8 available"
        );
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(BusError::invalid_name("x").errno(), Errno::Inval);
        assert_eq!(
            BusError::TooManyNames { count: 1, max: 1 }.errno(),
            Errno::TooBig
        );
        assert_eq!(BusError::not_found("a.b").errno(), Errno::Srch);
        assert_eq!(BusError::exists("a.b").errno(), Errno::Exist);
        assert_eq!(BusError::already_owner("a.b").errno(), Errno::Already);
        assert_eq!(BusError::PermissionDenied.errno(), Errno::Perm);
        assert_eq!(BusError::NoSuchConnection { id: 9 }.errno(), Errno::Nxio);
        assert_eq!(
            BusError::PoolExhausted {
                requested: 1,
                available: 0
            }
            .errno(),
            Errno::NoMem
        );
    }

    #[test]
    fn errno_values_match_unix() {
        assert_eq!(Errno::Perm as i32, 1);
        assert_eq!(Errno::Srch as i32, 3);
        assert_eq!(Errno::Nxio as i32, 6);
        assert_eq!(Errno::TooBig as i32, 7);
        assert_eq!(Errno::NoMem as i32, 12);
        assert_eq!(Errno::Exist as i32, 17);
        assert_eq!(Errno::Inval as i32, 22);
        assert_eq!(Errno::Already as i32, 114);
    }

    #[test]
    fn request_error_classification() {
        assert!(BusError::exists("a.b").is_request_error());
        assert!(BusError::PermissionDenied.is_request_error());
        assert!(
            !BusError::PoolExhausted {
                requested: 1,
                available: 0
            }
            .is_request_error()
        );
    }
}
