//! Hard limits of the bus surface.

/// Maximum byte length of a well-known name, excluding any NUL terminator.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum number of names a single connection may own at once.
pub const MAX_NAMES_PER_CONNECTION: usize = 256;

/// Default byte capacity of a connection's receive pool.
pub const DEFAULT_POOL_CAPACITY: usize = 1024 * 1024;
