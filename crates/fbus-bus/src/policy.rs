//! Name-ownership policy oracle.

use crate::connection::Connection;

/// Decides whether a connection may own a given well-known name.
///
/// The registry never evaluates policy itself; the request layer asks the
/// oracle before calling into the registry. A bus configured without a
/// policy allows everything.
pub trait Policy: Send + Sync {
    fn can_own(&self, conn: &Connection, name: &str) -> bool;
}

/// The default policy: every connection may own every valid name.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Policy for AllowAll {
    fn can_own(&self, _conn: &Connection, _name: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use fbus_types::ConnectionFlags;

    struct DenyPrefix(&'static str);

    impl Policy for DenyPrefix {
        fn can_own(&self, _conn: &Connection, name: &str) -> bool {
            !name.starts_with(self.0)
        }
    }

    #[test]
    fn allow_all_allows() {
        let bus = Bus::new("test");
        let conn = bus.connect(ConnectionFlags::empty());
        assert!(AllowAll.can_own(&conn, "org.example.Anything"));
    }

    #[test]
    fn custom_policies_can_refuse() {
        let bus = Bus::new("test");
        let conn = bus.connect(ConnectionFlags::empty());
        let policy = DenyPrefix("org.secure.");
        assert!(!policy.can_own(&conn, "org.secure.Vault"));
        assert!(policy.can_own(&conn, "org.example.App"));
    }
}
