//! Flag sets used across the acquire/release/list surface.
//!
//! All three sets are wire-stable: the bit values are part of the external
//! contract and must not be renumbered.

bitflags::bitflags! {
    /// Acquisition flags for a well-known name.
    ///
    /// `IN_QUEUE` is output-only: the request layer strips it from incoming
    /// flags, and the registry sets it only when reporting that the caller
    /// was placed on the takeover queue.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct NameFlags: u64 {
        /// Take the name over if the current owner allows replacement.
        const REPLACE_EXISTING = 1;
        /// Permit another connection to take this name over.
        const ALLOW_REPLACEMENT = 1 << 1;
        /// Wait in the takeover queue if the name cannot be acquired now.
        const QUEUE = 1 << 2;
        /// The caller has been queued rather than made owner (output only).
        const IN_QUEUE = 1 << 3;
    }
}

impl NameFlags {
    /// The subset a caller may pass into an acquire request.
    pub const REQUEST_MASK: Self = Self::REPLACE_EXISTING
        .union(Self::ALLOW_REPLACEMENT)
        .union(Self::QUEUE);
}

bitflags::bitflags! {
    /// Per-connection capability flags, fixed at connect time.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ConnectionFlags: u64 {
        /// The connection holds names only as a fallback owner; any name it
        /// acquires is implicitly replaceable and is handed back to it when
        /// the replacing owner releases.
        const ACTIVATOR = 1;
        /// The connection may act on behalf of other connections in the
        /// request layer.
        const PRIVILEGED = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Filter mask for the name-list command.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ListFilter: u64 {
        /// Emit one fixed-size record per bus connection.
        const UNIQUE = 1;
        /// Emit one variable-size record per owned name.
        const NAMES = 1 << 1;
        /// Include name entries whose owner acquired with `QUEUE`.
        const QUEUED = 1 << 2;
        /// Include activator connections and activator-held names.
        const ACTIVATORS = 1 << 3;
    }
}

macro_rules! bits_serde {
    ($ty:ident, $repr:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.bits().serialize(serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let bits = <$repr>::deserialize(deserializer)?;
                Self::from_bits(bits).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        concat!("invalid ", stringify!($ty), " bits: {:#x}"),
                        bits
                    ))
                })
            }
        }
    };
}

bits_serde!(NameFlags, u64);
bits_serde!(ConnectionFlags, u64);
bits_serde!(ListFilter, u64);
