//! Name-list serialization.
//!
//! Output layout (host-endian, every field and record 8-byte aligned):
//!
//! ```text
//! u64 total_size                  // including this header
//! per record:
//!   u64 record_size               // including the record header, unpadded
//!   u64 flags                     // entry flags; 0 for unique-id records
//!   u64 id                        // owner connection id, or unique id
//!   u64 conn_flags                // owner connection flags
//!   bytes[name_len + 1]           // NUL-terminated, name records only
//!   padding to the next 8-byte boundary
//! ```
//!
//! Unique-id records come first (connections ascending by id), then name
//! records (entries in creation order). The whole listing is produced in two
//! passes under the registry lock — size first, then content — so the two
//! always agree.

use std::sync::Arc;

use fbus_bus::{Bus, Connection, PoolSlice, ReceivePool};
use fbus_error::Result;
use fbus_types::{EntryId, ListFilter, NameFlags};

use crate::registry::NameRegistry;

/// Size of the listing header: one `u64` total size.
pub const LIST_HEADER_SIZE: usize = 8;

/// Size of a record header: four `u64` fields.
pub const RECORD_HEADER_SIZE: usize = 32;

const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn put_u64(pool: &mut ReceivePool, slice: PoolSlice, cursor: &mut usize, value: u64) {
    pool.write(slice, *cursor, &value.to_ne_bytes());
    *cursor += 8;
}

impl NameRegistry {
    /// Serialize the current name table into the requester's receive pool.
    ///
    /// Returns the allocated region; the requester owns it and frees it via
    /// its pool once consumed. The bus connection index is snapshotted
    /// before the registry lock is taken (the bus lock never nests inside
    /// it); the requester's pool lock is taken inside the registry lock.
    pub fn list(
        &self,
        bus: &Bus,
        requester: &Arc<Connection>,
        filter: ListFilter,
    ) -> Result<PoolSlice> {
        let connections = if filter.contains(ListFilter::UNIQUE) {
            bus.connections_snapshot()
        } else {
            Vec::new()
        };

        let inner = self.inner.lock();
        let include_activators = filter.contains(ListFilter::ACTIVATORS);

        // Pass 1: select records and compute the exact output size.
        let unique: Vec<&Arc<Connection>> = connections
            .iter()
            .filter(|c| include_activators || !c.is_activator())
            .collect();

        let mut name_entries: Vec<EntryId> = Vec::new();
        if filter.contains(ListFilter::NAMES) {
            name_entries = inner
                .entries
                .iter()
                .filter(|(_, e)| include_activators || e.activator.is_none())
                .filter(|(_, e)| {
                    filter.contains(ListFilter::QUEUED) || !e.flags.contains(NameFlags::QUEUE)
                })
                .map(|(&eid, _)| eid)
                .collect();
            name_entries.sort_unstable();
        }

        let mut total = LIST_HEADER_SIZE + unique.len() * RECORD_HEADER_SIZE;
        for eid in &name_entries {
            let entry = &inner.entries[eid];
            total += align8(RECORD_HEADER_SIZE + entry.name.len() + 1);
        }

        // Pass 2: allocate and serialize, same selection, same order.
        let mut pool = requester.pool();
        let slice = pool.alloc(total)?;
        let mut cursor = 0_usize;
        put_u64(&mut pool, slice, &mut cursor, total as u64);

        for conn in &unique {
            put_u64(&mut pool, slice, &mut cursor, RECORD_HEADER_SIZE as u64);
            put_u64(&mut pool, slice, &mut cursor, 0);
            put_u64(&mut pool, slice, &mut cursor, conn.id().get());
            put_u64(&mut pool, slice, &mut cursor, conn.flags().bits());
        }

        for eid in &name_entries {
            let entry = &inner.entries[eid];
            let record_start = cursor;
            let record_size = RECORD_HEADER_SIZE + entry.name.len() + 1;
            put_u64(&mut pool, slice, &mut cursor, record_size as u64);
            put_u64(&mut pool, slice, &mut cursor, entry.flags.bits());
            put_u64(&mut pool, slice, &mut cursor, entry.owner.id().get());
            put_u64(&mut pool, slice, &mut cursor, entry.owner.flags().bits());
            pool.write(slice, cursor, entry.name.as_bytes());
            cursor += entry.name.len();
            // NUL terminator plus zero padding to the 8-byte boundary; the
            // pool region may be a reused allocation, so the padding is
            // written, not assumed.
            let record_end = record_start + align8(record_size);
            while cursor < record_end {
                pool.write(slice, cursor, &[0]);
                cursor += 1;
            }
        }

        debug_assert_eq!(cursor, total);
        Ok(slice)
    }
}
