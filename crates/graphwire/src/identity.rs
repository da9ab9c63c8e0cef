//! Object-identity tables (§4.6).
//!
//! The teacher's `Module` has no notion of shared/cyclic references — every
//! section is a flat array. Object identity is the one component with no
//! direct analogue there, so it is built from first principles: on the write
//! side, identity is the object's heap address (`Arc::as_ptr`), exactly as
//! the source tracks .NET reference identity; on the read side, identity is
//! the small integer id allocated the first time a reference is seen, used to
//! satisfy any `AlreadySerialized` back-reference emitted before the
//! referenced object has finished decoding (the two-phase construct that
//! makes cycles representable).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Tracks, for one write operation, which objects have already been assigned
/// a wire id.
#[derive(Default)]
pub(crate) struct WriteIdentityTable {
    next_id: u64,
    seen: HashMap<usize, u64>,
}

impl WriteIdentityTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up or allocate a wire id for the object at `ptr`.
    ///
    /// Returns `(id, true)` if this exact address was already assigned an id
    /// earlier in the operation (caller should emit `AlreadySerialized`), or
    /// `(id, false)` on first occurrence (caller should emit the full value
    /// and the id must be recorded before recursing into it, so a self-cycle
    /// resolves to an `AlreadySerialized` rather than infinite recursion).
    pub(crate) fn mark_or_get(&mut self, ptr: *const ()) -> (u64, bool) {
        let key = ptr as usize;
        if let Some(&id) = self.seen.get(&key) {
            return (id, true);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.seen.insert(key, id);
        (id, false)
    }
}

/// Tracks, for one read operation, objects under construction or already
/// constructed, keyed by the wire id allocated for them.
#[derive(Default)]
pub(crate) struct ReadIdentityTable {
    next_id: u64,
    by_id: HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl ReadIdentityTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate the next wire id, to be bound once the object it names
    /// finishes constructing.
    pub(crate) fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Bind a freshly constructed object to the id allocated for it.
    pub(crate) fn bind(&mut self, id: u64, value: Arc<dyn Any + Send + Sync>) {
        self.by_id.insert(id, value);
    }

    /// Resolve an `AlreadySerialized` back-reference.
    pub(crate) fn get(&self, id: u64) -> Option<Arc<dyn Any + Send + Sync>> {
        self.by_id.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_side_assigns_stable_ids_per_address() {
        let a = 1u32;
        let b = 2u32;
        let mut table = WriteIdentityTable::new();
        let (id_a1, seen_a1) = table.mark_or_get(std::ptr::addr_of!(a).cast());
        let (id_b, seen_b) = table.mark_or_get(std::ptr::addr_of!(b).cast());
        let (id_a2, seen_a2) = table.mark_or_get(std::ptr::addr_of!(a).cast());
        assert!(!seen_a1);
        assert!(!seen_b);
        assert!(seen_a2);
        assert_eq!(id_a1, id_a2);
        assert_ne!(id_a1, id_b);
    }

    #[test]
    fn read_side_resolves_after_bind() {
        let mut table = ReadIdentityTable::new();
        let id = table.allocate();
        assert!(table.get(id).is_none());
        table.bind(id, Arc::new(42u32));
        assert_eq!(*table.get(id).unwrap().downcast_ref::<u32>().unwrap(), 42);
    }
}
