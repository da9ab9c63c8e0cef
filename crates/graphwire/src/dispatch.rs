//! Stream-scoped type-descriptor dispatch (§4.5).
//!
//! The registry (`registry.rs`) is process-wide and long-lived; these tables
//! are rebuilt for every serialize/deserialize operation and track which
//! codec-backed types have already had their full descriptor written (or
//! read), so the second and later occurrences can shrink to a `TypeId`
//! back-reference instead of repeating the type name.

use std::any::TypeId as RustTypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::CodecEntry;

/// Write-side type table: assigns a small stream-local id the first time a
/// Rust type is encountered.
#[derive(Default)]
pub(crate) struct WriteTypeTable {
    next_id: u64,
    ids: HashMap<RustTypeId, u64>,
}

impl WriteTypeTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `(id, true)` if `rust_type` already has a stream-local id
    /// (caller should emit `TypeId`), or `(id, false)` on first occurrence
    /// (caller should emit the full type descriptor).
    pub(crate) fn id_for(&mut self, rust_type: RustTypeId) -> (u64, bool) {
        if let Some(&id) = self.ids.get(&rust_type) {
            return (id, true);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(rust_type, id);
        (id, false)
    }
}

/// One stream-local type-id slot: either a codec-backed object type, or a
/// bare name for a type descriptor with no registered codec (an enum's
/// underlying type, which carries no fields to dispatch through).
pub(crate) enum TypeBinding {
    Codec(Arc<CodecEntry>),
    Name(String),
}

/// Read-side type table: binds stream-local type ids to the registry entry
/// (or bare name) resolved for them the first time their full descriptor is
/// read. Object descriptors and enum descriptors share one id sequence, as
/// they do on the write side's [`WriteTypeTable`].
#[derive(Default)]
pub(crate) struct ReadTypeTable {
    next_id: u64,
    by_id: HashMap<u64, TypeBinding>,
}

impl ReadTypeTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate the next stream-local id and bind it to `codec`, as happens
    /// when a full object type descriptor (not a back-reference) is read.
    pub(crate) fn bind_next_codec(&mut self, codec: Arc<CodecEntry>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(id, TypeBinding::Codec(codec));
        id
    }

    /// Allocate the next stream-local id and bind it to a bare `name`, as
    /// happens when a full enum type descriptor is read.
    pub(crate) fn bind_next_name(&mut self, name: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(id, TypeBinding::Name(name));
        id
    }

    /// Resolve a `TypeId` back-reference that must name a codec-backed type.
    pub(crate) fn get_codec(&self, id: u64) -> Result<Arc<CodecEntry>> {
        match self.by_id.get(&id) {
            Some(TypeBinding::Codec(codec)) => Ok(codec.clone()),
            Some(TypeBinding::Name(_)) => {
                Err(Error::MalformedArchive(format!("type id {id} names an enum type, not an object codec")))
            }
            None => Err(Error::UnknownTypeId(id)),
        }
    }

    /// Resolve a `TypeId` back-reference to its wire name, whichever kind of
    /// descriptor it was bound from.
    pub(crate) fn get_name(&self, id: u64) -> Result<String> {
        match self.by_id.get(&id) {
            Some(TypeBinding::Codec(codec)) => Ok(codec.type_name.to_owned()),
            Some(TypeBinding::Name(name)) => Ok(name.clone()),
            None => Err(Error::UnknownTypeId(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_side_assigns_stable_ids_per_type() {
        let mut table = WriteTypeTable::new();
        let (id1, first1) = table.id_for(RustTypeId::of::<u32>());
        let (id2, first2) = table.id_for(RustTypeId::of::<bool>());
        let (id1_again, first1_again) = table.id_for(RustTypeId::of::<u32>());
        assert!(!first1);
        assert!(!first2);
        assert!(first1_again);
        assert_eq!(id1, id1_again);
        assert_ne!(id1, id2);
    }

    #[test]
    fn read_side_errors_on_unknown_back_reference() {
        let table = ReadTypeTable::new();
        assert!(matches!(table.get_codec(0), Err(Error::UnknownTypeId(0))));
        assert!(matches!(table.get_name(0), Err(Error::UnknownTypeId(0))));
    }

    #[test]
    fn object_and_enum_descriptors_share_one_id_sequence() {
        let mut table = ReadTypeTable::new();
        let name_id = table.bind_next_name("graphwire::tests::Color".to_owned());
        assert_eq!(table.get_name(name_id).unwrap(), "graphwire::tests::Color");
        assert!(matches!(table.get_codec(name_id), Err(Error::MalformedArchive(_))));
    }
}
