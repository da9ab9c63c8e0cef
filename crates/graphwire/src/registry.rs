//! Process-wide type registry (§4.4, §5).
//!
//! Registration is explicit — there is no reflection-based auto-discovery.
//! The live registry is an immutable [`RegistrySnapshot`] published behind a
//! lock; readers take a cheap `Arc` clone and never block a writer, mirroring
//! the teacher's snapshot-publishing pattern for its section tables.

use std::any::{Any, TypeId as RustTypeId};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::archive::{ReadArchive, WriteArchive};
use crate::error::{Error, Result};

/// A boxed, type-erased object produced by a codec's reader.
pub type AnyNode = Arc<dyn Any + Send + Sync>;

/// A type that can serialize and deserialize itself through an archive.
///
/// Implemented directly on the concrete type; [`register_internal`] adapts it
/// into the process-wide registry.
pub trait InternalCodec: Any + Send + Sync + Sized {
    /// The name recorded on the wire for first occurrences of this type.
    /// Stable across releases — renaming it breaks every stream written
    /// against the old name.
    fn type_name() -> &'static str;

    /// The version this build writes. Must be bumped whenever
    /// [`Self::write_fields`]'s wire shape changes.
    fn current_version() -> u32;

    /// Write this value's fields into an open archive body.
    fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()>;

    /// Reconstruct a value from an open archive body written at `version`.
    fn read_fields(archive: &mut ReadArchive<'_>, version: u32) -> Result<Self>;
}

/// An [`InternalCodec`] variant for types that may legitimately reference
/// themselves, directly or through a longer cycle.
///
/// A plain [`InternalCodec`] cannot support this: its identity is bound only
/// once `read_fields` returns a finished value, so a field that points back
/// into the object under construction sees an unbound id and fails. A cyclic
/// codec instead default-constructs a shell, lets the registry bind that
/// shell's identity immediately, and only then runs [`Self::populate_fields`]
/// to fill it in through interior mutability — by the time a self-reference
/// is read back, its own id already resolves to the (still-filling-in) shell.
pub trait CyclicInternalCodec: Any + Send + Sync + Default {
    /// The name recorded on the wire for first occurrences of this type.
    fn type_name() -> &'static str;
    /// The version this build writes.
    fn current_version() -> u32;
    /// Write this value's fields into an open archive body.
    fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()>;
    /// Fill in a freshly default-constructed, already-identity-bound shell
    /// from an open archive body written at `version`.
    fn populate_fields(&self, archive: &mut ReadArchive<'_>, version: u32) -> Result<()>;
}

/// A codec registered for a type that cannot implement [`InternalCodec`]
/// itself (a foreign type, or one with multiple wire shapes).
pub trait ExternalCodec: Send + Sync {
    /// The name recorded on the wire for first occurrences of this type.
    fn type_name(&self) -> &'static str;
    /// The version this build writes.
    fn current_version(&self) -> u32;
    /// Write `value`'s fields into an open archive body. `value` is the same
    /// concrete type this codec was registered for.
    fn write(&self, value: &(dyn Any + Send + Sync), archive: &mut WriteArchive<'_>) -> Result<()>;
    /// Reconstruct a type-erased value from an open archive body written at
    /// `version`.
    fn read(&self, archive: &mut ReadArchive<'_>, version: u32) -> Result<AnyNode>;
}

pub(crate) struct CodecEntry {
    pub(crate) rust_type: RustTypeId,
    pub(crate) type_name: &'static str,
    pub(crate) current_version: u32,
    write: Box<dyn Fn(&(dyn Any + Send + Sync), &mut WriteArchive<'_>) -> Result<()> + Send + Sync>,
    /// Takes the identity id already allocated for the object being read, so
    /// a cyclic codec can bind its shell before populating it. Non-cyclic
    /// codecs simply ignore it; [`ReadArchive::read_node`] binds the
    /// finished value again once this returns, which is a harmless no-op
    /// for a codec that already bound it itself.
    read: Box<dyn Fn(u64, &mut ReadArchive<'_>, u32) -> Result<AnyNode> + Send + Sync>,
}

impl CodecEntry {
    pub(crate) fn write(&self, value: &(dyn Any + Send + Sync), archive: &mut WriteArchive<'_>) -> Result<()> {
        (self.write)(value, archive)
    }

    pub(crate) fn read(&self, id: u64, archive: &mut ReadArchive<'_>, version: u32) -> Result<AnyNode> {
        (self.read)(id, archive, version)
    }
}

#[derive(Default)]
struct RegistrySnapshot {
    by_rust_type: HashMap<RustTypeId, Arc<CodecEntry>>,
    by_name: HashMap<&'static str, Arc<CodecEntry>>,
}

static REGISTRY: Lazy<RwLock<Arc<RegistrySnapshot>>> =
    Lazy::new(|| RwLock::new(Arc::new(RegistrySnapshot::default())));

/// Snapshot of the registry as of the moment it was taken; handed to one
/// [`crate::serializer::Serializer`] operation so concurrent registrations
/// elsewhere cannot change the meaning of an in-flight read or write.
#[derive(Clone)]
pub(crate) struct RegistryHandle(Arc<RegistrySnapshot>);

impl RegistryHandle {
    pub(crate) fn current() -> Self {
        Self(REGISTRY.read().clone())
    }

    pub(crate) fn by_rust_type(&self, id: RustTypeId) -> Option<Arc<CodecEntry>> {
        self.0.by_rust_type.get(&id).cloned()
    }

    pub(crate) fn by_name(&self, name: &str) -> Result<Arc<CodecEntry>> {
        self.0
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType { name: name.to_owned() })
    }
}

fn publish(mutate: impl FnOnce(&mut RegistrySnapshot)) {
    let mut guard = REGISTRY.write();
    let mut next = RegistrySnapshot {
        by_rust_type: guard.by_rust_type.clone(),
        by_name: guard.by_name.clone(),
    };
    mutate(&mut next);
    *guard = Arc::new(next);
}

/// Insert `entry` into the registry.
///
/// `allow_replace` distinguishes the two registration paths §4.4 describes:
/// an internal/cyclic codec binds a concrete Rust type to its own `TypeId`
/// exactly once, so a second registration for the same type is rejected
/// outright; an external codec may legitimately be re-registered (e.g. to
/// swap in a different wire adapter for a foreign type), so the last
/// registration wins there.
fn insert_entry(entry: CodecEntry, allow_replace: bool) -> Result<()> {
    if let Some(existing) = REGISTRY.read().by_rust_type.get(&entry.rust_type) {
        if existing.type_name != entry.type_name {
            return Err(Error::CodecMisconfigured {
                type_name: entry.type_name.to_owned(),
                reason: format!(
                    "type already registered under a different wire name `{}`",
                    existing.type_name
                ),
            });
        }
        if !allow_replace {
            return Err(Error::CodecMisconfigured {
                type_name: entry.type_name.to_owned(),
                reason: "type already registered; a concrete type may register under its own \
                         TypeId exactly once"
                    .to_owned(),
            });
        }
    }
    if let Some(existing) = REGISTRY.read().by_name.get(entry.type_name) {
        if existing.rust_type != entry.rust_type {
            return Err(Error::CodecMisconfigured {
                type_name: entry.type_name.to_owned(),
                reason: "wire name already claimed by a different Rust type".to_owned(),
            });
        }
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(type_name = entry.type_name, "registering codec");
    let entry = Arc::new(entry);
    publish(|next| {
        next.by_rust_type.insert(entry.rust_type, entry.clone());
        next.by_name.insert(entry.type_name, entry);
    });
    Ok(())
}

/// Register `T` as a codec-backed type, using its own [`InternalCodec`]
/// implementation. A concrete type may only register under its own `TypeId`
/// once — registering the same type again returns
/// [`Error::CodecMisconfigured`].
pub fn register_internal<T: InternalCodec + 'static>() -> Result<()> {
    let rust_type = RustTypeId::of::<T>();
    let type_name = T::type_name();
    let current_version = T::current_version();
    let write = Box::new(move |value: &(dyn Any + Send + Sync), archive: &mut WriteArchive<'_>| {
        let value = value
            .downcast_ref::<T>()
            .expect("codec dispatch guarantees the concrete type matches");
        value.write_fields(archive)
    });
    let read = Box::new(move |_id: u64, archive: &mut ReadArchive<'_>, version: u32| {
        let value = T::read_fields(archive, version)?;
        Ok(Arc::new(value) as AnyNode)
    });
    insert_entry(CodecEntry { rust_type, type_name, current_version, write, read }, false)
}

/// Register `T` as a codec-backed type using its [`CyclicInternalCodec`]
/// implementation, supporting self- and mutually-referencing graphs. A
/// concrete type may only register under its own `TypeId` once.
pub fn register_cyclic<T: CyclicInternalCodec + 'static>() -> Result<()> {
    let rust_type = RustTypeId::of::<T>();
    let type_name = T::type_name();
    let current_version = T::current_version();
    let write = Box::new(move |value: &(dyn Any + Send + Sync), archive: &mut WriteArchive<'_>| {
        let value = value
            .downcast_ref::<T>()
            .expect("codec dispatch guarantees the concrete type matches");
        value.write_fields(archive)
    });
    let read = Box::new(move |id: u64, archive: &mut ReadArchive<'_>, version: u32| {
        let shell = Arc::new(T::default());
        let any: AnyNode = shell.clone();
        archive.bind_object(id, any.clone());
        shell.populate_fields(archive, version)?;
        Ok(any)
    });
    insert_entry(CodecEntry { rust_type, type_name, current_version, write, read }, false)
}

/// Register an [`ExternalCodec`] for the Rust type identified by
/// `rust_type`, typically `TypeId::of::<Foo>()`. Registering the same
/// `rust_type` again replaces the previous codec.
pub fn register_external_codec<C: ExternalCodec + 'static>(
    rust_type: RustTypeId,
    codec: C,
) -> Result<()> {
    let codec = Arc::new(codec);
    let type_name = codec.type_name();
    let current_version = codec.current_version();
    let write_codec = codec.clone();
    let write = Box::new(move |value: &(dyn Any + Send + Sync), archive: &mut WriteArchive<'_>| {
        write_codec.write(value, archive)
    });
    let read_codec = codec;
    let read = Box::new(move |_id: u64, archive: &mut ReadArchive<'_>, version: u32| {
        read_codec.read(archive, version)
    });
    insert_entry(CodecEntry { rust_type, type_name, current_version, write, read }, true)
}
