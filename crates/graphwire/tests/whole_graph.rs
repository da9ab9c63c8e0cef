//! Whole-graph round-trip scenarios that wire multiple modules together:
//! the registry, the archive's identity tables, and the top-level
//! serializer's header handling.

use graphwire::{
    register_cyclic, register_internal, CyclicInternalCodec, Error, HeaderPolicy, InternalCodec, NodeRef,
    ReadArchive, Result, Serializer, SerializerConfig, WriteArchive,
};
use graphwire_core::endian::Endianness;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct Leaf {
    value: i32,
}

impl InternalCodec for Leaf {
    fn type_name() -> &'static str {
        "whole_graph::Leaf"
    }
    fn current_version() -> u32 {
        1
    }
    fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()> {
        archive.write_i32(self.value)
    }
    fn read_fields(archive: &mut ReadArchive<'_>, _version: u32) -> Result<Self> {
        Ok(Self { value: archive.read_i32()? })
    }
}

#[derive(Debug)]
struct Pair {
    a: NodeRef,
    b: NodeRef,
}

impl InternalCodec for Pair {
    fn type_name() -> &'static str {
        "whole_graph::Pair"
    }
    fn current_version() -> u32 {
        1
    }
    fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()> {
        archive.write_node(Some(&self.a))?;
        archive.write_node(Some(&self.b))
    }
    fn read_fields(archive: &mut ReadArchive<'_>, _version: u32) -> Result<Self> {
        let a = archive.read_node()?.expect("a");
        let b = archive.read_node()?.expect("b");
        Ok(Self { a, b })
    }
}

#[derive(Debug, Default)]
struct Ring {
    label: std::sync::RwLock<String>,
    next: std::sync::RwLock<Option<NodeRef>>,
}

impl CyclicInternalCodec for Ring {
    fn type_name() -> &'static str {
        "whole_graph::Ring"
    }
    fn current_version() -> u32 {
        1
    }
    fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()> {
        archive.write_string(&self.label.read().unwrap())?;
        archive.write_node(self.next.read().unwrap().as_ref())
    }
    fn populate_fields(&self, archive: &mut ReadArchive<'_>, _version: u32) -> Result<()> {
        *self.label.write().unwrap() = archive.read_string()?;
        *self.next.write().unwrap() = archive.read_node()?;
        Ok(())
    }
}

#[test]
fn deduplicates_a_shared_reference() {
    let _ = register_internal::<Leaf>();
    let _ = register_internal::<Pair>();

    let shared: NodeRef = Arc::new(Leaf { value: 42 });
    let pair: NodeRef = Arc::new(Pair { a: shared.clone(), b: shared.clone() });
    let serializer = Serializer::default();
    let bytes = serializer.write(&pair).unwrap();
    let decoded = serializer.read(&bytes).unwrap();
    let decoded = decoded.downcast_ref::<Pair>().unwrap();
    assert_eq!(*decoded.a.downcast_ref::<Leaf>().unwrap(), Leaf { value: 42 });
    assert!(Arc::ptr_eq(&decoded.a, &decoded.b));
}

#[test]
fn a_self_referencing_object_round_trips_without_infinite_recursion() {
    register_cyclic::<Ring>().unwrap();
    let ring: Arc<Ring> = Arc::new(Ring::default());
    *ring.label.write().unwrap() = "solo".to_owned();
    *ring.next.write().unwrap() = Some(ring.clone() as NodeRef);

    let serializer = Serializer::default();
    let root: NodeRef = ring.clone() as NodeRef;
    let bytes = serializer.write(&root).unwrap();
    let decoded_root = serializer.read(&bytes).unwrap();
    let decoded = decoded_root.downcast_ref::<Ring>().unwrap();
    assert_eq!(*decoded.label.read().unwrap(), "solo");
    let next = decoded.next.read().unwrap().clone().unwrap();
    assert_eq!(*next.downcast_ref::<Ring>().unwrap().label.read().unwrap(), "solo");
    assert!(Arc::ptr_eq(&next, &decoded_root));
}

/// Testable Property #2: a stream produced by an emitter of one endianness
/// decodes identically on a consumer of the other, across a graph that
/// exercises identity dedup as well as plain scalars.
#[test]
fn a_graph_written_big_endian_decodes_identically_on_this_host() {
    let _ = register_internal::<Leaf>();
    let _ = register_internal::<Pair>();

    let shared: NodeRef = Arc::new(Leaf { value: -12_345 });
    let pair: NodeRef = Arc::new(Pair { a: shared.clone(), b: shared.clone() });

    // Force the emitted endianness to the opposite of whatever this host
    // actually is, then decode with a reader pinned to that same fixed
    // endianness — equivalent to a cross-endian emitter/consumer pair.
    let opposite = match Endianness::host() {
        Endianness::Little => Endianness::Big,
        Endianness::Big => Endianness::Little,
    };
    let fixed_writer = Serializer::new(SerializerConfig {
        optimization: graphwire::Optimization::Speed,
        header_policy: HeaderPolicy::FixedEndianness(opposite),
    });

    let bytes = fixed_writer.write(&pair).unwrap();
    let reader = Serializer::new(SerializerConfig {
        optimization: graphwire::Optimization::Speed,
        header_policy: HeaderPolicy::FixedEndianness(opposite),
    });
    let decoded = reader.read(&bytes).unwrap();
    let decoded = decoded.downcast_ref::<Pair>().unwrap();
    assert_eq!(*decoded.a.downcast_ref::<Leaf>().unwrap(), Leaf { value: -12_345 });
    assert!(Arc::ptr_eq(&decoded.a, &decoded.b));
}

#[derive(Debug, PartialEq)]
struct Versioned {
    value: i32,
}

impl InternalCodec for Versioned {
    fn type_name() -> &'static str {
        "whole_graph::Versioned"
    }
    fn current_version() -> u32 {
        1
    }
    fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()> {
        archive.write_i32(self.value)
    }
    fn read_fields(archive: &mut ReadArchive<'_>, _version: u32) -> Result<Self> {
        Ok(Self { value: archive.read_i32()? })
    }
}

/// Testable Property #9: a codec declaring max version `V` given requested
/// version `V+1` fails with `VersionNotSupported{V+1, V}`.
#[test]
fn a_newer_version_than_the_codec_supports_is_refused() {
    register_internal::<Versioned>().unwrap();
    let mut serializer = Serializer::default();
    serializer.set_serializer_version::<Versioned>(2);

    let value: NodeRef = Arc::new(Versioned { value: 7 });
    let bytes = serializer.write(&value).unwrap();

    let reader = Serializer::default();
    let err = reader.read(&bytes).unwrap_err();
    match err {
        Error::VersionNotSupported { requested, max_supported, .. } => {
            assert_eq!(requested, 2);
            assert_eq!(max_supported, 1);
        }
        other => panic!("expected VersionNotSupported, got {other:?}"),
    }
}
