//! The top-level entry point: wraps the stream header, the type registry
//! snapshot, and one fresh pair of identity/type tables around a single
//! write or read operation (§4.9, §6).

use std::any::TypeId as RustTypeId;
use std::collections::HashMap;
use std::io::{Cursor, Read};

use graphwire_core::endian::Endianness;

use crate::archive::{NodeRef, Optimization, ReadArchive, WriteArchive};
use crate::dispatch::{ReadTypeTable, WriteTypeTable};
use crate::error::{Error, Result};
use crate::identity::{ReadIdentityTable, WriteIdentityTable};
use crate::registry::RegistryHandle;

const MAGIC: &[u8; 4] = b"GRPH";
const FORMAT_VERSION: u16 = 1;

/// Whether a [`Serializer`] writes the leading stream header (magic,
/// version, endianness, optimization byte) or starts directly at the root
/// object with a caller-fixed endianness — the latter for embedding a
/// graphwire payload inside a larger framed protocol that already carries
/// this information (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPolicy {
    /// Write/expect the full stream header; the endianness negotiated for
    /// the operation is this host's own (on write) or whatever the header
    /// declares (on read).
    EmitHeader,
    /// Skip the header; every multi-byte primitive is read and written in
    /// the given endianness instead of whatever the header would have
    /// declared. The caller is responsible for agreeing on optimization
    /// mode out of band.
    FixedEndianness(Endianness),
}

/// Per-operation tuning for a [`Serializer`].
#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// Integer encoding preference (§3, §4.1).
    pub optimization: Optimization,
    /// Whether to emit/expect the stream header.
    pub header_policy: HeaderPolicy,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self { optimization: Optimization::Size, header_policy: HeaderPolicy::EmitHeader }
    }
}

/// The versions a [`Serializer`] will write for specific Rust types, overriding
/// each codec's own `current_version` — set this when producing output that
/// must still be readable by consumers pinned to an older version of a type.
#[derive(Debug, Clone, Default)]
pub struct SerializerVersionTable {
    overrides: HashMap<RustTypeId, u32>,
}

impl SerializerVersionTable {
    /// Create an empty table: every type writes at its codec's current
    /// version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `T` to be written at `version` instead of its codec's current
    /// version.
    pub fn set_serializer_version<T: 'static>(&mut self, version: u32) {
        self.overrides.insert(RustTypeId::of::<T>(), version);
    }

    /// The version currently set for `T`, if any override was configured.
    #[must_use]
    pub fn get_serializer_version<T: 'static>(&self) -> Option<u32> {
        self.overrides.get(&RustTypeId::of::<T>()).copied()
    }
}

/// Serializes and deserializes a root [`NodeRef`] and everything reachable
/// from it, through whatever codecs are registered process-wide (see
/// [`crate::registry`]).
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    config: SerializerConfig,
    versions: SerializerVersionTable,
}

impl Serializer {
    /// Build a serializer with the given configuration.
    #[must_use]
    pub fn new(config: SerializerConfig) -> Self {
        Self { config, versions: SerializerVersionTable::new() }
    }

    /// Override the version written for `T`; see
    /// [`SerializerVersionTable::set_serializer_version`].
    pub fn set_serializer_version<T: 'static>(&mut self, version: u32) {
        self.versions.set_serializer_version::<T>(version);
    }

    /// The version currently configured for `T`, if any.
    #[must_use]
    pub fn get_serializer_version<T: 'static>(&self) -> Option<u32> {
        self.versions.get_serializer_version::<T>()
    }

    /// Serialize `value` and everything reachable from it into a freshly
    /// allocated buffer.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub fn write(&self, value: &NodeRef) -> Result<Vec<u8>> {
        let endianness = match self.config.header_policy {
            HeaderPolicy::EmitHeader => Endianness::host(),
            HeaderPolicy::FixedEndianness(fixed) => fixed,
        };

        let mut buf = Vec::new();
        if self.config.header_policy == HeaderPolicy::EmitHeader {
            buf.extend_from_slice(MAGIC);
            buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
            buf.push(u8::from(endianness.header_bit()));
            buf.push(match self.config.optimization {
                Optimization::Speed => 0,
                Optimization::Size => 1,
            });
        }

        let mut types = WriteTypeTable::new();
        let mut objects = WriteIdentityTable::new();
        let mut archive = WriteArchive {
            buf: &mut buf,
            registry: RegistryHandle::current(),
            types: &mut types,
            objects: &mut objects,
            optimization: self.config.optimization,
            endianness,
            version_overrides: &self.versions.overrides,
        };
        archive.write_node(Some(value))?;
        #[cfg(feature = "tracing")]
        tracing::debug!(bytes = buf.len(), "wrote object graph");
        Ok(buf)
    }

    /// Deserialize a root object and everything reachable from it out of
    /// `bytes`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub fn read(&self, bytes: &[u8]) -> Result<NodeRef> {
        let mut cursor = Cursor::new(bytes);
        let endianness = match self.config.header_policy {
            HeaderPolicy::EmitHeader => {
                let mut magic = [0u8; 4];
                cursor.read_exact(&mut magic).map_err(Error::Io)?;
                if &magic != MAGIC {
                    return Err(Error::MalformedArchive("bad stream magic".to_owned()));
                }
                let mut version_bytes = [0u8; 2];
                cursor.read_exact(&mut version_bytes).map_err(Error::Io)?;
                let stream_version = u16::from_le_bytes(version_bytes);
                if stream_version > FORMAT_VERSION {
                    return Err(Error::StreamVersionNotSupported {
                        stream_version: u32::from(stream_version),
                        max_supported: u32::from(FORMAT_VERSION),
                    });
                }
                let mut rest = [0u8; 2];
                cursor.read_exact(&mut rest).map_err(Error::Io)?;
                Endianness::from_header_bit(rest[0] != 0)
            }
            HeaderPolicy::FixedEndianness(fixed) => fixed,
        };

        let mut types = ReadTypeTable::new();
        let mut objects = ReadIdentityTable::new();
        let mut archive = ReadArchive {
            backing: &mut cursor,
            registry: RegistryHandle::current(),
            types: &mut types,
            objects: &mut objects,
            endianness,
        };
        archive.read_node()?.ok_or_else(|| Error::MalformedArchive("root object was null".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{register_internal, InternalCodec};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl InternalCodec for Point {
        fn type_name() -> &'static str {
            "serializer::tests::Point"
        }
        fn current_version() -> u32 {
            1
        }
        fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()> {
            archive.write_i32(self.x)?;
            archive.write_i32(self.y)
        }
        fn read_fields(archive: &mut ReadArchive<'_>, _version: u32) -> Result<Self> {
            Ok(Self { x: archive.read_i32()?, y: archive.read_i32()? })
        }
    }

    #[test]
    fn round_trips_a_single_object() {
        let _ = register_internal::<Point>();
        let serializer = Serializer::default();
        let value: NodeRef = Arc::new(Point { x: 7, y: -9 });
        let bytes = serializer.write(&value).unwrap();
        let decoded = serializer.read(&bytes).unwrap();
        let decoded = decoded.downcast_ref::<Point>().unwrap();
        assert_eq!(*decoded, Point { x: 7, y: -9 });
    }

    #[test]
    fn rejects_a_stream_with_the_wrong_magic() {
        let serializer = Serializer::default();
        let err = serializer.read(b"nope").unwrap_err();
        assert!(matches!(err, Error::MalformedArchive(_)) || matches!(err, Error::Io(_)));
    }

    #[test]
    fn rejects_a_stream_version_newer_than_this_build_supports() {
        let serializer = Serializer::default();
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        bytes.push(1);
        bytes.push(0);
        let err = serializer.read(&bytes).unwrap_err();
        assert!(matches!(err, Error::StreamVersionNotSupported { .. }));
    }

    #[test]
    fn fixed_endianness_round_trips_without_a_header() {
        let _ = register_internal::<Point>();
        let config = SerializerConfig {
            optimization: Optimization::Speed,
            header_policy: HeaderPolicy::FixedEndianness(Endianness::Big),
        };
        let serializer = Serializer::new(config);
        let value: NodeRef = Arc::new(Point { x: 3, y: -4 });
        let bytes = serializer.write(&value).unwrap();
        let decoded = serializer.read(&bytes).unwrap();
        assert_eq!(*decoded.downcast_ref::<Point>().unwrap(), Point { x: 3, y: -4 });
    }
}
