//! Errors surfaced by the registry, the archive layer, and the top-level
//! serializer (§7, §11).

use thiserror::Error;

/// Result alias used throughout `graphwire`.
pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong above the leaf-primitive layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A `TypeId` back-reference pointed at a type descriptor that was never
    /// emitted earlier in this operation.
    #[error("unknown type id: {0}")]
    UnknownTypeId(u64),

    /// An `AlreadySerialized` back-reference pointed at an object id that was
    /// never emitted earlier in this operation.
    #[error("unknown object id: {0}")]
    UnknownObjectId(u64),

    /// A type name appeared on the wire with no codec registered for it.
    #[error("no codec registered for type `{name}`")]
    UnknownType {
        /// The full type name read from the stream.
        name: String,
    },

    /// A codec's on-wire version is newer than anything this build knows how
    /// to read.
    #[error("type `{type_name}` version {requested} is not supported (max supported: {max_supported})")]
    VersionNotSupported {
        /// The type whose version could not be satisfied.
        type_name: String,
        /// The version requested by the stream.
        requested: u32,
        /// The newest version this build's codec can read.
        max_supported: u32,
    },

    /// A codec was registered in a way that violates the registry's
    /// invariants (e.g. two codecs for the same `TypeId`, or a missing
    /// default constructor for a type needed mid-cycle).
    #[error("codec misconfigured for type `{type_name}`: {reason}")]
    CodecMisconfigured {
        /// The offending type.
        type_name: String,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// An `ArchiveStart`/`ArchiveEnd` pair did not balance, or a base-archive
    /// nested in the wrong place.
    #[error("malformed archive framing: {0}")]
    MalformedArchive(String),

    /// The stream's recorded format version is newer than this build
    /// supports.
    #[error("stream version {stream_version} is newer than the max supported version {max_supported}")]
    StreamVersionNotSupported {
        /// Version recorded in the stream header.
        stream_version: u32,
        /// Newest stream version this build can read.
        max_supported: u32,
    },

    /// Propagated from the leaf-primitive layer (LEB128 overflow, invalid
    /// tag, unexpected end of stream, closed stream view, ...).
    #[error(transparent)]
    Core(#[from] graphwire_core::error::CoreError),

    /// Propagated from the backing `std::io` stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
