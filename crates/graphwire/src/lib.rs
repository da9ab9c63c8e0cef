//! A self-describing, versioned, endianness-aware binary serializer for
//! object graphs, built on [`graphwire_core`]'s LEB128 codec, payload-tag
//! alphabet, and restricted stream view.
//!
//! A type opts in by implementing [`registry::InternalCodec`] (or by
//! registering an [`registry::ExternalCodec`] for a foreign type) and
//! calling [`registry::register_internal`]. A [`serializer::Serializer`]
//! then walks a root [`archive::NodeRef`] and everything reachable from it,
//! deduplicating shared references and breaking cycles via
//! [`archive::WriteArchive::write_node`]/[`archive::ReadArchive::read_node`].

pub mod archive;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod registry;
pub mod serializer;

pub use archive::{NodeRef, Optimization, ReadArchive, WriteArchive};
pub use error::{Error, Result};
pub use registry::{
    register_cyclic, register_external_codec, register_internal, CyclicInternalCodec, ExternalCodec,
    InternalCodec,
};
pub use serializer::{HeaderPolicy, Serializer, SerializerConfig, SerializerVersionTable};

/// Re-exports of the types most call sites need.
pub mod prelude {
    pub use crate::archive::{NodeRef, Optimization, ReadArchive, WriteArchive};
    pub use crate::error::{Error, Result};
    pub use crate::registry::{
        register_cyclic, register_external_codec, register_internal, CyclicInternalCodec, ExternalCodec,
        InternalCodec,
    };
    pub use crate::serializer::{HeaderPolicy, Serializer, SerializerConfig, SerializerVersionTable};
}
