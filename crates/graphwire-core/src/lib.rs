//! Leaf primitives for the graphwire wire format: LEB128/SLEB128 varint
//! coding, endianness helpers, the payload-tag alphabet, and a bounded
//! stream view. No object model, no registry, no archives — those live in
//! the `graphwire` crate built on top of this one.
//!
//! `no_std` with `alloc` when the `std` feature is disabled; `std` is on by
//! default and is required for [`stream`].

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod endian;
pub mod error;
pub mod leb128;
pub mod tag;

#[cfg(feature = "std")]
pub mod stream;

/// Re-exports of the types most call sites need.
pub mod prelude {
    pub use crate::endian::Endianness;
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::tag::PayloadTag;

    #[cfg(feature = "std")]
    pub use crate::stream::RestrictedStreamView;
}
