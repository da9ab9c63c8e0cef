//! Write-side and read-side archive contracts (§4.7).
//!
//! An archive is the scoped read/write context a codec's `write_fields`/
//! `read_fields` runs inside: primitive accessors, object-reference
//! accessors (with identity and cycle support), and `open_base_archive` for
//! a base type's fields nested inside a derived type's body.

use std::any::{Any, TypeId as RustTypeId};
use std::collections::HashMap;
use std::sync::Arc;

use graphwire_core::endian::{
    conditional_swap_f32, conditional_swap_f64, conditional_swap_u16, conditional_swap_u32, conditional_swap_u64,
    conditional_swap_u128, Endianness,
};
use graphwire_core::error::{CoreError, CoreResult};
use graphwire_core::leb128::{self, ByteSource};
use graphwire_core::stream::{ReadSeek, RestrictedStreamView};
use graphwire_core::tag::PayloadTag;

use crate::dispatch::{ReadTypeTable, WriteTypeTable};
use crate::error::{Error, Result};
use crate::identity::{ReadIdentityTable, WriteIdentityTable};
use crate::registry::RegistryHandle;

/// A type-erased, reference-counted handle to a codec-backed object. The
/// idiomatic replacement for reference-equality-based identity: two
/// [`NodeRef`]s are the same object iff `Arc::ptr_eq` holds.
pub type NodeRef = Arc<dyn Any + Send + Sync>;

/// Controls whether integers prefer their fixed-width native encoding or
/// shrink to LEB128 when that is shorter (§3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Optimization {
    /// Always use the fixed-width native tag; cheapest to decode.
    Speed,
    /// Use LEB128 whenever it is no longer than the native encoding.
    Size,
}

fn leb128_shorter_u64(v: u64, native_bytes: u8) -> bool {
    leb128::byte_count_u64(v) < native_bytes
}

fn leb128_shorter_i64(v: i64, native_bytes: u8) -> bool {
    leb128::byte_count_i64(v) < native_bytes
}

/// The write side of an archive: appends a program's worth of tagged values
/// to an in-memory buffer.
pub struct WriteArchive<'a> {
    pub(crate) buf: &'a mut Vec<u8>,
    pub(crate) registry: RegistryHandle,
    pub(crate) types: &'a mut WriteTypeTable,
    pub(crate) objects: &'a mut WriteIdentityTable,
    pub(crate) optimization: Optimization,
    /// The endianness this operation records in the stream header (or the
    /// fixed endianness configured in place of one) — every multi-byte
    /// native primitive is written in this byte order (§4.2, §4.8.1(1)).
    pub(crate) endianness: Endianness,
    /// Per-type version to write instead of the codec's `current_version`,
    /// set via `Serializer::set_serializer_version` for backward-compatible
    /// output.
    pub(crate) version_overrides: &'a HashMap<RustTypeId, u32>,
}

impl<'a> WriteArchive<'a> {
    fn tag(&mut self, tag: PayloadTag) {
        self.buf.push(tag.to_u8());
    }

    /// Write a 16-bit word, converted from host order to this archive's
    /// stream endianness.
    fn put_u16(&mut self, v: u16) {
        let v = conditional_swap_u16(v, Endianness::host(), self.endianness);
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    /// Write a 32-bit word, converted from host order to this archive's
    /// stream endianness.
    fn put_u32(&mut self, v: u32) {
        let v = conditional_swap_u32(v, Endianness::host(), self.endianness);
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    /// Write a 64-bit word, converted from host order to this archive's
    /// stream endianness.
    fn put_u64(&mut self, v: u64) {
        let v = conditional_swap_u64(v, Endianness::host(), self.endianness);
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    /// Write a 128-bit word, converted from host order to this archive's
    /// stream endianness.
    fn put_u128(&mut self, v: u128) {
        let v = conditional_swap_u128(v, Endianness::host(), self.endianness);
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    /// Write a 32-bit float, converted from host order to this archive's
    /// stream endianness.
    fn put_f32(&mut self, v: f32) {
        let v = conditional_swap_f32(v, Endianness::host(), self.endianness);
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    /// Write a 64-bit float, converted from host order to this archive's
    /// stream endianness.
    fn put_f64(&mut self, v: f64) {
        let v = conditional_swap_f64(v, Endianness::host(), self.endianness);
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    /// Write a boolean.
    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.tag(if v { PayloadTag::BooleanTrue } else { PayloadTag::BooleanFalse });
        Ok(())
    }

    /// Write a signed 32-bit integer, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        if self.optimization == Optimization::Size && leb128_shorter_i64(i64::from(v), 4) {
            self.tag(PayloadTag::Int32Leb128);
            leb128::write_i32(self.buf, v);
        } else {
            self.tag(PayloadTag::Int32Native);
            self.put_u32(v as u32);
        }
        Ok(())
    }

    /// Write an unsigned 32-bit integer, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        if self.optimization == Optimization::Size && leb128_shorter_u64(u64::from(v), 4) {
            self.tag(PayloadTag::UInt32Leb128);
            leb128::write_u32(self.buf, v);
        } else {
            self.tag(PayloadTag::UInt32Native);
            self.put_u32(v);
        }
        Ok(())
    }

    /// Write a signed 64-bit integer, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        if self.optimization == Optimization::Size && leb128_shorter_i64(v, 8) {
            self.tag(PayloadTag::Int64Leb128);
            leb128::write_i64(self.buf, v);
        } else {
            self.tag(PayloadTag::Int64Native);
            self.put_u64(v as u64);
        }
        Ok(())
    }

    /// Write an unsigned 64-bit integer, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        if self.optimization == Optimization::Size && leb128_shorter_u64(v, 8) {
            self.tag(PayloadTag::UInt64Leb128);
            leb128::write_u64(self.buf, v);
        } else {
            self.tag(PayloadTag::UInt64Native);
            self.put_u64(v);
        }
        Ok(())
    }

    /// Write a double-precision float (no LEB128 form exists for floats).
    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.tag(PayloadTag::Double);
        self.put_f64(v);
        Ok(())
    }

    /// Write a UTF-8 string.
    pub fn write_string(&mut self, v: &str) -> Result<()> {
        self.tag(PayloadTag::StringUtf8);
        leb128::write_u64(self.buf, v.len() as u64);
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Write an opaque byte buffer.
    pub fn write_buffer(&mut self, v: &[u8]) -> Result<()> {
        self.tag(PayloadTag::Buffer);
        leb128::write_u64(self.buf, v.len() as u64);
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Write a UTF-32 scalar value, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_char(&mut self, v: char) -> Result<()> {
        let code = v as u32;
        if self.optimization == Optimization::Size && leb128_shorter_u64(u64::from(code), 4) {
            self.tag(PayloadTag::CharLeb128);
            leb128::write_u32(self.buf, code);
        } else {
            self.tag(PayloadTag::CharNative);
            self.put_u32(code);
        }
        Ok(())
    }

    /// Write a signed 8-bit integer (no LEB128 form exists — already minimal).
    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.tag(PayloadTag::SByteNative);
        self.buf.push(v as u8);
        Ok(())
    }

    /// Write an unsigned 8-bit integer (no LEB128 form exists — already
    /// minimal).
    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.tag(PayloadTag::ByteNative);
        self.buf.push(v);
        Ok(())
    }

    /// Write a signed 16-bit integer, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        if self.optimization == Optimization::Size && leb128_shorter_i64(i64::from(v), 2) {
            self.tag(PayloadTag::Int16Leb128);
            leb128::write_i32(self.buf, i32::from(v));
        } else {
            self.tag(PayloadTag::Int16Native);
            self.put_u16(v as u16);
        }
        Ok(())
    }

    /// Write an unsigned 16-bit integer, native or LEB128 depending on
    /// [`Optimization`].
    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        if self.optimization == Optimization::Size && leb128_shorter_u64(u64::from(v), 2) {
            self.tag(PayloadTag::UInt16Leb128);
            leb128::write_u32(self.buf, u32::from(v));
        } else {
            self.tag(PayloadTag::UInt16Native);
            self.put_u16(v);
        }
        Ok(())
    }

    /// Write a single-precision float (no LEB128 form exists).
    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.tag(PayloadTag::Single);
        self.put_f32(v);
        Ok(())
    }

    /// Write a 128-bit fixed-width decimal payload.
    ///
    /// Represented as a plain `i128` rather than a base-10 scaled decimal —
    /// see the decimal representation note in the design ledger.
    pub fn write_decimal(&mut self, v: i128) -> Result<()> {
        self.tag(PayloadTag::Decimal);
        self.put_u128(v as u128);
        Ok(())
    }

    /// Write a UTF-16 string (code units in this archive's stream
    /// endianness).
    pub fn write_string_utf16(&mut self, v: &str) -> Result<()> {
        self.tag(PayloadTag::StringUtf16);
        let units: Vec<u16> = v.encode_utf16().collect();
        leb128::write_u64(self.buf, units.len() as u64);
        for unit in units {
            self.put_u16(unit);
        }
        Ok(())
    }

    /// Write a timestamp as nanoseconds since the Unix epoch.
    pub fn write_datetime(&mut self, nanos_since_epoch: i64) -> Result<()> {
        self.tag(PayloadTag::DateTimeNative);
        self.put_u64(nanos_since_epoch as u64);
        Ok(())
    }

    /// Write a timestamp with a UTC offset: nanoseconds since the Unix epoch
    /// plus an offset in minutes.
    pub fn write_datetime_offset(&mut self, nanos_since_epoch: i64, offset_minutes: i16) -> Result<()> {
        self.tag(PayloadTag::DateTimeOffsetNative);
        self.put_u64(nanos_since_epoch as u64);
        self.put_u16(offset_minutes as u16);
        Ok(())
    }

    /// Write a 128-bit UUID. Opaque bytes, not a multi-byte integer — copied
    /// as-is regardless of stream endianness.
    pub fn write_guid(&mut self, v: [u8; 16]) -> Result<()> {
        self.tag(PayloadTag::GuidNative);
        self.buf.extend_from_slice(&v);
        Ok(())
    }

    /// Write a one-dimensional `bool[]` (no compact form exists).
    pub fn write_bool_array(&mut self, v: &[bool]) -> Result<()> {
        self.tag(PayloadTag::ArrayOfBoolNative);
        leb128::write_u64(self.buf, v.len() as u64);
        self.buf.extend(v.iter().map(|&b| u8::from(b)));
        Ok(())
    }

    /// Write a one-dimensional `char[]` (no compact form exists).
    pub fn write_char_array(&mut self, v: &[char]) -> Result<()> {
        self.tag(PayloadTag::ArrayOfCharNative);
        leb128::write_u64(self.buf, v.len() as u64);
        for &c in v {
            self.put_u32(c as u32);
        }
        Ok(())
    }

    /// Write a one-dimensional `i8[]`, native or LEB128-per-element depending
    /// on [`Optimization`].
    pub fn write_i8_array(&mut self, v: &[i8]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfSByteCompact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_i32(self.buf, i32::from(x));
            }
        } else {
            self.tag(PayloadTag::ArrayOfSByteNative);
            leb128::write_u64(self.buf, v.len() as u64);
            self.buf.extend(v.iter().map(|&x| x as u8));
        }
        Ok(())
    }

    /// Write a one-dimensional `u8[]` as a typed array (distinct from
    /// [`Self::write_buffer`]'s opaque payload), native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_u8_array(&mut self, v: &[u8]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfByteCompact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_u32(self.buf, u32::from(x));
            }
        } else {
            self.tag(PayloadTag::ArrayOfByteNative);
            leb128::write_u64(self.buf, v.len() as u64);
            self.buf.extend_from_slice(v);
        }
        Ok(())
    }

    /// Write a one-dimensional `i16[]`, native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_i16_array(&mut self, v: &[i16]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfInt16Compact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_i32(self.buf, i32::from(x));
            }
        } else {
            self.tag(PayloadTag::ArrayOfInt16Native);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                self.put_u16(x as u16);
            }
        }
        Ok(())
    }

    /// Write a one-dimensional `u16[]`, native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_u16_array(&mut self, v: &[u16]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfUInt16Compact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_u32(self.buf, u32::from(x));
            }
        } else {
            self.tag(PayloadTag::ArrayOfUInt16Native);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                self.put_u16(x);
            }
        }
        Ok(())
    }

    /// Write a one-dimensional `i32[]`, native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_i32_array(&mut self, v: &[i32]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfInt32Compact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_i32(self.buf, x);
            }
        } else {
            self.tag(PayloadTag::ArrayOfInt32Native);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                self.put_u32(x as u32);
            }
        }
        Ok(())
    }

    /// Write a one-dimensional `u32[]`, native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_u32_array(&mut self, v: &[u32]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfUInt32Compact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_u32(self.buf, x);
            }
        } else {
            self.tag(PayloadTag::ArrayOfUInt32Native);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                self.put_u32(x);
            }
        }
        Ok(())
    }

    /// Write a one-dimensional `i64[]`, native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_i64_array(&mut self, v: &[i64]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfInt64Compact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_i64(self.buf, x);
            }
        } else {
            self.tag(PayloadTag::ArrayOfInt64Native);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                self.put_u64(x as u64);
            }
        }
        Ok(())
    }

    /// Write a one-dimensional `u64[]`, native or LEB128-per-element
    /// depending on [`Optimization`].
    pub fn write_u64_array(&mut self, v: &[u64]) -> Result<()> {
        if self.optimization == Optimization::Size {
            self.tag(PayloadTag::ArrayOfUInt64Compact);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                leb128::write_u64(self.buf, x);
            }
        } else {
            self.tag(PayloadTag::ArrayOfUInt64Native);
            leb128::write_u64(self.buf, v.len() as u64);
            for &x in v {
                self.put_u64(x);
            }
        }
        Ok(())
    }

    /// Write a one-dimensional `f32[]` (no compact form exists).
    pub fn write_f32_array(&mut self, v: &[f32]) -> Result<()> {
        self.tag(PayloadTag::ArrayOfSingleNative);
        leb128::write_u64(self.buf, v.len() as u64);
        for &x in v {
            self.put_f32(x);
        }
        Ok(())
    }

    /// Write a one-dimensional `f64[]` (no compact form exists).
    pub fn write_f64_array(&mut self, v: &[f64]) -> Result<()> {
        self.tag(PayloadTag::ArrayOfDoubleNative);
        leb128::write_u64(self.buf, v.len() as u64);
        for &x in v {
            self.put_f64(x);
        }
        Ok(())
    }

    /// Write a one-dimensional array of object references, each element its
    /// own fully tagged value (`NullReference`/`AlreadySerialized`/full body).
    pub fn write_object_array(&mut self, v: &[Option<NodeRef>]) -> Result<()> {
        self.tag(PayloadTag::ArrayOfObject);
        leb128::write_u64(self.buf, v.len() as u64);
        for element in v {
            self.write_node(element.as_ref())?;
        }
        Ok(())
    }

    /// Write a rectangular multi-dimensional array of `i32`. The element-kind
    /// byte is `ArrayOfInt32Native`, matching `tag.rs`'s documented framing
    /// for `MultidimensionalArray` (kind byte, then `(lower_bound, length)`
    /// per dimension, then elements in row-major order).
    pub fn write_i32_multidim_array(&mut self, dimensions: &[(i64, u64)], elements: &[i32]) -> Result<()> {
        self.tag(PayloadTag::MultidimensionalArray);
        self.buf.push(PayloadTag::ArrayOfInt32Native.to_u8());
        leb128::write_u64(self.buf, dimensions.len() as u64);
        for &(lower, len) in dimensions {
            leb128::write_i64(self.buf, lower);
            leb128::write_u64(self.buf, len);
        }
        for &x in elements {
            self.put_u32(x as u32);
        }
        Ok(())
    }

    /// Write a rectangular multi-dimensional array of `f64`, mirroring
    /// [`Self::write_i32_multidim_array`].
    pub fn write_f64_multidim_array(&mut self, dimensions: &[(i64, u64)], elements: &[f64]) -> Result<()> {
        self.tag(PayloadTag::MultidimensionalArray);
        self.buf.push(PayloadTag::ArrayOfDoubleNative.to_u8());
        leb128::write_u64(self.buf, dimensions.len() as u64);
        for &(lower, len) in dimensions {
            leb128::write_i64(self.buf, lower);
            leb128::write_u64(self.buf, len);
        }
        for &x in elements {
            self.put_f64(x);
        }
        Ok(())
    }

    /// Write an enum value: `Enum` tag, the underlying type's descriptor
    /// (sharing the same stream-local type-id table as object descriptors),
    /// then the discriminant as SLEB128.
    pub fn write_enum<E: 'static>(&mut self, type_name: &'static str, underlying: i64) -> Result<()> {
        self.tag(PayloadTag::Enum);
        let rust_type = RustTypeId::of::<E>();
        let (type_id, type_known) = self.types.id_for(rust_type);
        if type_known {
            self.tag(PayloadTag::TypeId);
            leb128::write_u64(self.buf, type_id);
        } else {
            self.tag(PayloadTag::Type);
            self.write_raw_name(type_name);
        }
        leb128::write_i64(self.buf, underlying);
        Ok(())
    }

    fn write_raw_name(&mut self, name: &str) {
        leb128::write_u64(self.buf, name.len() as u64);
        self.buf.extend_from_slice(name.as_bytes());
    }

    /// Write an object reference. `None` becomes `NullReference`; a value
    /// seen earlier in this operation becomes `AlreadySerialized`; otherwise
    /// the object's full archive body is emitted.
    ///
    /// The identity id is allocated *before* the codec's `write_fields` runs,
    /// so a field that points back at the same object resolves to
    /// `AlreadySerialized` instead of recursing forever.
    pub fn write_node(&mut self, value: Option<&NodeRef>) -> Result<()> {
        let Some(value) = value else {
            self.tag(PayloadTag::NullReference);
            return Ok(());
        };
        let ptr: *const () = Arc::as_ptr(value).cast();
        let (id, already) = self.objects.mark_or_get(ptr);
        if already {
            self.tag(PayloadTag::AlreadySerialized);
            leb128::write_u64(self.buf, id);
            return Ok(());
        }

        let rust_type = (**value).type_id();
        let codec = self.registry.by_rust_type(rust_type).ok_or_else(|| Error::CodecMisconfigured {
            type_name: format!("{rust_type:?}"),
            reason: "no codec registered for this concrete type".to_owned(),
        })?;

        self.tag(PayloadTag::ArchiveStart);
        let (type_id, type_known) = self.types.id_for(rust_type);
        if type_known {
            self.tag(PayloadTag::TypeId);
            leb128::write_u64(self.buf, type_id);
        } else {
            self.tag(PayloadTag::Type);
            self.write_raw_name(codec.type_name);
        }
        let version = self.version_overrides.get(&rust_type).copied().unwrap_or(codec.current_version);
        leb128::write_u32(self.buf, version);

        let mut body = Vec::new();
        {
            let mut inner = WriteArchive {
                buf: &mut body,
                registry: self.registry.clone(),
                types: &mut *self.types,
                objects: &mut *self.objects,
                optimization: self.optimization,
                endianness: self.endianness,
                version_overrides: self.version_overrides,
            };
            codec.write(&**value as &(dyn Any + Send + Sync), &mut inner)?;
        }
        leb128::write_u64(self.buf, body.len() as u64);
        self.buf.extend_from_slice(&body);
        self.tag(PayloadTag::ArchiveEnd);
        Ok(())
    }

    /// Open a base-class archive nested in the current object's body; the
    /// base type's fields are written through the returned sub-archive, with
    /// no length prefix (termination is structural: the base's
    /// `write_fields` writes exactly its own fields and returns).
    pub fn write_base<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut WriteArchive<'_>) -> Result<()>,
    {
        self.tag(PayloadTag::BaseArchiveStart);
        f(self)
    }
}

struct AsByteSource<'a>(&'a mut dyn ReadSeek);

impl<'a> ByteSource for AsByteSource<'a> {
    fn next_byte(&mut self) -> CoreResult<u8> {
        let mut b = [0u8; 1];
        self.0.read_exact(&mut b).map_err(|_| CoreError::UnexpectedEndOfStream { needed: 1 })?;
        Ok(b[0])
    }
}

/// The read side of an archive: pulls a program's worth of tagged values
/// back out of a backing stream.
pub struct ReadArchive<'a> {
    pub(crate) backing: &'a mut dyn ReadSeek,
    pub(crate) registry: RegistryHandle,
    pub(crate) types: &'a mut ReadTypeTable,
    pub(crate) objects: &'a mut ReadIdentityTable,
    /// The endianness the producer recorded in the stream header (or the
    /// fixed endianness configured in place of one) — every multi-byte
    /// native primitive is parsed assuming this byte order (§4.2, §4.8.2(5)).
    pub(crate) endianness: Endianness,
}

impl<'a> ReadArchive<'a> {
    /// Bind `id` to a not-yet-fully-populated object so a self- or
    /// mutually-referencing field resolves instead of erroring. Used by
    /// [`crate::registry::CyclicInternalCodec`] codecs before they populate
    /// the shell they just default-constructed.
    pub fn bind_object(&mut self, id: u64, value: NodeRef) {
        self.objects.bind(id, value);
    }

    fn read_tag(&mut self) -> Result<PayloadTag> {
        let raw = AsByteSource(&mut *self.backing).next_byte()?;
        Ok(PayloadTag::from_u8(raw)?)
    }

    fn read_leb_u64(&mut self) -> Result<u64> {
        Ok(leb128::read_u64(&mut AsByteSource(&mut *self.backing))?)
    }

    fn read_leb_u32(&mut self) -> Result<u32> {
        Ok(leb128::read_u32(&mut AsByteSource(&mut *self.backing))?)
    }

    fn expect_tag(&mut self, expected: PayloadTag) -> Result<()> {
        let got = self.read_tag()?;
        if got != expected {
            return Err(Error::MalformedArchive(format!("expected {expected:?}, found {got:?}")));
        }
        Ok(())
    }

    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.backing.read_exact(&mut buf).map_err(Error::Io)?;
        Ok(buf)
    }

    /// Read a 16-bit word, converted from this archive's stream endianness to
    /// host order.
    fn get_u16(&mut self) -> Result<u16> {
        let bytes = self.read_exact_bytes(2)?;
        let v = u16::from_ne_bytes(bytes.try_into().unwrap());
        Ok(conditional_swap_u16(v, self.endianness, Endianness::host()))
    }

    /// Read a 32-bit word, converted from this archive's stream endianness to
    /// host order.
    fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.read_exact_bytes(4)?;
        let v = u32::from_ne_bytes(bytes.try_into().unwrap());
        Ok(conditional_swap_u32(v, self.endianness, Endianness::host()))
    }

    /// Read a 64-bit word, converted from this archive's stream endianness to
    /// host order.
    fn get_u64(&mut self) -> Result<u64> {
        let bytes = self.read_exact_bytes(8)?;
        let v = u64::from_ne_bytes(bytes.try_into().unwrap());
        Ok(conditional_swap_u64(v, self.endianness, Endianness::host()))
    }

    /// Read a 128-bit word, converted from this archive's stream endianness
    /// to host order.
    fn get_u128(&mut self) -> Result<u128> {
        let bytes = self.read_exact_bytes(16)?;
        let v = u128::from_ne_bytes(bytes.try_into().unwrap());
        Ok(conditional_swap_u128(v, self.endianness, Endianness::host()))
    }

    /// Read a 32-bit float, converted from this archive's stream endianness
    /// to host order.
    fn get_f32(&mut self) -> Result<f32> {
        let bytes = self.read_exact_bytes(4)?;
        let v = f32::from_ne_bytes(bytes.try_into().unwrap());
        Ok(conditional_swap_f32(v, self.endianness, Endianness::host()))
    }

    /// Read a 64-bit float, converted from this archive's stream endianness
    /// to host order.
    fn get_f64(&mut self) -> Result<f64> {
        let bytes = self.read_exact_bytes(8)?;
        let v = f64::from_ne_bytes(bytes.try_into().unwrap());
        Ok(conditional_swap_f64(v, self.endianness, Endianness::host()))
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_tag()? {
            PayloadTag::BooleanTrue => Ok(true),
            PayloadTag::BooleanFalse => Ok(false),
            other => Err(Error::MalformedArchive(format!("expected a boolean tag, found {other:?}"))),
        }
    }

    /// Read a signed 32-bit integer, accepting either its native or LEB128
    /// tag.
    pub fn read_i32(&mut self) -> Result<i32> {
        match self.read_tag()? {
            PayloadTag::Int32Native => Ok(self.get_u32()? as i32),
            PayloadTag::Int32Leb128 => Ok(leb128::read_i32(&mut AsByteSource(&mut *self.backing))?),
            other => Err(Error::MalformedArchive(format!("expected an i32 tag, found {other:?}"))),
        }
    }

    /// Read an unsigned 32-bit integer, accepting either its native or
    /// LEB128 tag.
    pub fn read_u32(&mut self) -> Result<u32> {
        match self.read_tag()? {
            PayloadTag::UInt32Native => self.get_u32(),
            PayloadTag::UInt32Leb128 => Ok(leb128::read_u32(&mut AsByteSource(&mut *self.backing))?),
            other => Err(Error::MalformedArchive(format!("expected a u32 tag, found {other:?}"))),
        }
    }

    /// Read a signed 64-bit integer, accepting either its native or LEB128
    /// tag.
    pub fn read_i64(&mut self) -> Result<i64> {
        match self.read_tag()? {
            PayloadTag::Int64Native => Ok(self.get_u64()? as i64),
            PayloadTag::Int64Leb128 => Ok(leb128::read_i64(&mut AsByteSource(&mut *self.backing))?),
            other => Err(Error::MalformedArchive(format!("expected an i64 tag, found {other:?}"))),
        }
    }

    /// Read an unsigned 64-bit integer, accepting either its native or
    /// LEB128 tag.
    pub fn read_u64(&mut self) -> Result<u64> {
        match self.read_tag()? {
            PayloadTag::UInt64Native => self.get_u64(),
            PayloadTag::UInt64Leb128 => Ok(leb128::read_u64(&mut AsByteSource(&mut *self.backing))?),
            other => Err(Error::MalformedArchive(format!("expected a u64 tag, found {other:?}"))),
        }
    }

    /// Read a double-precision float.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.expect_tag(PayloadTag::Double)?;
        self.get_f64()
    }

    /// Read a UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        self.expect_tag(PayloadTag::StringUtf8)?;
        let len = self.read_leb_u64()? as usize;
        let bytes = self.read_exact_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| Error::Core(CoreError::InvalidUtf8))
    }

    /// Read an opaque byte buffer.
    pub fn read_buffer(&mut self) -> Result<Vec<u8>> {
        self.expect_tag(PayloadTag::Buffer)?;
        let len = self.read_leb_u64()? as usize;
        self.read_exact_bytes(len)
    }

    fn read_u32_code(&mut self) -> Result<u32> {
        self.get_u32()
    }

    fn char_from_code(code: u32) -> Result<char> {
        char::from_u32(code).ok_or_else(|| Error::MalformedArchive(format!("{code:#x} is not a valid char")))
    }

    /// Read a UTF-32 scalar value, accepting either its native or LEB128 tag.
    pub fn read_char(&mut self) -> Result<char> {
        match self.read_tag()? {
            PayloadTag::CharNative => Self::char_from_code(self.read_u32_code()?),
            PayloadTag::CharLeb128 => Self::char_from_code(leb128::read_u32(&mut AsByteSource(&mut *self.backing))?),
            other => Err(Error::MalformedArchive(format!("expected a char tag, found {other:?}"))),
        }
    }

    /// Read a signed 8-bit integer.
    pub fn read_i8(&mut self) -> Result<i8> {
        self.expect_tag(PayloadTag::SByteNative)?;
        Ok(self.read_exact_bytes(1)?[0] as i8)
    }

    /// Read an unsigned 8-bit integer.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.expect_tag(PayloadTag::ByteNative)?;
        Ok(self.read_exact_bytes(1)?[0])
    }

    /// Read a signed 16-bit integer, accepting either its native or LEB128
    /// tag.
    pub fn read_i16(&mut self) -> Result<i16> {
        match self.read_tag()? {
            PayloadTag::Int16Native => Ok(self.get_u16()? as i16),
            PayloadTag::Int16Leb128 => {
                let wide = leb128::read_i32(&mut AsByteSource(&mut *self.backing))?;
                i16::try_from(wide).map_err(|_| Error::MalformedArchive("i16 LEB128 value out of range".to_owned()))
            }
            other => Err(Error::MalformedArchive(format!("expected an i16 tag, found {other:?}"))),
        }
    }

    /// Read an unsigned 16-bit integer, accepting either its native or
    /// LEB128 tag.
    pub fn read_u16(&mut self) -> Result<u16> {
        match self.read_tag()? {
            PayloadTag::UInt16Native => self.get_u16(),
            PayloadTag::UInt16Leb128 => {
                let wide = leb128::read_u32(&mut AsByteSource(&mut *self.backing))?;
                u16::try_from(wide).map_err(|_| Error::MalformedArchive("u16 LEB128 value out of range".to_owned()))
            }
            other => Err(Error::MalformedArchive(format!("expected a u16 tag, found {other:?}"))),
        }
    }

    /// Read a single-precision float.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.expect_tag(PayloadTag::Single)?;
        self.get_f32()
    }

    /// Read a 128-bit fixed-width decimal payload, as a plain `i128`.
    pub fn read_decimal(&mut self) -> Result<i128> {
        self.expect_tag(PayloadTag::Decimal)?;
        Ok(self.get_u128()? as i128)
    }

    /// Read a UTF-16 string.
    pub fn read_string_utf16(&mut self) -> Result<String> {
        self.expect_tag(PayloadTag::StringUtf16)?;
        let len = self.read_leb_u64()? as usize;
        let mut units = Vec::with_capacity(len);
        for _ in 0..len {
            units.push(self.get_u16()?);
        }
        String::from_utf16(&units).map_err(|_| Error::Core(CoreError::InvalidUtf8))
    }

    /// Read a timestamp as nanoseconds since the Unix epoch.
    pub fn read_datetime(&mut self) -> Result<i64> {
        self.expect_tag(PayloadTag::DateTimeNative)?;
        Ok(self.get_u64()? as i64)
    }

    /// Read a timestamp with a UTC offset: `(nanos_since_epoch,
    /// offset_minutes)`.
    pub fn read_datetime_offset(&mut self) -> Result<(i64, i16)> {
        self.expect_tag(PayloadTag::DateTimeOffsetNative)?;
        let nanos = self.get_u64()? as i64;
        let offset = self.get_u16()? as i16;
        Ok((nanos, offset))
    }

    /// Read a 128-bit UUID.
    pub fn read_guid(&mut self) -> Result<[u8; 16]> {
        self.expect_tag(PayloadTag::GuidNative)?;
        let bytes = self.read_exact_bytes(16)?;
        Ok(bytes.try_into().unwrap())
    }

    /// Read a one-dimensional `bool[]`.
    pub fn read_bool_array(&mut self) -> Result<Vec<bool>> {
        self.expect_tag(PayloadTag::ArrayOfBoolNative)?;
        let len = self.read_leb_u64()? as usize;
        self.read_exact_bytes(len).map(|bytes| bytes.into_iter().map(|b| b != 0).collect())
    }

    /// Read a one-dimensional `char[]`.
    pub fn read_char_array(&mut self) -> Result<Vec<char>> {
        self.expect_tag(PayloadTag::ArrayOfCharNative)?;
        let len = self.read_leb_u64()? as usize;
        (0..len).map(|_| Self::char_from_code(self.read_u32_code()?)).collect()
    }

    /// Read a one-dimensional `i8[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_i8_array(&mut self) -> Result<Vec<i8>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfSByteNative => {
                let len = self.read_leb_u64()? as usize;
                Ok(self.read_exact_bytes(len)?.into_iter().map(|b| b as i8).collect())
            }
            PayloadTag::ArrayOfSByteCompact => {
                let len = self.read_leb_u64()? as usize;
                (0..len)
                    .map(|_| {
                        let wide = leb128::read_i32(&mut AsByteSource(&mut *self.backing))?;
                        i8::try_from(wide)
                            .map_err(|_| Error::MalformedArchive("i8 LEB128 value out of range".to_owned()))
                    })
                    .collect()
            }
            other => Err(Error::MalformedArchive(format!("expected an i8 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `u8[]` (a typed array, distinct from
    /// [`Self::read_buffer`]'s opaque payload), accepting either its native
    /// or LEB128-per-element tag.
    pub fn read_u8_array(&mut self) -> Result<Vec<u8>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfByteNative => {
                let len = self.read_leb_u64()? as usize;
                self.read_exact_bytes(len)
            }
            PayloadTag::ArrayOfByteCompact => {
                let len = self.read_leb_u64()? as usize;
                (0..len)
                    .map(|_| {
                        let wide = leb128::read_u32(&mut AsByteSource(&mut *self.backing))?;
                        u8::try_from(wide)
                            .map_err(|_| Error::MalformedArchive("u8 LEB128 value out of range".to_owned()))
                    })
                    .collect()
            }
            other => Err(Error::MalformedArchive(format!("expected a u8 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `i16[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_i16_array(&mut self) -> Result<Vec<i16>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfInt16Native => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(self.get_u16()? as i16)).collect()
            }
            PayloadTag::ArrayOfInt16Compact => {
                let len = self.read_leb_u64()? as usize;
                (0..len)
                    .map(|_| {
                        let wide = leb128::read_i32(&mut AsByteSource(&mut *self.backing))?;
                        i16::try_from(wide)
                            .map_err(|_| Error::MalformedArchive("i16 LEB128 value out of range".to_owned()))
                    })
                    .collect()
            }
            other => Err(Error::MalformedArchive(format!("expected an i16 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `u16[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_u16_array(&mut self) -> Result<Vec<u16>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfUInt16Native => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| self.get_u16()).collect()
            }
            PayloadTag::ArrayOfUInt16Compact => {
                let len = self.read_leb_u64()? as usize;
                (0..len)
                    .map(|_| {
                        let wide = leb128::read_u32(&mut AsByteSource(&mut *self.backing))?;
                        u16::try_from(wide)
                            .map_err(|_| Error::MalformedArchive("u16 LEB128 value out of range".to_owned()))
                    })
                    .collect()
            }
            other => Err(Error::MalformedArchive(format!("expected a u16 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `i32[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_i32_array(&mut self) -> Result<Vec<i32>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfInt32Native => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(self.get_u32()? as i32)).collect()
            }
            PayloadTag::ArrayOfInt32Compact => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(leb128::read_i32(&mut AsByteSource(&mut *self.backing))?)).collect()
            }
            other => Err(Error::MalformedArchive(format!("expected an i32 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `u32[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_u32_array(&mut self) -> Result<Vec<u32>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfUInt32Native => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| self.get_u32()).collect()
            }
            PayloadTag::ArrayOfUInt32Compact => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(leb128::read_u32(&mut AsByteSource(&mut *self.backing))?)).collect()
            }
            other => Err(Error::MalformedArchive(format!("expected a u32 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `i64[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_i64_array(&mut self) -> Result<Vec<i64>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfInt64Native => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(self.get_u64()? as i64)).collect()
            }
            PayloadTag::ArrayOfInt64Compact => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(leb128::read_i64(&mut AsByteSource(&mut *self.backing))?)).collect()
            }
            other => Err(Error::MalformedArchive(format!("expected an i64 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `u64[]`, accepting either its native or
    /// LEB128-per-element tag.
    pub fn read_u64_array(&mut self) -> Result<Vec<u64>> {
        match self.read_tag()? {
            PayloadTag::ArrayOfUInt64Native => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| self.get_u64()).collect()
            }
            PayloadTag::ArrayOfUInt64Compact => {
                let len = self.read_leb_u64()? as usize;
                (0..len).map(|_| Ok(leb128::read_u64(&mut AsByteSource(&mut *self.backing))?)).collect()
            }
            other => Err(Error::MalformedArchive(format!("expected a u64 array tag, found {other:?}"))),
        }
    }

    /// Read a one-dimensional `f32[]`.
    pub fn read_f32_array(&mut self) -> Result<Vec<f32>> {
        self.expect_tag(PayloadTag::ArrayOfSingleNative)?;
        let len = self.read_leb_u64()? as usize;
        (0..len).map(|_| self.get_f32()).collect()
    }

    /// Read a one-dimensional `f64[]`.
    pub fn read_f64_array(&mut self) -> Result<Vec<f64>> {
        self.expect_tag(PayloadTag::ArrayOfDoubleNative)?;
        let len = self.read_leb_u64()? as usize;
        (0..len).map(|_| self.get_f64()).collect()
    }

    /// Read a one-dimensional array of object references.
    pub fn read_object_array(&mut self) -> Result<Vec<Option<NodeRef>>> {
        self.expect_tag(PayloadTag::ArrayOfObject)?;
        let len = self.read_leb_u64()? as usize;
        (0..len).map(|_| self.read_node()).collect()
    }

    /// Read a rectangular multi-dimensional array of `i32`, mirroring
    /// [`WriteArchive::write_i32_multidim_array`]. Returns
    /// `((lower_bound, length) per dimension, elements in row-major order)`.
    pub fn read_i32_multidim_array(&mut self) -> Result<(Vec<(i64, u64)>, Vec<i32>)> {
        self.expect_tag(PayloadTag::MultidimensionalArray)?;
        self.expect_tag(PayloadTag::ArrayOfInt32Native)?;
        let (dimensions, total) = self.read_multidim_shape()?;
        let elements = (0..total).map(|_| Ok(self.get_u32()? as i32)).collect::<Result<_>>()?;
        Ok((dimensions, elements))
    }

    /// Read a rectangular multi-dimensional array of `f64`, mirroring
    /// [`WriteArchive::write_f64_multidim_array`].
    pub fn read_f64_multidim_array(&mut self) -> Result<(Vec<(i64, u64)>, Vec<f64>)> {
        self.expect_tag(PayloadTag::MultidimensionalArray)?;
        self.expect_tag(PayloadTag::ArrayOfDoubleNative)?;
        let (dimensions, total) = self.read_multidim_shape()?;
        let elements = (0..total).map(|_| self.get_f64()).collect::<Result<_>>()?;
        Ok((dimensions, elements))
    }

    fn read_multidim_shape(&mut self) -> Result<(Vec<(i64, u64)>, usize)> {
        let rank = self.read_leb_u64()? as usize;
        let mut dimensions = Vec::with_capacity(rank);
        let mut total: usize = 1;
        for _ in 0..rank {
            let lower = leb128::read_i64(&mut AsByteSource(&mut *self.backing))?;
            let len = self.read_leb_u64()?;
            dimensions.push((lower, len));
            total = total.saturating_mul(len as usize);
        }
        Ok((dimensions, total))
    }

    /// Read an enum value: its underlying type's wire name plus the
    /// discriminant, mirroring [`WriteArchive::write_enum`].
    pub fn read_enum(&mut self) -> Result<(String, i64)> {
        self.expect_tag(PayloadTag::Enum)?;
        let name = match self.read_tag()? {
            PayloadTag::Type => {
                let name = self.read_raw_name()?;
                self.types.bind_next_name(name.clone());
                name
            }
            PayloadTag::TypeId => {
                let type_id = self.read_leb_u64()?;
                self.types.get_name(type_id)?
            }
            other => return Err(Error::MalformedArchive(format!("expected Type or TypeId after Enum, found {other:?}"))),
        };
        let underlying = leb128::read_i64(&mut AsByteSource(&mut *self.backing))?;
        Ok((name, underlying))
    }

    fn read_raw_name(&mut self) -> Result<String> {
        let len = self.read_leb_u64()? as usize;
        let bytes = self.read_exact_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| Error::Core(CoreError::InvalidUtf8))
    }

    /// Read an object reference, mirroring [`WriteArchive::write_node`]'s
    /// framing exactly.
    pub fn read_node(&mut self) -> Result<Option<NodeRef>> {
        match self.read_tag()? {
            PayloadTag::NullReference => Ok(None),
            PayloadTag::AlreadySerialized => {
                let id = self.read_leb_u64()?;
                let value = self.objects.get(id).ok_or(Error::UnknownObjectId(id))?;
                Ok(Some(value))
            }
            PayloadTag::ArchiveStart => {
                let id = self.objects.allocate();
                let codec = match self.read_tag()? {
                    PayloadTag::Type => {
                        let name = self.read_raw_name()?;
                        let codec = self.registry.by_name(&name)?;
                        self.types.bind_next_codec(codec.clone());
                        codec
                    }
                    PayloadTag::TypeId => {
                        let type_id = self.read_leb_u64()?;
                        self.types.get_codec(type_id)?
                    }
                    other => {
                        return Err(Error::MalformedArchive(format!(
                            "expected Type or TypeId after ArchiveStart, found {other:?}"
                        )))
                    }
                };
                let version = self.read_leb_u32()?;
                if version > codec.current_version {
                    return Err(Error::VersionNotSupported {
                        type_name: codec.type_name.to_owned(),
                        requested: version,
                        max_supported: codec.current_version,
                    });
                }
                let body_len = self.read_leb_u64()?;
                let value = {
                    let mut view = RestrictedStreamView::new(&mut *self.backing, body_len).map_err(Error::Io)?;
                    let mut inner = ReadArchive {
                        backing: &mut view,
                        registry: self.registry.clone(),
                        types: &mut *self.types,
                        objects: &mut *self.objects,
                        endianness: self.endianness,
                    };
                    codec.read(id, &mut inner, version)?
                };
                self.objects.bind(id, value.clone());
                self.expect_tag(PayloadTag::ArchiveEnd)?;
                Ok(Some(value))
            }
            other => Err(Error::MalformedArchive(format!("expected an object tag, found {other:?}"))),
        }
    }

    /// Open a base-class archive nested in the current object's body,
    /// mirroring [`WriteArchive::write_base`].
    pub fn read_base<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ReadArchive<'_>) -> Result<T>,
    {
        self.expect_tag(PayloadTag::BaseArchiveStart)?;
        f(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ReadTypeTable, WriteTypeTable};
    use crate::identity::{ReadIdentityTable, WriteIdentityTable};
    use crate::registry::RegistryHandle;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn roundtrip_primitives(optimization: Optimization) {
        let mut buf = Vec::new();
        let mut types = WriteTypeTable::new();
        let mut objects = WriteIdentityTable::new();
        let overrides = HashMap::new();
        {
            let mut w = WriteArchive {
                buf: &mut buf,
                registry: RegistryHandle::current(),
                types: &mut types,
                objects: &mut objects,
                optimization,
                endianness: Endianness::host(),
                version_overrides: &overrides,
            };
            w.write_bool(true).unwrap();
            w.write_i32(-300).unwrap();
            w.write_u64(9_999_999_999).unwrap();
            w.write_f64(2.5).unwrap();
            w.write_string("graphwire").unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let mut r_types = ReadTypeTable::new();
        let mut r_objects = ReadIdentityTable::new();
        let mut r = ReadArchive {
            backing: &mut cursor,
            registry: RegistryHandle::current(),
            types: &mut r_types,
            objects: &mut r_objects,
            endianness: Endianness::host(),
        };
        assert_eq!(r.read_bool().unwrap(), true);
        assert_eq!(r.read_i32().unwrap(), -300);
        assert_eq!(r.read_u64().unwrap(), 9_999_999_999);
        assert_eq!(r.read_f64().unwrap(), 2.5);
        assert_eq!(r.read_string().unwrap(), "graphwire");
    }

    #[test]
    fn primitives_roundtrip_in_speed_mode() {
        roundtrip_primitives(Optimization::Speed);
    }

    #[test]
    fn primitives_roundtrip_in_size_mode() {
        roundtrip_primitives(Optimization::Size);
    }

    #[test]
    fn null_reference_roundtrips() {
        let mut buf = Vec::new();
        let mut types = WriteTypeTable::new();
        let mut objects = WriteIdentityTable::new();
        let overrides = HashMap::new();
        {
            let mut w = WriteArchive {
                buf: &mut buf,
                registry: RegistryHandle::current(),
                types: &mut types,
                objects: &mut objects,
                optimization: Optimization::Speed,
                endianness: Endianness::host(),
                version_overrides: &overrides,
            };
            w.write_node(None).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        let mut r_types = ReadTypeTable::new();
        let mut r_objects = ReadIdentityTable::new();
        let mut r = ReadArchive {
            backing: &mut cursor,
            registry: RegistryHandle::current(),
            types: &mut r_types,
            objects: &mut r_objects,
            endianness: Endianness::host(),
        };
        assert!(r.read_node().unwrap().is_none());
    }

    fn writer<'a>(
        buf: &'a mut Vec<u8>,
        types: &'a mut WriteTypeTable,
        objects: &'a mut WriteIdentityTable,
        overrides: &'a HashMap<RustTypeId, u32>,
        optimization: Optimization,
    ) -> WriteArchive<'a> {
        writer_with_endianness(buf, types, objects, overrides, optimization, Endianness::host())
    }

    fn writer_with_endianness<'a>(
        buf: &'a mut Vec<u8>,
        types: &'a mut WriteTypeTable,
        objects: &'a mut WriteIdentityTable,
        overrides: &'a HashMap<RustTypeId, u32>,
        optimization: Optimization,
        endianness: Endianness,
    ) -> WriteArchive<'a> {
        WriteArchive {
            buf,
            registry: RegistryHandle::current(),
            types,
            objects,
            optimization,
            endianness,
            version_overrides: overrides,
        }
    }

    fn reader<'a>(
        cursor: &'a mut Cursor<Vec<u8>>,
        types: &'a mut ReadTypeTable,
        objects: &'a mut ReadIdentityTable,
    ) -> ReadArchive<'a> {
        reader_with_endianness(cursor, types, objects, Endianness::host())
    }

    fn reader_with_endianness<'a>(
        cursor: &'a mut Cursor<Vec<u8>>,
        types: &'a mut ReadTypeTable,
        objects: &'a mut ReadIdentityTable,
        endianness: Endianness,
    ) -> ReadArchive<'a> {
        ReadArchive { backing: cursor, registry: RegistryHandle::current(), types, objects, endianness }
    }

    fn roundtrip_scalars(optimization: Optimization) {
        let mut buf = Vec::new();
        let (mut types, mut objects, overrides) = (WriteTypeTable::new(), WriteIdentityTable::new(), HashMap::new());
        {
            let mut w = writer(&mut buf, &mut types, &mut objects, &overrides, optimization);
            w.write_char('λ').unwrap();
            w.write_i8(-5).unwrap();
            w.write_u8(250).unwrap();
            w.write_i16(-12_000).unwrap();
            w.write_u16(60_000).unwrap();
            w.write_f32(1.5).unwrap();
            w.write_decimal(123_456_789_012_345_678_901_234_567_890i128).unwrap();
            w.write_string_utf16("héllo").unwrap();
            w.write_datetime(1_700_000_000_000_000_000).unwrap();
            w.write_datetime_offset(1_700_000_000_000_000_000, -300).unwrap();
            w.write_guid([0xAB; 16]).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let (mut r_types, mut r_objects) = (ReadTypeTable::new(), ReadIdentityTable::new());
        let mut r = reader(&mut cursor, &mut r_types, &mut r_objects);
        assert_eq!(r.read_char().unwrap(), 'λ');
        assert_eq!(r.read_i8().unwrap(), -5);
        assert_eq!(r.read_u8().unwrap(), 250);
        assert_eq!(r.read_i16().unwrap(), -12_000);
        assert_eq!(r.read_u16().unwrap(), 60_000);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_decimal().unwrap(), 123_456_789_012_345_678_901_234_567_890i128);
        assert_eq!(r.read_string_utf16().unwrap(), "héllo");
        assert_eq!(r.read_datetime().unwrap(), 1_700_000_000_000_000_000);
        assert_eq!(r.read_datetime_offset().unwrap(), (1_700_000_000_000_000_000, -300));
        assert_eq!(r.read_guid().unwrap(), [0xAB; 16]);
    }

    #[test]
    fn scalars_roundtrip_in_speed_mode() {
        roundtrip_scalars(Optimization::Speed);
    }

    #[test]
    fn scalars_roundtrip_in_size_mode() {
        roundtrip_scalars(Optimization::Size);
    }

    #[test]
    fn a_stream_written_big_endian_decodes_correctly_on_this_host() {
        let mut buf = Vec::new();
        let (mut types, mut objects, overrides) = (WriteTypeTable::new(), WriteIdentityTable::new(), HashMap::new());
        {
            let mut w = writer_with_endianness(
                &mut buf,
                &mut types,
                &mut objects,
                &overrides,
                Optimization::Speed,
                Endianness::Big,
            );
            w.write_i32(-70_000).unwrap();
            w.write_u64(9_999_999_999).unwrap();
            w.write_f64(2.5).unwrap();
            w.write_decimal(123_456_789_012_345_678_901_234_567_890i128).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let (mut r_types, mut r_objects) = (ReadTypeTable::new(), ReadIdentityTable::new());
        let mut r = reader_with_endianness(&mut cursor, &mut r_types, &mut r_objects, Endianness::Big);
        assert_eq!(r.read_i32().unwrap(), -70_000);
        assert_eq!(r.read_u64().unwrap(), 9_999_999_999);
        assert_eq!(r.read_f64().unwrap(), 2.5);
        assert_eq!(r.read_decimal().unwrap(), 123_456_789_012_345_678_901_234_567_890i128);
    }

    fn roundtrip_arrays(optimization: Optimization) {
        let mut buf = Vec::new();
        let (mut types, mut objects, overrides) = (WriteTypeTable::new(), WriteIdentityTable::new(), HashMap::new());
        {
            let mut w = writer(&mut buf, &mut types, &mut objects, &overrides, optimization);
            w.write_bool_array(&[true, false, true]).unwrap();
            w.write_char_array(&['a', 'b', 'c']).unwrap();
            w.write_i8_array(&[-1, 0, 1]).unwrap();
            w.write_u8_array(&[0, 128, 255]).unwrap();
            w.write_i16_array(&[-300, 0, 300]).unwrap();
            w.write_u16_array(&[0, 40_000]).unwrap();
            w.write_i32_array(&[-70_000, 0, 70_000]).unwrap();
            w.write_u32_array(&[0, 4_000_000_000u32]).unwrap();
            w.write_i64_array(&[i64::MIN, 0, i64::MAX]).unwrap();
            w.write_u64_array(&[0, u64::MAX]).unwrap();
            w.write_f32_array(&[1.0, -2.5]).unwrap();
            w.write_f64_array(&[3.0, -4.5]).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let (mut r_types, mut r_objects) = (ReadTypeTable::new(), ReadIdentityTable::new());
        let mut r = reader(&mut cursor, &mut r_types, &mut r_objects);
        assert_eq!(r.read_bool_array().unwrap(), vec![true, false, true]);
        assert_eq!(r.read_char_array().unwrap(), vec!['a', 'b', 'c']);
        assert_eq!(r.read_i8_array().unwrap(), vec![-1, 0, 1]);
        assert_eq!(r.read_u8_array().unwrap(), vec![0, 128, 255]);
        assert_eq!(r.read_i16_array().unwrap(), vec![-300, 0, 300]);
        assert_eq!(r.read_u16_array().unwrap(), vec![0, 40_000]);
        assert_eq!(r.read_i32_array().unwrap(), vec![-70_000, 0, 70_000]);
        assert_eq!(r.read_u32_array().unwrap(), vec![0, 4_000_000_000u32]);
        assert_eq!(r.read_i64_array().unwrap(), vec![i64::MIN, 0, i64::MAX]);
        assert_eq!(r.read_u64_array().unwrap(), vec![0, u64::MAX]);
        assert_eq!(r.read_f32_array().unwrap(), vec![1.0, -2.5]);
        assert_eq!(r.read_f64_array().unwrap(), vec![3.0, -4.5]);
    }

    #[test]
    fn arrays_roundtrip_in_speed_mode() {
        roundtrip_arrays(Optimization::Speed);
    }

    #[test]
    fn arrays_roundtrip_in_size_mode() {
        roundtrip_arrays(Optimization::Size);
    }

    #[test]
    fn multidim_array_roundtrips_shape_and_elements() {
        let mut buf = Vec::new();
        let (mut types, mut objects, overrides) = (WriteTypeTable::new(), WriteIdentityTable::new(), HashMap::new());
        {
            let mut w = writer(&mut buf, &mut types, &mut objects, &overrides, Optimization::Speed);
            w.write_i32_multidim_array(&[(0, 2), (0, 3)], &[1, 2, 3, 4, 5, 6]).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        let (mut r_types, mut r_objects) = (ReadTypeTable::new(), ReadIdentityTable::new());
        let mut r = reader(&mut cursor, &mut r_types, &mut r_objects);
        let (dimensions, elements) = r.read_i32_multidim_array().unwrap();
        assert_eq!(dimensions, vec![(0, 2), (0, 3)]);
        assert_eq!(elements, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn enum_descriptor_shrinks_to_a_back_reference_on_second_occurrence() {
        let mut buf = Vec::new();
        let (mut types, mut objects, overrides) = (WriteTypeTable::new(), WriteIdentityTable::new(), HashMap::new());
        enum Color {}
        {
            let mut w = writer(&mut buf, &mut types, &mut objects, &overrides, Optimization::Speed);
            w.write_enum::<Color>("graphwire::tests::Color", 1).unwrap();
            w.write_enum::<Color>("graphwire::tests::Color", 2).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        let (mut r_types, mut r_objects) = (ReadTypeTable::new(), ReadIdentityTable::new());
        let mut r = reader(&mut cursor, &mut r_types, &mut r_objects);
        assert_eq!(r.read_enum().unwrap(), ("graphwire::tests::Color".to_owned(), 1));
        assert_eq!(r.read_enum().unwrap(), ("graphwire::tests::Color".to_owned(), 2));
    }

    #[derive(Debug, PartialEq)]
    struct Num(i32);

    impl crate::registry::InternalCodec for Num {
        fn type_name() -> &'static str {
            "archive::tests::Num"
        }
        fn current_version() -> u32 {
            1
        }
        fn write_fields(&self, archive: &mut WriteArchive<'_>) -> Result<()> {
            archive.write_i32(self.0)
        }
        fn read_fields(archive: &mut ReadArchive<'_>, _version: u32) -> Result<Self> {
            Ok(Self(archive.read_i32()?))
        }
    }

    #[test]
    fn object_array_round_trips_including_null_elements() {
        crate::registry::register_internal::<Num>().unwrap();
        let mut buf = Vec::new();
        let (mut types, mut objects, overrides) = (WriteTypeTable::new(), WriteIdentityTable::new(), HashMap::new());
        let leaf: NodeRef = Arc::new(Num(7));
        {
            let mut w = writer(&mut buf, &mut types, &mut objects, &overrides, Optimization::Speed);
            w.write_object_array(&[Some(leaf.clone()), None]).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        let (mut r_types, mut r_objects) = (ReadTypeTable::new(), ReadIdentityTable::new());
        let mut r = reader(&mut cursor, &mut r_types, &mut r_objects);
        let elements = r.read_object_array().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(*elements[0].as_ref().unwrap().downcast_ref::<Num>().unwrap(), Num(7));
        assert!(elements[1].is_none());
    }
}
