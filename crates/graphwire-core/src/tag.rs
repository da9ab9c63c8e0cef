//! The payload-tag alphabet: a closed, byte-valued enumeration that
//! discriminates every encodable shape on the wire (§3).
//!
//! Assignments are stable: once a discriminant is handed out below it must
//! never be reassigned to a different shape, even across versions of this
//! crate — old streams must keep decoding the same way forever.

use crate::error::CoreError;

macro_rules! payload_tag {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(u8)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl $name {
            /// All tags, in discriminant order — used by tests to assert
            /// stability and uniqueness of the assignment.
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            /// Encode as the single byte written to the wire.
            #[must_use]
            pub const fn to_u8(self) -> u8 {
                self as u8
            }

            /// Decode a wire byte, failing if it matches no known tag.
            pub fn from_u8(raw: u8) -> Result<Self, CoreError> {
                match raw {
                    $($value => Ok($name::$variant),)*
                    _ => Err(CoreError::InvalidTag { raw }),
                }
            }
        }
    };
}

payload_tag! {
    /// One byte at the start of every value on the wire.
    pub enum PayloadTag {
        /// A `null` reference.
        NullReference = 0x00,
        /// A reference already emitted earlier in this operation; followed
        /// by `leb128(object_id)`.
        AlreadySerialized = 0x01,

        /// First occurrence of a concrete (non-generic) type; followed by
        /// `utf8(name)`.
        Type = 0x02,
        /// First occurrence of a closed generic type; followed by
        /// `utf8(name) leb128(arg_count) type_desc^arg_count`.
        GenericType = 0x03,
        /// Back-reference to a previously emitted type descriptor; followed
        /// by `leb128(type_id)`.
        TypeId = 0x04,
        /// A boxed `Type` value carried as data (reflection-style "type as
        /// object"); followed by a type descriptor or `TypeId`.
        TypeObject = 0x05,

        /// A codec-backed object; see `ArchiveStart`/`ArchiveEnd` framing.
        Object = 0x06,
        /// An opaque length-prefixed byte buffer, for codecs that want to
        /// carry raw bytes without going through the primitive/array tags.
        Buffer = 0x07,
        /// An enum value; followed by a type descriptor and the LEB128
        /// underlying integer.
        Enum = 0x08,

        /// Opens a codec-backed archive; followed by a type descriptor,
        /// `leb128(version)`, `leb128(body_len)`, the body, then
        /// `ArchiveEnd`.
        ArchiveStart = 0x09,
        /// Closes an `ArchiveStart` region.
        ArchiveEnd = 0x0A,
        /// Opens a base-class archive nested inside an enclosing archive;
        /// has no paired end tag (termination is structural).
        BaseArchiveStart = 0x0B,

        /// `true`.
        BooleanTrue = 0x10,
        /// `false`.
        BooleanFalse = 0x11,
        /// UTF-32 scalar value, native 4-byte encoding.
        CharNative = 0x12,
        /// UTF-32 scalar value, LEB128-encoded.
        CharLeb128 = 0x13,
        /// Signed 8-bit integer (no LEB128 form — already minimal).
        SByteNative = 0x14,
        /// Unsigned 8-bit integer (no LEB128 form — already minimal).
        ByteNative = 0x15,
        /// Signed 16-bit integer, native little-endian-of-host encoding.
        Int16Native = 0x16,
        /// Signed 16-bit integer, SLEB128-encoded.
        Int16Leb128 = 0x17,
        /// Unsigned 16-bit integer, native encoding.
        UInt16Native = 0x18,
        /// Unsigned 16-bit integer, LEB128-encoded.
        UInt16Leb128 = 0x19,
        /// Signed 32-bit integer, native encoding.
        Int32Native = 0x1A,
        /// Signed 32-bit integer, SLEB128-encoded.
        Int32Leb128 = 0x1B,
        /// Unsigned 32-bit integer, native encoding.
        UInt32Native = 0x1C,
        /// Unsigned 32-bit integer, LEB128-encoded.
        UInt32Leb128 = 0x1D,
        /// Signed 64-bit integer, native encoding.
        Int64Native = 0x1E,
        /// Signed 64-bit integer, SLEB128-encoded.
        Int64Leb128 = 0x1F,
        /// Unsigned 64-bit integer, native encoding.
        UInt64Native = 0x20,
        /// Unsigned 64-bit integer, LEB128-encoded.
        UInt64Leb128 = 0x21,
        /// IEEE-754 single precision (no LEB128 form).
        Single = 0x22,
        /// IEEE-754 double precision (no LEB128 form).
        Double = 0x23,
        /// 128-bit fixed-width decimal payload (no LEB128 form).
        Decimal = 0x24,
        /// UTF-8 string; followed by `leb128(byte_len) utf8_bytes`.
        StringUtf8 = 0x25,
        /// UTF-16 string; followed by `leb128(code_unit_len) utf16le_units`.
        StringUtf16 = 0x26,
        /// Timestamp (i64 nanoseconds since the Unix epoch), native 8-byte
        /// encoding.
        DateTimeNative = 0x27,
        /// Timestamp with a UTC offset (i64 nanoseconds + i16 offset
        /// minutes), native encoding.
        DateTimeOffsetNative = 0x28,
        /// 128-bit UUID, native 16-byte encoding.
        GuidNative = 0x29,

        /// One-dimensional `bool[]`, native encoding.
        ArrayOfBoolNative = 0x40,
        /// One-dimensional `char[]`, native encoding.
        ArrayOfCharNative = 0x41,
        /// One-dimensional `i8[]`, native encoding.
        ArrayOfSByteNative = 0x42,
        /// One-dimensional `i8[]`, each element LEB128-encoded.
        ArrayOfSByteCompact = 0x43,
        /// One-dimensional `u8[]`, native encoding (a raw byte blob).
        ArrayOfByteNative = 0x44,
        /// One-dimensional `u8[]`, each element LEB128-encoded.
        ArrayOfByteCompact = 0x45,
        /// One-dimensional `i16[]`, native encoding.
        ArrayOfInt16Native = 0x46,
        /// One-dimensional `i16[]`, each element SLEB128-encoded.
        ArrayOfInt16Compact = 0x47,
        /// One-dimensional `u16[]`, native encoding.
        ArrayOfUInt16Native = 0x48,
        /// One-dimensional `u16[]`, each element LEB128-encoded.
        ArrayOfUInt16Compact = 0x49,
        /// One-dimensional `i32[]`, native encoding.
        ArrayOfInt32Native = 0x4A,
        /// One-dimensional `i32[]`, each element SLEB128-encoded.
        ArrayOfInt32Compact = 0x4B,
        /// One-dimensional `u32[]`, native encoding.
        ArrayOfUInt32Native = 0x4C,
        /// One-dimensional `u32[]`, each element LEB128-encoded.
        ArrayOfUInt32Compact = 0x4D,
        /// One-dimensional `i64[]`, native encoding.
        ArrayOfInt64Native = 0x4E,
        /// One-dimensional `i64[]`, each element SLEB128-encoded.
        ArrayOfInt64Compact = 0x4F,
        /// One-dimensional `u64[]`, native encoding.
        ArrayOfUInt64Native = 0x50,
        /// One-dimensional `u64[]`, each element LEB128-encoded.
        ArrayOfUInt64Compact = 0x51,
        /// One-dimensional `f32[]`, native encoding.
        ArrayOfSingleNative = 0x52,
        /// One-dimensional `f64[]`, native encoding.
        ArrayOfDoubleNative = 0x53,
        /// One-dimensional array of codec-backed or primitive objects, each
        /// element a fully tagged value (including possible `NullReference`
        /// / `AlreadySerialized`).
        ArrayOfObject = 0x54,

        /// A rectangular multi-dimensional array of a single primitive kind;
        /// payload starts with an element-kind byte (one of the `Array*`
        /// primitive kinds above) so the shape is still self-describing,
        /// followed by `leb128(rank) (leb128(lower_bound) leb128(length))^rank`
        /// and then `prod(length)` elements in row-major order.
        MultidimensionalArray = 0x60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn tags_roundtrip() {
        for &tag in PayloadTag::ALL {
            assert_eq!(PayloadTag::from_u8(tag.to_u8()), Ok(tag));
        }
    }

    #[test]
    fn tags_are_unique() {
        let mut seen = HashSet::new();
        for &tag in PayloadTag::ALL {
            assert!(seen.insert(tag.to_u8()), "duplicate tag byte: {:?}", tag);
        }
    }

    #[test]
    fn unknown_byte_is_invalid_tag() {
        assert_eq!(PayloadTag::from_u8(0xFF), Err(CoreError::InvalidTag { raw: 0xFF }));
    }
}
