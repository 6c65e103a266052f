//! Wire-level constants and primitive readers/writers.
//!
//! All integers are little-endian. Strings are UTF-8, prefixed with their
//! byte length as a 7-bit variable-length integer (at most five bytes).

use atosave_common::{Error, Result};

use crate::node::{Primitive, PrimitiveKind};

/// Record type tags.
pub(crate) mod record_type {
    pub const SERIALIZED_STREAM_HEADER: u8 = 0;
    pub const CLASS_WITH_ID: u8 = 1;
    pub const SYSTEM_CLASS_WITH_MEMBERS: u8 = 2;
    pub const CLASS_WITH_MEMBERS: u8 = 3;
    pub const SYSTEM_CLASS_WITH_MEMBERS_AND_TYPES: u8 = 4;
    pub const CLASS_WITH_MEMBERS_AND_TYPES: u8 = 5;
    pub const BINARY_OBJECT_STRING: u8 = 6;
    pub const BINARY_ARRAY: u8 = 7;
    pub const MEMBER_PRIMITIVE_TYPED: u8 = 8;
    pub const MEMBER_REFERENCE: u8 = 9;
    pub const OBJECT_NULL: u8 = 10;
    pub const MESSAGE_END: u8 = 11;
    pub const BINARY_LIBRARY: u8 = 12;
    pub const OBJECT_NULL_MULTIPLE_256: u8 = 13;
    pub const OBJECT_NULL_MULTIPLE: u8 = 14;
    pub const ARRAY_SINGLE_PRIMITIVE: u8 = 15;
    pub const ARRAY_SINGLE_OBJECT: u8 = 16;
    pub const ARRAY_SINGLE_STRING: u8 = 17;
    pub const METHOD_CALL: u8 = 21;
    pub const METHOD_RETURN: u8 = 22;
}

/// Member type tags in a type descriptor.
pub(crate) mod binary_type {
    pub const PRIMITIVE: u8 = 0;
    pub const STRING: u8 = 1;
    pub const OBJECT: u8 = 2;
    pub const SYSTEM_CLASS: u8 = 3;
    pub const CLASS: u8 = 4;
    pub const OBJECT_ARRAY: u8 = 5;
    pub const STRING_ARRAY: u8 = 6;
    pub const PRIMITIVE_ARRAY: u8 = 7;
}

/// Array shape of a BinaryArray record.
pub(crate) const BINARY_ARRAY_SINGLE: u8 = 0;

/// Serialization version written in the stream header.
pub(crate) const MAJOR_VERSION: i32 = 1;
pub(crate) const MINOR_VERSION: i32 = 0;

/// Cursor over a cleartext buffer that reports failures with offsets.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::malformed(
                self.pos,
                format!(
                    "truncated buffer: needed {} bytes, {} remain",
                    n,
                    self.remaining()
                ),
            ));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Read a count that must not be negative.
    pub fn read_len(&mut self, what: &str) -> Result<usize> {
        let at = self.pos;
        let value = self.read_i32()?;
        usize::try_from(value)
            .map_err(|_| Error::malformed(at, format!("negative {}: {}", what, value)))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        let mut len: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 28 && byte & 0xF8 != 0 {
                return Err(Error::malformed(start, "string length prefix overflows"));
            }
            len |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::malformed(start, "string is not valid UTF-8"))
    }

    /// Read an untagged primitive of the given kind.
    pub fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<Primitive> {
        let at = self.pos;
        let value = match kind {
            PrimitiveKind::Boolean => match self.read_u8()? {
                0 => Primitive::Boolean(false),
                1 => Primitive::Boolean(true),
                other => {
                    return Err(Error::malformed(
                        at,
                        format!("invalid boolean byte {:#04x}", other),
                    ))
                }
            },
            PrimitiveKind::Byte => Primitive::Byte(self.read_u8()?),
            PrimitiveKind::Char => Primitive::Char(self.read_char()?),
            PrimitiveKind::Decimal => Primitive::Decimal(self.read_string()?),
            PrimitiveKind::Double => Primitive::Double(f64::from_le_bytes(self.array()?)),
            PrimitiveKind::Int16 => Primitive::Int16(i16::from_le_bytes(self.array()?)),
            PrimitiveKind::Int32 => Primitive::Int32(i32::from_le_bytes(self.array()?)),
            PrimitiveKind::Int64 => Primitive::Int64(i64::from_le_bytes(self.array()?)),
            PrimitiveKind::SByte => Primitive::SByte(i8::from_le_bytes(self.array()?)),
            PrimitiveKind::Single => Primitive::Single(f32::from_le_bytes(self.array()?)),
            PrimitiveKind::TimeSpan => Primitive::TimeSpan(i64::from_le_bytes(self.array()?)),
            PrimitiveKind::DateTime => Primitive::DateTime(i64::from_le_bytes(self.array()?)),
            PrimitiveKind::UInt16 => Primitive::UInt16(u16::from_le_bytes(self.array()?)),
            PrimitiveKind::UInt32 => Primitive::UInt32(u32::from_le_bytes(self.array()?)),
            PrimitiveKind::UInt64 => Primitive::UInt64(u64::from_le_bytes(self.array()?)),
        };
        Ok(value)
    }

    /// Read a primitive kind tag.
    pub fn read_primitive_kind(&mut self) -> Result<PrimitiveKind> {
        let at = self.pos;
        let code = self.read_u8()?;
        PrimitiveKind::from_code(code)
            .ok_or_else(|| Error::malformed(at, format!("unknown primitive kind tag {}", code)))
    }

    /// A char is stored as its UTF-8 encoding.
    fn read_char(&mut self) -> Result<char> {
        let at = self.pos;
        let lead = self.read_u8()?;
        let width = match lead {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(Error::malformed(at, "invalid UTF-8 char")),
        };
        let mut buf = [lead, 0, 0, 0];
        buf[1..width].copy_from_slice(self.take(width - 1)?);
        std::str::from_utf8(&buf[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .ok_or_else(|| Error::malformed(at, "invalid UTF-8 char"))
    }
}

pub(crate) fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write a count as the signed 32-bit value the format uses.
pub(crate) fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let value = i32::try_from(len)
        .map_err(|_| Error::InvalidInput(format!("length {} exceeds format limit", len)))?;
    write_i32(out, value);
    Ok(())
}

pub(crate) fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u32::try_from(value.len())
        .ok()
        .filter(|&n| n <= i32::MAX as u32)
        .ok_or_else(|| Error::InvalidInput("string exceeds format limit".to_string()))?;
    let mut rest = len;
    while rest >= 0x80 {
        out.push((rest as u8 & 0x7F) | 0x80);
        rest >>= 7;
    }
    out.push(rest as u8);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Write an untagged primitive.
pub(crate) fn write_primitive(out: &mut Vec<u8>, value: &Primitive) -> Result<()> {
    match value {
        Primitive::Boolean(v) => out.push(u8::from(*v)),
        Primitive::Byte(v) => out.push(*v),
        Primitive::Char(v) => {
            let mut buf = [0u8; 4];
            out.extend_from_slice(v.encode_utf8(&mut buf).as_bytes());
        }
        Primitive::Decimal(v) => write_string(out, v)?,
        Primitive::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::SByte(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::Single(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::TimeSpan(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::DateTime(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
    Ok(())
}
