//! PackStream encoder.

use bytes::{BufMut, BytesMut};

use super::marker::*;
use super::{PackStreamError, PackStreamStructure, PackStreamValue};

/// Writes PackStream values straight into a caller-owned buffer.
///
/// The framing codec hands its reusable write buffer to a `Packer`, so a
/// message is serialized once and never copied into an intermediate vector.
pub struct Packer<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> Packer<'a> {
    /// Wrap a buffer; values are appended after any existing content.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Append one value.
    pub fn pack(&mut self, value: &PackStreamValue) -> Result<(), PackStreamError> {
        match value {
            PackStreamValue::Null => self.buf.put_u8(NULL),
            PackStreamValue::Boolean(b) => self.buf.put_u8(if *b { TRUE } else { FALSE }),
            PackStreamValue::Integer(i) => self.pack_int(*i),
            PackStreamValue::Float(f) => {
                self.buf.put_u8(FLOAT_64);
                self.buf.put_f64(*f);
            }
            PackStreamValue::Bytes(b) => {
                self.pack_header(None, BYTES, b.len(), "bytes")?;
                self.buf.put_slice(b);
            }
            PackStreamValue::String(s) => self.pack_str(s)?,
            PackStreamValue::List(items) => {
                self.pack_header(Some(TINY_LIST), LIST, items.len(), "list")?;
                for item in items {
                    self.pack(item)?;
                }
            }
            PackStreamValue::Map(entries) => {
                self.pack_header(Some(TINY_MAP), MAP, entries.len(), "map")?;
                for (key, item) in entries {
                    self.pack_str(key)?;
                    self.pack(item)?;
                }
            }
            PackStreamValue::Structure(s) => self.pack_structure(s)?,
        }
        Ok(())
    }

    /// Append a structure. Only the tiny form is written.
    pub fn pack_structure(&mut self, s: &PackStreamStructure) -> Result<(), PackStreamError> {
        if s.fields.len() > 0x0F {
            return Err(PackStreamError::ValueTooLarge("structure", s.fields.len()));
        }
        self.buf.put_u8(TINY_STRUCT | s.fields.len() as u8);
        self.buf.put_u8(s.tag);
        for field in &s.fields {
            self.pack(field)?;
        }
        Ok(())
    }

    fn pack_str(&mut self, s: &str) -> Result<(), PackStreamError> {
        self.pack_header(Some(TINY_STRING), STRING, s.len(), "string")?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn pack_int(&mut self, v: i64) {
        match v {
            -16..=127 => self.buf.put_i8(v as i8),
            -128..=-17 => {
                self.buf.put_u8(INT_8);
                self.buf.put_i8(v as i8);
            }
            _ if i16::try_from(v).is_ok() => {
                self.buf.put_u8(INT_16);
                self.buf.put_i16(v as i16);
            }
            _ if i32::try_from(v).is_ok() => {
                self.buf.put_u8(INT_32);
                self.buf.put_i32(v as i32);
            }
            _ => {
                self.buf.put_u8(INT_64);
                self.buf.put_i64(v);
            }
        }
    }

    /// Marker plus size. `tiny` is the high nibble for sizes below 16, if the
    /// type has a tiny form; `sized` holds the 8/16/32-bit markers.
    fn pack_header(
        &mut self,
        tiny: Option<u8>,
        sized: [u8; 3],
        len: usize,
        what: &'static str,
    ) -> Result<(), PackStreamError> {
        match tiny {
            Some(nibble) if len < 0x10 => self.buf.put_u8(nibble | len as u8),
            _ if len <= u8::MAX as usize => {
                self.buf.put_u8(sized[0]);
                self.buf.put_u8(len as u8);
            }
            _ if len <= u16::MAX as usize => {
                self.buf.put_u8(sized[1]);
                self.buf.put_u16(len as u16);
            }
            _ if len <= u32::MAX as usize => {
                self.buf.put_u8(sized[2]);
                self.buf.put_u32(len as u32);
            }
            _ => return Err(PackStreamError::ValueTooLarge(what, len)),
        }
        Ok(())
    }
}

/// Encode a single value into a fresh buffer.
pub fn encode(value: &PackStreamValue) -> Result<BytesMut, PackStreamError> {
    let mut buf = BytesMut::with_capacity(64);
    Packer::new(&mut buf).pack(value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(value: PackStreamValue) -> Vec<u8> {
        encode(&value).unwrap().to_vec()
    }

    #[test]
    fn test_integer_size_classes() {
        assert_eq!(bytes_of(PackStreamValue::Integer(0)), [0x00]);
        assert_eq!(bytes_of(PackStreamValue::Integer(127)), [0x7F]);
        assert_eq!(bytes_of(PackStreamValue::Integer(-16)), [0xF0]);
        assert_eq!(bytes_of(PackStreamValue::Integer(-17)), [0xC8, 0xEF]);
        assert_eq!(bytes_of(PackStreamValue::Integer(128)), [0xC9, 0x00, 0x80]);
        assert_eq!(bytes_of(PackStreamValue::Integer(100_000)), [0xCA, 0x00, 0x01, 0x86, 0xA0]);
        assert_eq!(bytes_of(PackStreamValue::Integer(i64::MAX))[0], 0xCB);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(bytes_of(PackStreamValue::Null), [0xC0]);
        assert_eq!(bytes_of(PackStreamValue::Boolean(true)), [0xC3]);
        assert_eq!(bytes_of(PackStreamValue::Boolean(false)), [0xC2]);
        assert_eq!(bytes_of(PackStreamValue::Float(1.0))[0], 0xC1);
    }

    #[test]
    fn test_bytes_have_no_tiny_form() {
        assert_eq!(bytes_of(PackStreamValue::Bytes(vec![1, 2])), [0xCC, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn test_structure_header() {
        let s = PackStreamStructure::new(0x10, vec!["RETURN 1".into()]);
        let bytes = bytes_of(PackStreamValue::Structure(s));
        assert_eq!(bytes[..2], [0xB1, 0x10]);
    }

    #[test]
    fn test_structure_too_many_fields() {
        let s = PackStreamStructure::new(0x01, vec![PackStreamValue::Null; 16]);
        let mut buf = BytesMut::new();
        let err = Packer::new(&mut buf).pack_structure(&s).unwrap_err();
        assert_eq!(err, PackStreamError::ValueTooLarge("structure", 16));
    }

    #[test]
    fn test_packer_appends() {
        let mut buf = BytesMut::from(&[0xAA][..]);
        Packer::new(&mut buf).pack(&PackStreamValue::Null).unwrap();
        assert_eq!(&buf[..], &[0xAA, 0xC0]);
    }
}
