//! PackStream decoder.

use std::collections::HashMap;

use bytes::Buf;

use super::marker::*;
use super::{PackStreamError, PackStreamStructure, PackStreamValue};

/// Reads PackStream values from a byte slice, advancing through it.
pub struct Unpacker<'a> {
    buf: &'a [u8],
}

impl<'a> Unpacker<'a> {
    /// Create a new unpacker over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Read the next value.
    pub fn unpack(&mut self) -> Result<PackStreamValue, PackStreamError> {
        let marker = self.take_u8()?;
        let nibble = (marker & 0x0F) as usize;

        let value = match marker {
            0x00..=0x7F => PackStreamValue::Integer(marker as i64),
            0xF0..=0xFF => PackStreamValue::Integer(marker as i8 as i64),
            0x80..=0x8F => self.string(nibble)?,
            0x90..=0x9F => self.list(nibble)?,
            0xA0..=0xAF => self.map(nibble)?,
            0xB0..=0xBF => self.structure(nibble)?,

            NULL => PackStreamValue::Null,
            TRUE => PackStreamValue::Boolean(true),
            FALSE => PackStreamValue::Boolean(false),
            FLOAT_64 => {
                self.need(8)?;
                PackStreamValue::Float(self.buf.get_f64())
            }

            INT_8 => {
                self.need(1)?;
                PackStreamValue::Integer(self.buf.get_i8() as i64)
            }
            INT_16 => {
                self.need(2)?;
                PackStreamValue::Integer(self.buf.get_i16() as i64)
            }
            INT_32 => {
                self.need(4)?;
                PackStreamValue::Integer(self.buf.get_i32() as i64)
            }
            INT_64 => {
                self.need(8)?;
                PackStreamValue::Integer(self.buf.get_i64())
            }

            m if BYTES.contains(&m) => {
                let len = self.size(&BYTES, m)?;
                self.need(len)?;
                let bytes = self.buf[..len].to_vec();
                self.buf.advance(len);
                PackStreamValue::Bytes(bytes)
            }
            m if STRING.contains(&m) => {
                let len = self.size(&STRING, m)?;
                self.string(len)?
            }
            m if LIST.contains(&m) => {
                let len = self.size(&LIST, m)?;
                self.list(len)?
            }
            m if MAP.contains(&m) => {
                let len = self.size(&MAP, m)?;
                self.map(len)?
            }
            STRUCT_8 => {
                self.need(1)?;
                let len = self.buf.get_u8() as usize;
                self.structure(len)?
            }
            STRUCT_16 => {
                self.need(2)?;
                let len = self.buf.get_u16() as usize;
                self.structure(len)?
            }

            other => return Err(PackStreamError::UnknownMarker(other)),
        };

        Ok(value)
    }

    /// Size following an 8/16/32-bit marker.
    fn size(&mut self, markers: &[u8; 3], marker: u8) -> Result<usize, PackStreamError> {
        let len = if marker == markers[0] {
            self.need(1)?;
            self.buf.get_u8() as usize
        } else if marker == markers[1] {
            self.need(2)?;
            self.buf.get_u16() as usize
        } else {
            self.need(4)?;
            self.buf.get_u32() as usize
        };
        Ok(len)
    }

    fn string(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        self.need(len)?;
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?
            .to_string();
        self.buf.advance(len);
        Ok(PackStreamValue::String(s))
    }

    fn list(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        // Sizes come off the wire; cap the up-front allocation.
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.unpack()?);
        }
        Ok(PackStreamValue::List(items))
    }

    fn map(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        let mut entries = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match self.unpack()? {
                PackStreamValue::String(s) => s,
                _ => return Err(PackStreamError::InvalidMapKey),
            };
            let value = self.unpack()?;
            entries.insert(key, value);
        }
        Ok(PackStreamValue::Map(entries))
    }

    fn structure(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        let tag = self.take_u8()?;
        let mut fields = Vec::with_capacity(len.min(16));
        for _ in 0..len {
            fields.push(self.unpack()?);
        }
        Ok(PackStreamValue::Structure(PackStreamStructure::new(tag, fields)))
    }

    fn take_u8(&mut self) -> Result<u8, PackStreamError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn need(&self, n: usize) -> Result<(), PackStreamError> {
        if self.buf.remaining() < n {
            Err(PackStreamError::UnexpectedEof)
        } else {
            Ok(())
        }
    }
}

/// Decode a single value from `data`.
pub fn decode(data: &[u8]) -> Result<PackStreamValue, PackStreamError> {
    Unpacker::new(data).unpack()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode(&[0x7F]).unwrap(), PackStreamValue::Integer(127));
        assert_eq!(decode(&[0xF0]).unwrap(), PackStreamValue::Integer(-16));
        assert_eq!(decode(&[0xFF]).unwrap(), PackStreamValue::Integer(-1));
        assert_eq!(decode(&[0xC8, 0x80]).unwrap(), PackStreamValue::Integer(-128));
        assert_eq!(decode(&[0xC9, 0x03, 0xE8]).unwrap(), PackStreamValue::Integer(1000));
    }

    #[test]
    fn test_decode_sized_string() {
        let mut data = vec![0xD0, 20];
        data.extend(std::iter::repeat(b'a').take(20));
        assert_eq!(decode(&data).unwrap().as_str().unwrap().len(), 20);
    }

    #[test]
    fn test_decode_legacy_struct_marker() {
        let data = [0xDC, 0x01, 0x4E, 0x05];
        let value = decode(&data).unwrap();
        let s = value.as_structure().unwrap();
        assert_eq!(s.tag, 0x4E);
        assert_eq!(s.fields, vec![PackStreamValue::Integer(5)]);
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode(&[0xC9, 0x03]), Err(PackStreamError::UnexpectedEof));
        assert_eq!(decode(&[0x85, b'a']), Err(PackStreamError::UnexpectedEof));
        assert_eq!(decode(&[]), Err(PackStreamError::UnexpectedEof));
    }

    #[test]
    fn test_bad_input() {
        assert_eq!(decode(&[0xC7]), Err(PackStreamError::UnknownMarker(0xC7)));
        assert_eq!(decode(&[0xA1, 0x01, 0x01]), Err(PackStreamError::InvalidMapKey));
        assert!(matches!(decode(&[0x81, 0xFF]), Err(PackStreamError::InvalidUtf8(_))));
    }

    #[test]
    fn test_unpacker_sequence() {
        let data = [0x01, 0x02, 0xC0];
        let mut unpacker = Unpacker::new(&data);
        assert_eq!(unpacker.unpack().unwrap(), PackStreamValue::Integer(1));
        assert_eq!(unpacker.unpack().unwrap(), PackStreamValue::Integer(2));
        assert_eq!(unpacker.remaining(), 1);
        assert!(unpacker.unpack().unwrap().is_null());
    }
}
