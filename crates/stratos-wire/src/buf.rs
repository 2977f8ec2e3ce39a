//! Minimal little-endian cursor writer/reader for the fixed wire layout.
//!
//! The protocol's byte layout (spec.md §6) is simple enough that a hand
//! written cursor is clearer than pulling in a generic serializer: every
//! field width and order is dictated by the spec, not inferred from a
//! derive.

use crate::WireError;

/// Appends fields to a growing byte buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed (`u16`) UTF-8 string, per spec.md §6's "service
    /// identifiers as length-prefixed UTF-8".
    pub fn put_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.put_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Pad with zero bytes until the buffer is exactly `len` bytes, used for
    /// the service port's fixed `PACKET_LENGTH` framing.
    pub fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields off a byte slice in order, erroring on truncation.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.data.len() {
            return Err(WireError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b: [u8; 2] = self.take(2)?.try_into().map_err(|_| WireError::Truncated)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b: [u8; 4] = self.take(4)?.try_into().map_err(|_| WireError::Truncated)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        let b: [u8; 4] = self.take(4)?.try_into().map_err(|_| WireError::Truncated)?;
        Ok(i32::from_le_bytes(b))
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        let b: [u8; 8] = self.take(8)?.try_into().map_err(|_| WireError::Truncated)?;
        Ok(f64::from_le_bytes(b))
    }

    pub fn get_string(&mut self) -> Result<String, WireError> {
        let len = self.get_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_field_kinds() {
        let mut w = Writer::new();
        w.put_u8(7);
        w.put_u32(123_456);
        w.put_f64(3.5);
        w.put_string("svc-name");
        w.put_i32(-42);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u32().unwrap(), 123_456);
        assert_eq!(r.get_f64().unwrap(), 3.5);
        assert_eq!(r.get_string().unwrap(), "svc-name");
        assert_eq!(r.get_i32().unwrap(), -42);
    }

    #[test]
    fn truncated_read_errors() {
        let bytes = [1u8, 2];
        let mut r = Reader::new(&bytes);
        assert!(r.get_u32().is_err());
    }

    #[test]
    fn pad_to_extends_with_zeros() {
        let mut w = Writer::new();
        w.put_u8(1);
        w.pad_to(8);
        assert_eq!(w.into_bytes(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }
}
