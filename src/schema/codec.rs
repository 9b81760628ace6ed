//! Little-endian byte codec with bounds-checked reads.
//!
//! Every read checks the remaining length first and reports a
//! [`FormatError::Truncated`] instead of indexing out of range. Length
//! prefixes are validated against the bytes actually left so a corrupted
//! count cannot trigger a huge allocation.

use crate::core::error::FormatError;

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_len(&mut self, len: usize) {
        self.put_u32(len as u32);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_opt_u64(&mut self, v: Option<u64>) {
        match v {
            Some(v) => {
                self.put_u8(1);
                self.put_u64(v);
            }
            None => self.put_u8(0),
        }
    }

    pub fn put_vec<T: WireEncode>(&mut self, items: &[T]) {
        self.put_len(items.len());
        for item in items {
            item.encode(self);
        }
    }

    pub fn put_opt<T: WireEncode>(&mut self, item: Option<&T>) {
        match item {
            Some(item) => {
                self.put_u8(1);
                item.encode(self);
            }
            None => self.put_u8(0),
        }
    }
}

/// Bounds-checked decoder over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, FormatError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(FormatError::InvalidTag { kind: "bool", tag: tag as u32 }),
        }
    }

    pub fn get_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    /// Read a length prefix for items at least `min_item_size` bytes long.
    pub fn get_len(&mut self, min_item_size: usize) -> Result<usize, FormatError> {
        let offset = self.pos;
        let len = self.get_u32()? as usize;
        let needed = len.saturating_mul(min_item_size.max(1));
        if needed > self.remaining() {
            return Err(FormatError::Truncated {
                offset,
                needed,
                available: self.remaining(),
            });
        }
        Ok(len)
    }

    pub fn get_str(&mut self) -> Result<String, FormatError> {
        let len = self.get_len(1)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidTag {
            kind: "utf-8 string",
            tag: len as u32,
        })
    }

    pub fn get_opt_u64(&mut self) -> Result<Option<u64>, FormatError> {
        if self.get_bool()? {
            Ok(Some(self.get_u64()?))
        } else {
            Ok(None)
        }
    }

    pub fn get_vec<T: WireDecode>(&mut self) -> Result<Vec<T>, FormatError> {
        let len = self.get_len(T::MIN_SIZE)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    pub fn get_opt<T: WireDecode>(&mut self) -> Result<Option<T>, FormatError> {
        if self.get_bool()? {
            Ok(Some(T::decode(self)?))
        } else {
            Ok(None)
        }
    }

    /// Fail unless every byte was consumed.
    pub fn finish(&self, section: &'static str) -> Result<(), FormatError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(FormatError::TrailingBytes { section, count }),
        }
    }
}

pub trait WireEncode {
    fn encode(&self, w: &mut ByteWriter);
}

pub trait WireDecode: Sized {
    /// Smallest encoded size, used to validate length prefixes.
    const MIN_SIZE: usize = 1;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError>;
}

macro_rules! wire_primitive {
    ($ty:ty, $put:ident, $get:ident, $size:expr) => {
        impl WireEncode for $ty {
            fn encode(&self, w: &mut ByteWriter) {
                w.$put(*self);
            }
        }

        impl WireDecode for $ty {
            const MIN_SIZE: usize = $size;

            fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
                r.$get()
            }
        }
    };
}

wire_primitive!(u8, put_u8, get_u8, 1);
wire_primitive!(u16, put_u16, get_u16, 2);
wire_primitive!(u32, put_u32, get_u32, 4);
wire_primitive!(i32, put_i32, get_i32, 4);
wire_primitive!(u64, put_u64, get_u64, 8);
wire_primitive!(f32, put_f32, get_f32, 4);

impl WireEncode for String {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_str(self);
    }
}

impl WireDecode for String {
    const MIN_SIZE: usize = 4;

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        r.get_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives() {
        let mut w = ByteWriter::new();
        w.put_u16(0xBEEF);
        w.put_i32(-7);
        w.put_str("conv1sub0");
        w.put_opt_u64(Some(42));
        w.put_opt_u64(None);
        w.put_vec(&[1u32, 2, 3]);
        let bytes = w.into_inner();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.get_u16().unwrap(), 0xBEEF);
        assert_eq!(r.get_i32().unwrap(), -7);
        assert_eq!(r.get_str().unwrap(), "conv1sub0");
        assert_eq!(r.get_opt_u64().unwrap(), Some(42));
        assert_eq!(r.get_opt_u64().unwrap(), None);
        assert_eq!(r.get_vec::<u32>().unwrap(), vec![1, 2, 3]);
        assert!(r.finish("test").is_ok());
    }

    #[test]
    fn test_truncated_read() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        let err = r.get_u32().unwrap_err();
        assert_eq!(
            err,
            FormatError::Truncated { offset: 0, needed: 4, available: 3 }
        );
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut w = ByteWriter::new();
        w.put_u32(u32::MAX);
        w.put_u64(0);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.get_vec::<u64>(), Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_trailing_bytes() {
        let r = ByteReader::new(&[0]);
        assert_eq!(
            r.finish("header"),
            Err(FormatError::TrailingBytes { section: "header", count: 1 })
        );
    }
}
