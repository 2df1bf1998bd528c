//! A growable byte buffer for manual, network-byte-order (de)serialization
//! of the wire messages in spec §6. Hand-rolled rather than pulled in from
//! `bincode`/`serde` because the wire shape fixes exact field widths and
//! ordering (`u16` type tag, `u32` source edge, `u32` length prefixes) that
//! a derive-based codec would not reproduce byte-for-byte. Grounded in
//! `original_source/src/common/dynamic_array.c`, the original's own
//! growable byte-array type backing its manual wire (de)serialization.

use crate::error::CacheError;

#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(data: Vec<u8>) -> Self {
        Self { data, read_pos: 0 }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// `u32`-length-prefixed variable-length field.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.data.extend_from_slice(bytes);
    }

    fn need(&self, n: usize) -> Result<(), CacheError> {
        if self.remaining() < n {
            return Err(CacheError::InvariantViolation(format!(
                "buffer underflow: needed {n} bytes, had {}",
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, CacheError> {
        self.need(1)?;
        let v = self.data[self.read_pos];
        self.read_pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16, CacheError> {
        self.need(2)?;
        let v = u16::from_be_bytes(self.data[self.read_pos..self.read_pos + 2].try_into().unwrap());
        self.read_pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, CacheError> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.data[self.read_pos..self.read_pos + 4].try_into().unwrap());
        self.read_pos += 4;
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64, CacheError> {
        self.need(8)?;
        let v = u64::from_be_bytes(self.data[self.read_pos..self.read_pos + 8].try_into().unwrap());
        self.read_pos += 8;
        Ok(v)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, CacheError> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let v = self.data[self.read_pos..self.read_pos + len].to_vec();
        self.read_pos += len;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_integer_width() {
        let mut buf = ByteBuffer::new();
        buf.put_u8(7);
        buf.put_u16(1234);
        buf.put_u32(567_890);
        buf.put_u64(123_456_789_012);
        buf.put_bytes(b"hello world");

        let mut reader = ByteBuffer::wrap(buf.into_vec());
        assert_eq!(reader.get_u8().unwrap(), 7);
        assert_eq!(reader.get_u16().unwrap(), 1234);
        assert_eq!(reader.get_u32().unwrap(), 567_890);
        assert_eq!(reader.get_u64().unwrap(), 123_456_789_012);
        assert_eq!(reader.get_bytes().unwrap(), b"hello world".to_vec());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn underflow_is_an_error_not_a_panic() {
        let mut reader = ByteBuffer::wrap(vec![0, 1]);
        assert!(reader.get_u32().is_err());
    }
}
