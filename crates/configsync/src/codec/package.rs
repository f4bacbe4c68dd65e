use bitflags::bitflags;

use crate::error::CodecError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PackageFlags: u8 {
        const PARTIAL = 1 << 0;
        const FRAGMENTED = 1 << 1;
        const COMPRESSED = 1 << 2;
    }
}

/// Little-endian byte cursor. Writes append at the end, reads advance from
/// the current position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    buf: Vec<u8>,
    pos: usize,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_flags(&mut self, flags: PackageFlags) {
        self.write_u8(flags.bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Collection and field counts are written as i32.
    pub fn write_len(&mut self, len: usize) {
        self.write_i32(len as i32);
    }

    /// 7-bit varint length prefix followed by UTF-8 bytes.
    pub fn write_str(&mut self, value: &str) {
        let mut len = value.len() as u32;
        while len >= 0x80 {
            self.buf.push((len as u8) | 0x80);
            len >>= 7;
        }
        self.buf.push(len as u8);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_len(data.len());
        self.buf.extend_from_slice(data);
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof { position: self.pos });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_flags(&mut self) -> Result<PackageFlags, CodecError> {
        Ok(PackageFlags::from_bits_retain(self.read_u8()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let position = self.pos;
        let length = self.read_i32()?;
        usize::try_from(length).map_err(|_| CodecError::NegativeLength { length, position })
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(CodecError::NegativeLength {
                    length: -1,
                    position: self.pos,
                });
            }
        }
        let position = self.pos;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { position })
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_read_back_in_order() {
        let mut package = Package::new();
        package.write_flags(PackageFlags::PARTIAL | PackageFlags::COMPRESSED);
        package.write_i32(-7);
        package.write_i64(1 << 40);
        package.write_f32(2.5);
        package.write_str("Internal");
        package.write_bytes(&[1, 2, 3]);

        let mut reader = Package::from_bytes(package.into_bytes());
        let flags = reader.read_flags().unwrap();
        assert!(flags.contains(PackageFlags::PARTIAL));
        assert!(!flags.contains(PackageFlags::FRAGMENTED));
        assert_eq!(reader.read_i32().unwrap(), -7);
        assert_eq!(reader.read_i64().unwrap(), 1 << 40);
        assert_eq!(reader.read_f32().unwrap(), 2.5);
        assert_eq!(reader.read_str().unwrap(), "Internal");
        assert_eq!(reader.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_long_string_uses_multi_byte_length() {
        let text = "x".repeat(300);
        let mut package = Package::new();
        package.write_str(&text);
        assert_eq!(package.len(), 302);

        let mut reader = Package::from_bytes(package.into_bytes());
        assert_eq!(reader.read_str().unwrap(), text);
    }

    #[test]
    fn test_truncated_read_reports_position() {
        let mut reader = Package::from_bytes(vec![1, 2]);
        assert_eq!(
            reader.read_i32(),
            Err(CodecError::UnexpectedEof { position: 0 })
        );
    }

    #[test]
    fn test_negative_byte_array_length_is_rejected() {
        let mut package = Package::new();
        package.write_i32(-5);
        let mut reader = Package::from_bytes(package.into_bytes());
        assert!(matches!(
            reader.read_bytes(),
            Err(CodecError::NegativeLength { length: -5, .. })
        ));
    }
}
