//! little-endian field access inside block buffers
//!
//! Callers check bounds before touching a field, an out-of-range offset
//! here is a logic error and panics like any slice index.

#[inline]
pub fn read_u16_le(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
pub fn read_u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
pub fn read_u64_le(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

#[inline]
pub fn write_u16_le(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_u32_le(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_u64_le(buf: &mut [u8], off: usize, value: u64) {
    buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_little_endian() {
        let mut buf = [0u8; 16];
        write_u16_le(&mut buf, 0, 0x0102);
        write_u32_le(&mut buf, 2, 0x0304_0506);
        write_u64_le(&mut buf, 6, 0x0708_090A_0B0C_0D0E);
        assert_eq!(&buf[..6], &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
        assert_eq!(buf[6], 0x0E);
        assert_eq!(read_u16_le(&buf, 0), 0x0102);
        assert_eq!(read_u32_le(&buf, 2), 0x0304_0506);
        assert_eq!(read_u64_le(&buf, 6), 0x0708_090A_0B0C_0D0E);
    }
}
