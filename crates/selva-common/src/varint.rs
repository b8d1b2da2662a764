// SPDX-License-Identifier: MIT

//! LEB128 varints, as used for the list counts in the address index.
//!
//! A u64 takes at most 10 bytes on the wire.

use unsigned_varint::decode;
use unsigned_varint::encode;

/// Maximum encoded size of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends the varint encoding of `value` to `out` and returns the
/// number of bytes written.
pub fn write_uvarint(value: u64, out: &mut Vec<u8>) -> usize {
    let mut buf = encode::u64_buffer();
    let encoded = encode::u64(value, &mut buf);
    out.extend_from_slice(encoded);
    encoded.len()
}

/// Decodes a varint from the start of `bytes`. Returns the value and the
/// number of bytes consumed, or None if the buffer holds no valid varint.
pub fn read_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let (value, rest) = decode::u64(bytes).ok()?;
    Some((value, bytes.len() - rest.len()))
}

#[cfg(test)]
mod test {
    use super::read_uvarint;
    use super::write_uvarint;
    use super::MAX_VARINT_LEN;

    #[test]
    fn test_round_trip() {
        for value in [
            0u64,
            1,
            127,
            128,
            300,
            16384,
            u32::MAX as u64,
            u64::MAX - 1,
            u64::MAX,
        ] {
            let mut buf = Vec::new();
            let written = write_uvarint(value, &mut buf);
            assert_eq!(written, buf.len());
            assert!(written <= MAX_VARINT_LEN);
            let (decoded, read) = read_uvarint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(read, written);
        }
    }

    #[test]
    fn test_decode_with_trailing_data() {
        let mut buf = Vec::new();
        write_uvarint(300, &mut buf);
        let varint_len = buf.len();
        buf.extend_from_slice(&[0xAA, 0xBB]);
        let (value, read) = read_uvarint(&buf).unwrap();
        assert_eq!(value, 300);
        assert_eq!(read, varint_len);
    }

    #[test]
    fn test_decode_truncated() {
        // A continuation bit with nothing after it
        assert!(read_uvarint(&[0x80]).is_none());
        assert!(read_uvarint(&[]).is_none());
    }
}
