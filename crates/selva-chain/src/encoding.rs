// SPDX-License-Identifier: MIT

//! The canonical codec.
//!
//! Both the Builder and every client of the archive must produce
//! byte-for-byte identical encodings, since Merkle leaves are computed
//! over these bytes. The rules are small: integers are 8-byte
//! little-endian, booleans one byte, fixed-size arrays are raw,
//! variable-length sequences carry a u64 element count, and currency
//! values are length-prefixed minimal big-endian magnitudes.

use std::fmt;
use std::io;
use std::io::Read;
use std::io::Write;

use selva_common::impl_error_from;

/// Error produced while decoding canonical bytes.
#[derive(Debug)]
pub enum CodecError {
    /// An underlying read failed, including unexpected end of input.
    Io(io::Error),
    /// A boolean byte was something other than 0 or 1.
    InvalidBool(u8),
    /// A currency magnitude was longer than 16 bytes.
    OversizedCurrency(u64),
    /// A string was not valid UTF-8.
    InvalidString,
    /// `deserialize` was handed more bytes than the value consumed.
    TrailingBytes,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Io(e) => write!(f, "read failed: {e}"),
            CodecError::InvalidBool(b) => write!(f, "invalid boolean byte {b:#04x}"),
            CodecError::OversizedCurrency(len) => {
                write!(f, "currency magnitude of {len} bytes exceeds 16")
            }
            CodecError::InvalidString => write!(f, "string is not valid utf-8"),
            CodecError::TrailingBytes => write!(f, "input has trailing bytes"),
        }
    }
}

impl std::error::Error for CodecError {}

impl_error_from!(CodecError, io::Error, Io);

/// A type with a canonical byte encoding.
pub trait Encodable {
    /// Writes the canonical encoding, returning the number of bytes
    /// written.
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error>;
}

/// A type that can be rebuilt from its canonical encoding.
pub trait Decodable: Sized {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError>;
}

/// Encodes a value into a fresh buffer.
pub fn serialize<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value
        .consensus_encode(&mut buf)
        .expect("writing to a Vec cannot fail");
    buf
}

/// Decodes a value that must consume the whole input.
pub fn deserialize<T: Decodable>(mut bytes: &[u8]) -> Result<T, CodecError> {
    let value = T::consensus_decode(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(value)
}

impl Encodable for u64 {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_all(&self.to_le_bytes())?;
        Ok(8)
    }
}

impl Decodable for u64 {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl Encodable for bool {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_all(&[u8::from(*self)])?;
        Ok(1)
    }
}

impl Decodable for bool {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }
}

impl<const N: usize> Encodable for [u8; N] {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_all(self)?;
        Ok(N)
    }
}

impl<const N: usize> Decodable for [u8; N] {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; N];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut written = (self.len() as u64).consensus_encode(writer)?;
        for item in self {
            written += item.consensus_encode(writer)?;
        }
        Ok(written)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let count = u64::consensus_decode(reader)?;
        // The count is untrusted; cap the preallocation.
        let mut out = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            out.push(T::consensus_decode(reader)?);
        }
        Ok(out)
    }
}

impl Encodable for str {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let written = (self.len() as u64).consensus_encode(writer)?;
        writer.write_all(self.as_bytes())?;
        Ok(written + self.len())
    }
}

impl Encodable for String {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.as_str().consensus_encode(writer)
    }
}

impl Decodable for String {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let bytes = Bytes::consensus_decode(reader)?;
        String::from_utf8(bytes.0).map_err(|_| CodecError::InvalidString)
    }
}

/// A length-prefixed raw byte string.
///
/// `Vec<u8>` cannot go through the generic `Vec<T>` impl (that would
/// spend 8 bytes per element), so raw byte fields use this newtype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl Encodable for Bytes {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let written = (self.0.len() as u64).consensus_encode(writer)?;
        writer.write_all(&self.0)?;
        Ok(written + self.0.len())
    }
}

impl Decodable for Bytes {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let len = u64::consensus_decode(reader)?;
        let mut out = vec![0u8; len.min(4096) as usize];
        if (len as usize) <= out.len() {
            out.truncate(len as usize);
            reader.read_exact(&mut out)?;
        } else {
            // The length is untrusted; read in bounded chunks.
            reader.read_exact(&mut out)?;
            let mut remaining = len as usize - out.len();
            let mut chunk = [0u8; 4096];
            while remaining > 0 {
                let take = remaining.min(chunk.len());
                reader.read_exact(&mut chunk[..take])?;
                out.extend_from_slice(&chunk[..take]);
                remaining -= take;
            }
        }
        Ok(Bytes(out))
    }
}
