// SPDX-License-Identifier: MIT

//! Length-prefixed object framing.
//!
//! A frame is a u64 little-endian payload length followed by the
//! payload's canonical encoding. Readers state how large a payload
//! they are willing to buffer; the check happens before any
//! allocation.

use selva_chain::deserialize;
use selva_chain::serialize;
use selva_chain::Decodable;
use selva_chain::Encodable;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::WireError;

pub async fn write_object<W, T>(writer: &mut W, value: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Encodable + ?Sized,
{
    let payload = serialize(value);
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame).await?;
    Ok(())
}

pub async fn read_object<R, T>(reader: &mut R, max_len: u64) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: Decodable,
{
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf).await?;
    let len = u64::from_le_bytes(len_buf);
    if len > max_len {
        return Err(WireError::MessageTooBig { len, max: max_len });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(deserialize(&payload)?)
}

#[cfg(test)]
mod test {
    use super::read_object;
    use super::write_object;
    use crate::error::WireError;

    #[tokio::test]
    async fn test_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_object(&mut client, &42u64).await.unwrap();
        write_object(&mut client, "hello").await.unwrap();

        let number: u64 = read_object(&mut server, 100).await.unwrap();
        assert_eq!(number, 42);
        let text: String = read_object(&mut server, 100).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_cap_enforced() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_object(&mut client, "a longer message").await.unwrap();
        let result: Result<String, WireError> = read_object(&mut server, 4).await;
        assert!(matches!(result, Err(WireError::MessageTooBig { .. })));
    }
}
