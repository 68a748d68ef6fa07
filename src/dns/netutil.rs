//! Length framing for DNS over TCP: each message is preceded by its length
//! as a two octet big-endian integer.

use std::io::Result;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn read_packet_length<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u16> {
    let mut len_buffer = [0; 2];
    stream.read_exact(&mut len_buffer).await?;

    Ok(u16::from_be_bytes(len_buffer))
}

pub async fn write_packet_length<W: AsyncWrite + Unpin>(stream: &mut W, len: usize) -> Result<()> {
    stream.write_all(&(len as u16).to_be_bytes()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;

    #[tokio::test]
    async fn test_length_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_packet_length(&mut client, 0xABCD).await.unwrap();
        let len = read_packet_length(&mut server).await.unwrap();

        assert_eq!(0xABCD, len);
    }
}
