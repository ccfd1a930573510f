//! Async framing helpers: header frames and length-delimited payloads.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChannelError;
use crate::packet::Packet;
use crate::{CHUNK_SIZE, FRAME_SIZE};

/// Writes one encoded header frame and flushes.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), ChannelError> {
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one header frame and decodes it.
///
/// EOF before the first byte is [`ChannelError::ConnectionClosed`]; EOF
/// part-way through the frame is a protocol error.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, ChannelError> {
    let mut frame = [0u8; FRAME_SIZE];
    let mut filled = 0;

    while filled < FRAME_SIZE {
        let n = reader.read(&mut frame[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(ChannelError::ConnectionClosed);
            }
            return Err(ChannelError::Protocol(format!(
                "truncated header: {filled} of {FRAME_SIZE} bytes"
            )));
        }
        filled += n;
    }

    Packet::decode(&frame)
}

/// Copies exactly `len` bytes from `reader` to `writer` in chunks.
///
/// Fails with a protocol error if `reader` hits EOF early. Flushes `writer`
/// before returning.
pub async fn copy_payload<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<u64, ChannelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE.min(len as usize).max(1)];
    let mut remaining = len;

    while remaining > 0 {
        let to_read = (remaining as usize).min(buf.len());
        let n = reader.read(&mut buf[..to_read]).await?;
        if n == 0 {
            return Err(ChannelError::Protocol(format!(
                "unexpected EOF: {} of {len} payload bytes",
                len - remaining
            )));
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }

    writer.flush().await?;
    Ok(len)
}

/// Runs `fut` with a deadline, mapping expiry to [`ChannelError::Timeout`].
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, ChannelError>
where
    F: Future<Output = Result<T, ChannelError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ChannelError::Timeout)?
}

#[cfg(test)]
mod tests {
    use imgrot_transform::Angle;

    use super::*;
    use crate::packet::Operation;

    #[tokio::test]
    async fn packet_roundtrip_over_stream() {
        let mut buf = Vec::new();
        write_packet(&mut buf, &Packet::rotate(Angle::Rotate180, 100))
            .await
            .unwrap();
        write_packet(&mut buf, &Packet::exit()).await.unwrap();
        assert_eq!(buf.len(), 2 * FRAME_SIZE);

        let mut cursor = &buf[..];
        let first = read_packet(&mut cursor).await.unwrap();
        assert_eq!(first.operation, Operation::Rotate);
        assert_eq!(first.payload_size, 100);
        assert_eq!(read_packet(&mut cursor).await.unwrap().operation, Operation::Exit);
        assert!(matches!(
            read_packet(&mut cursor).await,
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn truncated_header_is_protocol_error() {
        let frame = Packet::ack(5).encode();
        let mut cursor = &frame[..FRAME_SIZE / 2];
        assert!(matches!(
            read_packet(&mut cursor).await,
            Err(ChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn header_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_packet(&mut client, &Packet::ack(42)).await.unwrap();
        });

        let packet = read_packet(&mut server).await.unwrap();
        assert_eq!(packet, Packet::ack(42));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn copy_payload_stops_at_length() {
        let data: Vec<u8> = (0..=255).cycle().take(CHUNK_SIZE * 2 + 17).collect();
        let mut source = &data[..];
        let mut sink = Vec::new();

        let len = (data.len() - 10) as u64;
        assert_eq!(copy_payload(&mut source, &mut sink, len).await.unwrap(), len);
        assert_eq!(sink, &data[..data.len() - 10]);
        // The trailing bytes stay unread for the next frame.
        assert_eq!(source.len(), 10);
    }

    #[tokio::test]
    async fn copy_payload_detects_early_eof() {
        let data = [1u8; 10];
        let mut source = &data[..];
        let mut sink = Vec::new();
        assert!(matches!(
            copy_payload(&mut source, &mut sink, 11).await,
            Err(ChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn copy_payload_zero_length() {
        let mut source: &[u8] = &[];
        let mut sink = Vec::new();
        assert_eq!(copy_payload(&mut source, &mut sink, 0).await.unwrap(), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let (_client, mut server) = tokio::io::duplex(64);
        let result = with_deadline(Duration::from_secs(5), read_packet(&mut server)).await;
        assert!(matches!(result, Err(ChannelError::Timeout)));
    }
}
