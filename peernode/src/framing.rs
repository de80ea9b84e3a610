//! Explicit message framing for the inter-peer wire protocol.
//!
//! Spec §9: the original relies on a single 1024-byte `recv` holding a
//! whole message, which is not reliable over TCP. Text commands here are
//! newline-delimited; the `block` response (the one variable-length binary
//! payload) is length-prefixed so a short final block is unambiguous.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest text command line we'll accept before giving up on a
/// connection — generous for any path/root name in practice.
const MAX_LINE_BYTES: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("line exceeded {MAX_LINE_BYTES} bytes without a newline")]
    LineTooLong,

    #[error("connection closed before a full message arrived")]
    ConnectionClosed,
}

type Result<T> = std::result::Result<T, FramingError>;

pub async fn write_line<W: AsyncWriteExt + Unpin>(stream: &mut W, line: &str) -> Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    Ok(())
}

/// Reads one newline-delimited line, with the trailing `\n` stripped.
/// Returns `FramingError::ConnectionClosed` if the peer closes without
/// sending any bytes.
pub async fn read_line<R: AsyncReadExt + Unpin>(stream: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err(FramingError::ConnectionClosed);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_LINE_BYTES {
            return Err(FramingError::LineTooLong);
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub async fn write_framed_bytes<W: AsyncWriteExt + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
    stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
    stream.write_all(data).await?;
    Ok(())
}

pub async fn read_framed_bytes<R: AsyncReadExt + Unpin>(stream: &mut R) -> Result<Bytes> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn line_round_trips() {
        let mut buf = Vec::new();
        write_line(&mut buf, "hello world block").await.unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_line(&mut cursor).await.unwrap(), "hello world block");
    }

    #[tokio::test]
    async fn framed_bytes_round_trip_including_short_final_block() {
        let mut buf = Vec::new();
        write_framed_bytes(&mut buf, b"ab").await.unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_framed_bytes(&mut cursor).await.unwrap(), Bytes::from_static(b"ab"));
    }

    #[tokio::test]
    async fn empty_connection_reports_closed() {
        let mut cursor = Cursor::new(Vec::new());
        let err = read_line(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FramingError::ConnectionClosed));
    }
}
