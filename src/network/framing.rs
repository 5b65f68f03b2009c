//! Length-prefixed framing shared by the relay and its peers.
//!
//! Every header travels as a frame: a 4-byte big-endian length followed by
//! that many bytes. Image and file headers are followed by exactly the
//! declared number of raw body bytes, which are not framed.
//!
//! The handshake is one frame carrying the UTF-8 peer id, answered by the
//! single byte [`HANDSHAKE_ACK`].

use crate::network::protocol::Envelope;
use crate::{RelayError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HANDSHAKE_ACK: u8 = 1;
pub const MAX_PEER_ID_LEN: usize = 256;
pub const LENGTH_PREFIX: usize = 4;

/// Prefixes `payload` with its length, ready to be written verbatim.
pub fn frame_bytes(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| RelayError::Transfer("Frame too large".to_string()))?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&frame_bytes(payload)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` when the stream ends cleanly on a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        let n = reader.read(&mut len_bytes[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let frame_len = u32::from_be_bytes(len_bytes) as usize;
    if frame_len > max_len {
        return Err(RelayError::Decode(format!(
            "Frame of {} bytes exceeds limit of {}",
            frame_len, max_len
        )));
    }

    let mut data = vec![0u8; frame_len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let data = envelope.encode()?;
    write_frame(writer, &data).await
}

/// Reads the next piece of a sized body, never more than `remaining` bytes.
/// A stream that closes before the body is complete is an error.
pub async fn read_body_chunk<R>(reader: &mut R, buf: &mut [u8], remaining: u64) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
    if want == 0 {
        return Ok(0);
    }
    let n = reader.read(&mut buf[..want]).await?;
    if n == 0 {
        return Err(RelayError::Transfer(format!(
            "Connection closed with {} body bytes outstanding",
            remaining
        )));
    }
    Ok(n)
}

/// Client side of the handshake: announce the peer id.
pub async fn send_handshake<W>(writer: &mut W, peer_id: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    validate_peer_id(peer_id)?;
    write_frame(writer, peer_id.as_bytes()).await
}

/// Server side of the handshake: the first frame is the peer id.
pub async fn read_handshake<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let data = read_frame(reader, MAX_PEER_ID_LEN)
        .await?
        .ok_or_else(|| RelayError::Handshake("Connection closed before handshake".to_string()))?;

    let peer_id = String::from_utf8(data)
        .map_err(|_| RelayError::Handshake("Peer id is not valid UTF-8".to_string()))?;
    validate_peer_id(&peer_id)?;
    Ok(peer_id)
}

pub async fn send_ack<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&[HANDSHAKE_ACK]).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_ack<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut ack = [0u8; 1];
    reader.read_exact(&mut ack).await?;
    if ack[0] != HANDSHAKE_ACK {
        return Err(RelayError::Handshake(format!(
            "Server refused connection (ack byte {})",
            ack[0]
        )));
    }
    Ok(())
}

pub fn validate_peer_id(peer_id: &str) -> Result<()> {
    if peer_id.is_empty() {
        return Err(RelayError::Handshake("Peer id is empty".to_string()));
    }
    if peer_id.len() > MAX_PEER_ID_LEN {
        return Err(RelayError::Handshake(format!(
            "Peer id longer than {} bytes",
            MAX_PEER_ID_LEN
        )));
    }
    Ok(())
}
