pub mod conn;
pub mod dispatch;
pub mod packet;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::ServerError;
use packet::{Packet, ENCIPHERED_HEADER_LEN};

/// Largest frame body accepted from or sent to a peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Depth of each connection's outbound queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Read one framed packet from `reader`.
///
/// Frame: [body_len u32 LE][body]. Returns `Ok(None)` on a clean EOF at a
/// frame boundary; EOF inside a frame is a transport error.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; ENCIPHERED_HEADER_LEN];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let body_len = u32::from_le_bytes(header) as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(ServerError::PacketTooLarge(body_len));
    }
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Packet::from_body(body)))
}

/// Write one packet as a frame, filling in the enciphered placeholder.
pub async fn write_packet<W>(writer: &mut W, mut packet: Packet) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let body_len = packet.body().len();
    if body_len > MAX_FRAME_LEN {
        return Err(ServerError::PacketTooLarge(body_len));
    }
    // plaintext packets go out raw
    if let Some(header) = packet.header_mut() {
        header.copy_from_slice(&(body_len as u32).to_le_bytes());
    }
    writer.write_all(packet.as_bytes()).await?;
    Ok(())
}

/// Drains a connection's outbound queue onto the socket.
pub async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Packet>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = rx.recv().await {
        tracing::trace!("[net] [packet_out] bytes={}", hex::encode(packet.as_bytes()));
        if let Err(e) = write_packet(&mut writer, packet).await {
            tracing::debug!("[net] [write_failed] {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Cloneable handle onto a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::Sender<Packet>,
}

impl PacketSender {
    /// A sender plus the receiving end the writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send(&self, packet: Packet) -> Result<(), ServerError> {
        self.tx.send(packet).await.map_err(|_| ServerError::LinkClosed)
    }

    /// True if both handles feed the same connection.
    pub fn same_link(&self, other: &PacketSender) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_fills_placeholder() {
        let mut p = Packet::new_enciphered(0x1004);
        p.encode1(7);

        let mut wire = Vec::new();
        write_packet(&mut wire, p).await.unwrap();
        assert_eq!(&wire[..4], &3u32.to_le_bytes());

        let mut reader = &wire[..];
        let got = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(got.body(), &[0x04, 0x10, 7]);
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_transport_error() {
        let wire = [1u8, 0];
        let mut reader = &wire[..];
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(ServerError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let wire = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        let mut reader = &wire[..];
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(ServerError::PacketTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_plaintext_written_raw() {
        let p = Packet::new_plain(0x000D);
        let mut wire = Vec::new();
        write_packet(&mut wire, p).await.unwrap();
        assert_eq!(wire, vec![0x0D, 0x00]);
    }

    #[tokio::test]
    async fn test_sender_same_link() {
        let (a, _rx_a) = PacketSender::channel(1);
        let (b, _rx_b) = PacketSender::channel(1);
        assert!(a.same_link(&a.clone()));
        assert!(!a.same_link(&b));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = PacketSender::channel(1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(
            tx.send(Packet::new_enciphered(1)).await,
            Err(ServerError::LinkClosed)
        ));
    }
}
