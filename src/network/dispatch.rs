//! Listener/dialer drivers shared by every server role.
//!
//! A role plugs in by implementing `SessionHandler`; the drivers own the
//! socket, run one read loop per connection on its own task and always call
//! `on_disconnect` exactly once when the loop ends.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};

use super::conn::AsConnection;
use super::packet::PacketIterator;
use super::{read_packet, write_loop, PacketSender, OUTBOUND_QUEUE};
use crate::error::ServerError;
use crate::packets::opcodes;

/// Role-specific session logic driven by `serve_connection`.
pub trait SessionHandler: Send + Sync + 'static {
    type Conn: AsConnection + Send + 'static;

    /// Build the per-connection state before any bytes are exchanged.
    fn make_connection(&self, addr: SocketAddr, tx: PacketSender) -> Self::Conn;

    /// Runs once before the read loop. Dialers send their auth message here.
    fn on_connect(
        &self,
        _conn: &mut Self::Conn,
    ) -> impl Future<Output = Result<(), ServerError>> + Send {
        async { Ok(()) }
    }

    /// Handle one packet whose opcode has already been read.
    ///
    /// `Ok(false)` means the opcode is not handled in the current state.
    fn handle_packet(
        &self,
        conn: &mut Self::Conn,
        opcode: u16,
        it: PacketIterator<'_>,
    ) -> impl Future<Output = Result<bool, ServerError>> + Send;

    fn on_disconnect(&self, conn: Self::Conn) -> impl Future<Output = ()> + Send;
}

/// Reconnect delays for the dialer.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Doubles `current`, capped at `max`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }

    /// `delay` plus up to 25% random jitter.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let spread = (delay.as_millis() as u64 / 4).max(1);
        delay + Duration::from_millis(rand::random::<u64>() % spread)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Serve one established stream until it closes or misbehaves.
///
/// Returns the error that ended the session, `Ok(())` on a clean close.
pub async fn serve_connection<H: SessionHandler>(
    name: &'static str,
    handler: Arc<H>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let (mut read_half, write_half) = stream.into_split();
    let (tx, rx) = PacketSender::channel(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_loop(write_half, rx));

    let mut conn = handler.make_connection(addr, tx);
    tracing::info!("[{}] [connected] addr={}", name, addr);

    let result = match handler.on_connect(&mut conn).await {
        Ok(()) => read_loop(name, &*handler, &mut conn, &mut read_half).await,
        Err(e) => Err(e),
    };

    match &result {
        Ok(()) => tracing::info!("[{}] [disconnected] addr={}", name, addr),
        Err(e) => tracing::warn!("[{}] [closed] addr={} reason={}", name, addr, e),
    }

    handler.on_disconnect(conn).await;
    writer.abort();
    result
}

async fn read_loop<H, R>(
    name: &'static str,
    handler: &H,
    conn: &mut H::Conn,
    reader: &mut R,
) -> Result<(), ServerError>
where
    H: SessionHandler,
    R: AsyncRead + Unpin + Send,
{
    while let Some(packet) = read_packet(reader).await? {
        let authenticated = conn.connection().authenticated();
        tracing::trace!("[{}] [packet_in] bytes={}", name, hex::encode(packet.body()));

        let mut it = packet.begin();
        let opcode = match it.decode2() {
            Ok(op) => op,
            Err(e) if authenticated => {
                tracing::warn!("[{}] [packet_dropped] {}", name, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        if !authenticated && opcode != opcodes::IO_AUTH {
            return Err(ServerError::Unauthenticated { opcode });
        }

        match handler.handle_packet(conn, opcode, it).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("[{}] [packet_unhandled] opcode={:04X}", name, opcode);
            }
            Err(e) if authenticated && e.is_decode_error() => {
                tracing::warn!("[{}] [packet_dropped] opcode={:04X} {}", name, opcode, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Accept connections on an already-bound listener forever, one task each.
pub async fn serve_listener<H: SessionHandler>(
    name: &'static str,
    listener: TcpListener,
    handler: Arc<H>,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("[{}] [ready] addr={}", name, addr);
    }
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("[{}] [accept_failed] {}", name, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let h = Arc::clone(&handler);
        tokio::spawn(async move {
            let _ = serve_connection(name, h, stream, addr).await;
        });
    }
}

/// Bind `bind_addr` and serve it with `handler`.
pub async fn accept<H: SessionHandler>(
    name: &'static str,
    bind_addr: &str,
    handler: Arc<H>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind_addr).await?;
    serve_listener(name, listener, handler).await;
    Ok(())
}

/// Dial `addr` until it answers, then serve the link until it closes.
///
/// Dial failures are retried forever with `backoff`; the caller decides
/// whether to dial again after the session ends.
pub async fn connect<H: SessionHandler>(
    name: &'static str,
    addr: &str,
    handler: Arc<H>,
    backoff: &Backoff,
) -> Result<(), ServerError> {
    let mut delay = backoff.initial;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let peer = stream.peer_addr()?;
                return serve_connection(name, handler, stream, peer).await;
            }
            Err(e) => {
                let wait = backoff.jittered(delay);
                tracing::warn!(
                    "[{}] [connect_failed] addr={} err={} retry_in={}ms",
                    name,
                    addr,
                    e,
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
                delay = backoff.next(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::conn::{Connection, ServerRole};
    use crate::network::packet::Packet;
    use crate::packets::interserver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    const SECRET: &str = "cluster-secret";

    /// Accepts Channel auth, counts handled packets, reports disconnects.
    struct Recorder {
        handled: AtomicUsize,
        disconnects: mpsc::UnboundedSender<bool>,
    }

    impl SessionHandler for Recorder {
        type Conn = Connection;

        fn make_connection(&self, addr: SocketAddr, tx: PacketSender) -> Connection {
            Connection::new(addr, tx, Arc::from(SECRET))
        }

        async fn handle_packet(
            &self,
            conn: &mut Connection,
            opcode: u16,
            mut it: PacketIterator<'_>,
        ) -> Result<bool, ServerError> {
            match opcode {
                opcodes::IO_AUTH => {
                    conn.check_auth(&mut it, &[ServerRole::Channel])?;
                }
                0x7777 => {
                    it.decode4()?;
                }
                0x7778 => {
                    it.decode_string()?;
                }
                _ => return Ok(false),
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn on_disconnect(&self, conn: Connection) {
            let _ = self.disconnects.send(conn.authenticated());
        }
    }

    async fn spawn_recorder() -> (SocketAddr, Arc<Recorder>, mpsc::UnboundedReceiver<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dtx, drx) = mpsc::unbounded_channel();
        let handler = Arc::new(Recorder { handled: AtomicUsize::new(0), disconnects: dtx });
        tokio::spawn(serve_listener("test", listener, Arc::clone(&handler)));
        (addr, handler, drx)
    }

    async fn send(stream: &mut TcpStream, p: Packet) {
        crate::network::write_packet(stream, p).await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthenticated_opcode_closes_and_disconnects_once() {
        let (addr, handler, mut drx) = spawn_recorder().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        send(&mut client, Packet::new_enciphered(0x7777)).await;

        assert_eq!(drx.recv().await, Some(false));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
        // server closed its side
        let got = read_packet(&mut client).await;
        assert!(matches!(got, Ok(None) | Err(_)));
        assert!(drx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_underflow_after_auth_is_not_fatal() {
        let (addr, handler, mut drx) = spawn_recorder().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        send(&mut client, interserver::auth(ServerRole::Channel, SECRET)).await;

        // 0x7777 wants 4 bytes; give it 1, then a good one
        let mut short = Packet::new_enciphered(0x7777);
        short.encode1(1);
        send(&mut client, short).await;
        let mut good = Packet::new_enciphered(0x7777);
        good.encode4(1);
        send(&mut client, good).await;
        send(&mut client, Packet::new_enciphered(0x4242)).await;

        client.shutdown().await.unwrap();
        assert_eq!(drx.recv().await, Some(true));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_utf8_after_auth_is_not_fatal() {
        let (addr, handler, mut drx) = spawn_recorder().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        send(&mut client, interserver::auth(ServerRole::Channel, SECRET)).await;

        let mut bad = Packet::new_enciphered(0x7778);
        bad.encode2(2);
        bad.append(&[0xFF, 0xFE]);
        send(&mut client, bad).await;
        let mut good = Packet::new_enciphered(0x7778);
        good.encode_string("ok");
        send(&mut client, good).await;

        client.shutdown().await.unwrap();
        assert_eq!(drx.recv().await, Some(true));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_secret_closes_connection() {
        let (addr, _handler, mut drx) = spawn_recorder().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        send(&mut client, interserver::auth(ServerRole::Channel, "nope")).await;
        assert_eq!(drx.recv().await, Some(false));
    }

    #[tokio::test]
    async fn test_truncated_auth_is_fatal() {
        let (addr, _handler, mut drx) = spawn_recorder().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut p = Packet::new_enciphered(opcodes::IO_AUTH);
        p.encode1(ServerRole::Channel.as_byte());
        send(&mut client, p).await;
        assert_eq!(drx.recv().await, Some(false));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let d1 = b.next(b.initial);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(b.next(d1), Duration::from_millis(350));
        let j = b.jittered(Duration::from_millis(100));
        assert!(j >= Duration::from_millis(100) && j < Duration::from_millis(125));
    }
}
