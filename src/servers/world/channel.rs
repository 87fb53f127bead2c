use std::net::SocketAddr;
use std::sync::Arc;

use super::WorldState;
use crate::error::ServerError;
use crate::network::conn::{AsConnection, Connection, ServerRole};
use crate::network::dispatch::SessionHandler;
use crate::network::packet::PacketIterator;
use crate::network::PacketSender;
use crate::packets::{interserver, opcodes};

/// A channel worker's session on the world coordinator.
#[derive(Debug)]
pub struct ChannelConnection {
    conn: Connection,
    channel_id: Option<u8>,
}

impl ChannelConnection {
    pub fn new(conn: Connection) -> Self {
        Self { conn, channel_id: None }
    }

    /// Slot assigned at registration, `None` until then.
    pub fn channel_id(&self) -> Option<u8> {
        self.channel_id
    }
}

impl AsConnection for ChannelConnection {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Accepts channel workers once a world is assigned.
pub struct ChannelListener {
    state: Arc<WorldState>,
}

impl ChannelListener {
    pub fn new(state: Arc<WorldState>) -> Self {
        Self { state }
    }

    /// Give an authenticated channel the lowest free slot, forward the
    /// registration to the login server and confirm it to the channel.
    ///
    /// The login notification is queued before the topology lock is
    /// released, so login sees registrations and removals of one slot in
    /// the order they happened here.
    async fn register(&self, session: &mut ChannelConnection) -> Result<(), ServerError> {
        let peer_ip = session.conn.addr().ip();
        let (world_id, channel_id, port) = {
            let mut topo = self.state.topology.lock().await;
            let world_id = topo.world().ok_or(ServerError::NoWorldAssigned)?.id;
            let (channel_id, port) = topo.register_channel(peer_ip, session.conn.sender().clone())?;
            session.channel_id = Some(channel_id);

            match topo.login() {
                Some(login) => {
                    let ip = self.state.advertised_ip(peer_ip);
                    let p = interserver::register_channel(world_id, channel_id, &ip, port);
                    if let Err(e) = login.send(p).await {
                        tracing::warn!("[world] [register_forward_failed] channel={} {}", channel_id, e);
                    }
                }
                // announced when the login link comes back
                None => tracing::warn!("[world] [register_deferred] channel={} no login link", channel_id),
            }
            (world_id, channel_id, port)
        };

        tracing::info!(
            "[world] [channel_registered] world={} channel={} port={} addr={}",
            world_id,
            channel_id,
            port,
            session.conn.addr()
        );

        session
            .conn
            .send(interserver::channel_connect(world_id, channel_id, port))
            .await
    }
}

impl SessionHandler for ChannelListener {
    type Conn = ChannelConnection;

    fn make_connection(&self, addr: SocketAddr, tx: PacketSender) -> ChannelConnection {
        ChannelConnection::new(Connection::new(addr, tx, Arc::clone(&self.state.secret)))
    }

    async fn handle_packet(
        &self,
        session: &mut ChannelConnection,
        opcode: u16,
        mut it: PacketIterator<'_>,
    ) -> Result<bool, ServerError> {
        match opcode {
            opcodes::IO_AUTH => {
                session.conn.check_auth(&mut it, &[ServerRole::Channel])?;
                self.register(session).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn on_disconnect(&self, session: ChannelConnection) {
        let Some(channel_id) = session.channel_id else {
            return;
        };

        let mut topo = self.state.topology.lock().await;
        topo.remove_channel(channel_id);
        if let (Some(world), Some(login)) = (topo.world(), topo.login()) {
            if let Err(e) = login.send(interserver::remove_channel(world.id, channel_id)).await {
                tracing::warn!("[world] [remove_forward_failed] channel={} {}", channel_id, e);
            }
        }
        drop(topo);

        tracing::info!("[world] [channel_removed] channel={}", channel_id);
    }
}
