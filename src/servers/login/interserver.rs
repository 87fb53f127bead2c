use std::net::SocketAddr;
use std::sync::Arc;

use super::{LoginState, RegisteredChannel};
use crate::error::ServerError;
use crate::network::conn::{AsConnection, Connection, ServerRole};
use crate::network::dispatch::SessionHandler;
use crate::network::packet::PacketIterator;
use crate::network::PacketSender;
use crate::packets::{interserver, opcodes};

/// A world coordinator's session on the login server.
#[derive(Debug)]
pub struct CoordinatorConnection {
    conn: Connection,
    world_id: Option<u8>,
}

impl CoordinatorConnection {
    pub fn world_id(&self) -> Option<u8> {
        self.world_id
    }

    /// World id from a channel message; it must be the world this link holds.
    fn owned_world(&self, it: &mut PacketIterator<'_>) -> Result<u8, ServerError> {
        let id = it.decode1s()?;
        match self.world_id {
            Some(own) if id >= 0 && id as u8 == own => Ok(own),
            _ => Err(ServerError::ProtocolViolation("channel message for a world this link does not hold")),
        }
    }
}

impl AsConnection for CoordinatorConnection {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub struct CoordinatorListener {
    state: Arc<LoginState>,
}

impl CoordinatorListener {
    pub fn new(state: Arc<LoginState>) -> Self {
        Self { state }
    }

    async fn assign(&self, session: &mut CoordinatorConnection) -> Result<(), ServerError> {
        match self.state.claim_world(session.conn.sender().clone()).await {
            Some(def) => {
                session.world_id = Some(def.id);
                tracing::info!(
                    "[login] [world_assigned] world={} name={} port={} addr={}",
                    def.id,
                    def.config.name,
                    def.port,
                    session.conn.addr()
                );
                session
                    .conn
                    .send(interserver::world_connect(def.id, def.port, &def.config))
                    .await
            }
            None => {
                tracing::warn!("[login] [no_world] addr={} every world already has a coordinator", session.conn.addr());
                session.conn.send(interserver::no_world()).await
            }
        }
    }
}

impl SessionHandler for CoordinatorListener {
    type Conn = CoordinatorConnection;

    fn make_connection(&self, addr: SocketAddr, tx: PacketSender) -> CoordinatorConnection {
        CoordinatorConnection {
            conn: Connection::new(addr, tx, Arc::clone(&self.state.secret)),
            world_id: None,
        }
    }

    async fn handle_packet(
        &self,
        session: &mut CoordinatorConnection,
        opcode: u16,
        mut it: PacketIterator<'_>,
    ) -> Result<bool, ServerError> {
        match opcode {
            opcodes::IO_AUTH => {
                session.conn.check_auth(&mut it, &[ServerRole::World])?;
                self.assign(session).await?;
            }
            opcodes::IO_REGISTER_CHANNEL => {
                let world_id = session.owned_world(&mut it)?;
                let channel_id = it.decode1()?;
                let ip = it.decode_string()?;
                let port = it.decode2()?;
                tracing::info!(
                    "[login] [channel_registered] world={} channel={} ip={} port={}",
                    world_id,
                    channel_id,
                    ip,
                    port
                );
                self.state
                    .register_channel(world_id, channel_id, RegisteredChannel { ip, port })
                    .await?;
            }
            opcodes::IO_REMOVE_CHANNEL => {
                let world_id = session.owned_world(&mut it)?;
                let channel_id = it.decode1()?;
                if self.state.remove_channel(world_id, channel_id).await.is_some() {
                    tracing::info!("[login] [channel_removed] world={} channel={}", world_id, channel_id);
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    async fn on_disconnect(&self, session: CoordinatorConnection) {
        if let Some(id) = session.world_id {
            if self.state.release_world(id, session.conn.sender()).await {
                tracing::warn!("[login] [world_offline] world={} coordinator disconnected", id);
            }
        }
    }
}
