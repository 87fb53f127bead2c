use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use super::channel::ChannelListener;
use super::{Assignment, WorldAssignment, WorldState};
use crate::config::{WorldConfig, MAX_CHANNELS_LIMIT};
use crate::error::ServerError;
use crate::network::conn::{Connection, ServerRole};
use crate::network::dispatch::{serve_listener, SessionHandler};
use crate::network::packet::PacketIterator;
use crate::network::PacketSender;
use crate::packets::{interserver, opcodes};

/// Our link to the login server.
pub struct LoginLink {
    state: Arc<WorldState>,
}

impl LoginLink {
    pub fn new(state: Arc<WorldState>) -> Self {
        Self { state }
    }
}

impl SessionHandler for LoginLink {
    type Conn = Connection;

    fn make_connection(&self, addr: SocketAddr, tx: PacketSender) -> Connection {
        Connection::new(addr, tx, Arc::clone(&self.state.secret))
    }

    async fn on_connect(&self, conn: &mut Connection) -> Result<(), ServerError> {
        conn.send(interserver::auth(ServerRole::World, &self.state.secret)).await?;
        conn.mark_authenticated(ServerRole::Login);
        Ok(())
    }

    async fn handle_packet(
        &self,
        conn: &mut Connection,
        opcode: u16,
        mut it: PacketIterator<'_>,
    ) -> Result<bool, ServerError> {
        match opcode {
            opcodes::IO_WORLD_CONNECT => {
                handle_world_connect(&self.state, conn, &mut it).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn on_disconnect(&self, conn: Connection) {
        let mut topo = self.state.topology.lock().await;
        if topo.clear_login(conn.sender()) {
            tracing::warn!("[world] [login_lost] Login server connection lost.");
        }
    }
}

/// Handle the login server telling us which world we run.
///
/// Wire: [world_id i8] then, unless it is -1, [port i16][WorldConfig].
pub async fn handle_world_connect(
    state: &Arc<WorldState>,
    conn: &Connection,
    it: &mut PacketIterator<'_>,
) -> Result<(), ServerError> {
    let world_id = it.decode1s()?;
    if world_id < 0 {
        tracing::error!("[world] [no_world] No worlds to handle!");
        return Err(ServerError::NoWorldAvailable);
    }
    let id = world_id as u8;

    let (port, config) = match decode_assignment(it) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!("[world] [world_connect_malformed] {}", e);
            return Err(ServerError::ProtocolViolation("malformed world-connect"));
        }
    };

    let mut topo = state.topology.lock().await;
    if topo.check_assignment(id, port)? == Assignment::Rebound {
        topo.assign_world(WorldAssignment { id, port, config }, conn.sender().clone())?;

        // login forgets a world's channels when it hands the world out again
        let announcements: Vec<_> = topo
            .channels()
            .map(|(channel_id, entry)| {
                interserver::register_channel(id, channel_id, &state.advertised_ip(entry.ip), entry.port)
            })
            .collect();
        let count = announcements.len();
        for p in announcements {
            conn.send(p).await?;
        }
        tracing::info!("[world] [login_rebound] world={} port={} channels={}", id, port, count);
        return Ok(());
    }

    // bind before storing anything so a failed bind leaves us unassigned
    let bind = format!("{}:{}", state.config.bind_ip, port);
    let listener = TcpListener::bind(&bind).await?;
    let name = config.name.clone();
    topo.assign_world(WorldAssignment { id, port, config }, conn.sender().clone())?;
    drop(topo);

    tracing::info!("[world] [assigned] Handling world={} name={} port={}", id, name, port);

    let handler = Arc::new(ChannelListener::new(Arc::clone(state)));
    tokio::spawn(serve_listener("chan", listener, handler));

    tracing::info!("[world] [ready] World server is running!");
    Ok(())
}

fn decode_assignment(it: &mut PacketIterator<'_>) -> Result<(u16, WorldConfig), ServerError> {
    let port = it.decode2s()? as u16;
    let config = WorldConfig::decode(it)?;
    if !(1..=MAX_CHANNELS_LIMIT).contains(&config.max_channels) {
        return Err(ServerError::ProtocolViolation("max_channels out of range"));
    }
    Ok((port, config))
}
