//! Channel worker, interserver side
//!
//! Dials the world coordinator, authenticates as a channel and remembers the
//! slot it is given. The link is re-dialed forever.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::network::conn::{Connection, ServerRole};
use crate::network::dispatch::{self, SessionHandler};
use crate::network::packet::PacketIterator;
use crate::network::PacketSender;
use crate::packets::{interserver, opcodes};

/// Slot handed out by the world coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAssignment {
    pub world_id: u8,
    pub channel_id: u8,
    pub port: u16,
}

pub struct ChannelWorkerState {
    pub config: ServerConfig,
    pub secret: Arc<str>,
    assignment: Mutex<Option<ChannelAssignment>>,
}

impl ChannelWorkerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            secret: Arc::from(config.interserver_secret.as_str()),
            config,
            assignment: Mutex::new(None),
        }
    }

    pub async fn assignment(&self) -> Option<ChannelAssignment> {
        *self.assignment.lock().await
    }

    /// Keep a link to the world coordinator up forever.
    pub async fn run(state: Arc<Self>) {
        let addr = state.config.world_addr();
        let backoff = state.config.reconnect_backoff();
        let handler = Arc::new(WorldLink::new(Arc::clone(&state)));
        loop {
            tracing::info!("[channel] [connecting] world={}", addr);
            match dispatch::connect("channel", &addr, Arc::clone(&handler), &backoff).await {
                Ok(()) => tracing::warn!("[channel] [world_lost] World server closed the link."),
                Err(e) => tracing::warn!("[channel] [world_lost] {}", e),
            }
            tokio::time::sleep(backoff.jittered(backoff.initial)).await;
        }
    }
}

/// Our link to the world coordinator.
pub struct WorldLink {
    state: Arc<ChannelWorkerState>,
}

impl WorldLink {
    pub fn new(state: Arc<ChannelWorkerState>) -> Self {
        Self { state }
    }
}

impl SessionHandler for WorldLink {
    type Conn = Connection;

    fn make_connection(&self, addr: SocketAddr, tx: PacketSender) -> Connection {
        Connection::new(addr, tx, Arc::clone(&self.state.secret))
    }

    async fn on_connect(&self, conn: &mut Connection) -> Result<(), ServerError> {
        conn.send(interserver::auth(ServerRole::Channel, &self.state.secret)).await?;
        conn.mark_authenticated(ServerRole::World);
        Ok(())
    }

    async fn handle_packet(
        &self,
        _conn: &mut Connection,
        opcode: u16,
        mut it: PacketIterator<'_>,
    ) -> Result<bool, ServerError> {
        match opcode {
            opcodes::IO_CHANNEL_CONNECT => {
                let world_id = it.decode1s()?;
                let channel_id = it.decode1s()?;
                let port = it.decode2()?;
                if world_id < 0 || channel_id < 0 {
                    return Err(ServerError::ProtocolViolation("negative id in channel-connect"));
                }
                let assignment = ChannelAssignment {
                    world_id: world_id as u8,
                    channel_id: channel_id as u8,
                    port,
                };
                *self.state.assignment.lock().await = Some(assignment);
                tracing::info!(
                    "[channel] [assigned] world={} channel={} port={}",
                    assignment.world_id,
                    assignment.channel_id,
                    port
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn on_disconnect(&self, _conn: Connection) {
        if let Some(old) = self.state.assignment.lock().await.take() {
            tracing::info!("[channel] [unassigned] channel={}", old.channel_id);
        }
    }
}
