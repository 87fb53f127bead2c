//! Interserver connection state.
//!
//! A `Connection` is created the moment a socket is accepted or dialed and
//! lives until the socket closes. Role-specific sessions (see
//! `servers::world::channel::ChannelConnection`) wrap it and add their own
//! identifiers.

use std::net::SocketAddr;
use std::sync::Arc;

use super::packet::{Packet, PacketIterator};
use super::PacketSender;
use crate::error::ServerError;

/// Role a peer declares in its auth message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    Login,
    World,
    Channel,
    /// Raw byte outside the known set.
    Unknown(u8),
}

impl ServerRole {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => ServerRole::Login,
            1 => ServerRole::World,
            2 => ServerRole::Channel,
            other => ServerRole::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ServerRole::Login => 0,
            ServerRole::World => 1,
            ServerRole::Channel => 2,
            ServerRole::Unknown(b) => b,
        }
    }
}

/// One peer socket plus its session state.
#[derive(Debug)]
pub struct Connection {
    addr: SocketAddr,
    tx: PacketSender,
    secret: Arc<str>,
    authenticated: bool,
    role: Option<ServerRole>,
}

impl Connection {
    pub fn new(addr: SocketAddr, tx: PacketSender, secret: Arc<str>) -> Self {
        Self {
            addr,
            tx,
            secret,
            authenticated: false,
            role: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    /// Role the peer authenticated as, `None` before authentication.
    pub fn role(&self) -> Option<ServerRole> {
        self.role
    }

    pub fn sender(&self) -> &PacketSender {
        &self.tx
    }

    pub async fn send(&self, packet: Packet) -> Result<(), ServerError> {
        self.tx.send(packet).await
    }

    /// Consume the auth fields (role byte, secret string) and authenticate.
    ///
    /// A wrong secret is `Authentication` whatever the role; a role outside
    /// `accepted` is `UnknownServerType`. Either way the flag stays false.
    pub fn check_auth(
        &mut self,
        it: &mut PacketIterator<'_>,
        accepted: &[ServerRole],
    ) -> Result<ServerRole, ServerError> {
        if self.authenticated {
            return Err(ServerError::ProtocolViolation("re-authentication is not permitted"));
        }
        let role = ServerRole::from_byte(it.decode1()?);
        let secret = it.decode_string()?;

        if secret.as_str() != &*self.secret {
            tracing::warn!("[net] [auth_failed] addr={} role={:?}", self.addr, role);
            return Err(ServerError::Authentication);
        }
        if !accepted.contains(&role) {
            return Err(ServerError::UnknownServerType(role));
        }

        self.authenticated = true;
        self.role = Some(role);
        Ok(role)
    }

    /// Dialer side: we authenticated ourselves to the peer by sending our
    /// own auth message, so the link is usable from here on.
    pub fn mark_authenticated(&mut self, peer_role: ServerRole) {
        self.authenticated = true;
        self.role = Some(peer_role);
    }
}

/// Anything the dispatch loop can drive: a connection or a role session
/// wrapping one.
pub trait AsConnection {
    fn connection(&self) -> &Connection;
}

impl AsConnection for Connection {
    fn connection(&self) -> &Connection {
        self
    }
}
