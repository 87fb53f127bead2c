//! Error types shared by the codec, the dispatch loop and the role handlers.

use crate::network::conn::ServerRole;

/// Everything that can go wrong on an interserver link.
///
/// The dispatch loop decides fatality: a decode error on an authenticated
/// link only drops the packet, everything else closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Packet underflow: needed={needed}, remaining={remaining}")]
    Underflow { needed: usize, remaining: usize },

    #[error("String field is not valid UTF-8")]
    InvalidString,

    #[error("Interserver authentication failed: bad secret")]
    Authentication,

    #[error("Unknown server type: {0:?}")]
    UnknownServerType(ServerRole),

    #[error("No world available")]
    NoWorldAvailable,

    #[error("Opcode {opcode:#06X} sent without being authenticated")]
    Unauthenticated { opcode: u16 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("World {current} already assigned, refusing world={requested} port={port}")]
    WorldAlreadyAssigned { current: u8, requested: u8, port: u16 },

    #[error("No world assigned yet")]
    NoWorldAssigned,

    #[error("No free channel slot (max_channels={max})")]
    NoFreeChannel { max: u8 },

    #[error("Frame too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Peer link closed")]
    LinkClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl ServerError {
    /// True for errors that only spoil the packet being decoded.
    pub fn is_underflow(&self) -> bool {
        matches!(self, ServerError::Underflow { .. })
    }

    /// Errors from decoding a packet's fields. On an authenticated link they
    /// cost only the packet being decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, ServerError::Underflow { .. } | ServerError::InvalidString)
    }
}
