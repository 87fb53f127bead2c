//! Shardlink - game backend control plane
//!
//! Packet codec, interserver links and the world/channel registration
//! protocol shared by the login, world and channel servers.

/// Server configuration
pub mod config;
/// Error taxonomy for every library operation
pub mod error;
/// Framing, connections and the accept/connect drivers
pub mod network;
/// Packet builders and opcodes
pub mod packets;
/// Server role implementations (login, world, channel)
pub mod servers;
