//! Packet builders, one function per message.
//!
//! - `client`: packets sent to game clients by the login server
//! - `interserver`: control messages exchanged between server processes

pub mod client;
pub mod interserver;
pub mod opcodes;
