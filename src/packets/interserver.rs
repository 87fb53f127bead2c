use super::opcodes;
use crate::config::WorldConfig;
use crate::network::conn::ServerRole;
use crate::network::packet::Packet;

/// Wire value meaning "no world available".
pub const NO_WORLD: i8 = -1;

/// Auth message every peer sends right after connecting.
pub fn auth(role: ServerRole, secret: &str) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::IO_AUTH);
    p.encode1(role.as_byte());
    p.encode_string(secret);
    p
}

/// Login -> world: the world this coordinator will handle.
pub fn world_connect(world_id: u8, port: u16, conf: &WorldConfig) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::IO_WORLD_CONNECT);
    p.encode1s(world_id as i8);
    // the port travels as a signed short; the bit pattern is kept
    p.encode2s(port as i16);
    conf.encode(&mut p);
    p
}

/// Login -> world: every world already has a coordinator.
pub fn no_world() -> Packet {
    let mut p = Packet::new_enciphered(opcodes::IO_WORLD_CONNECT);
    p.encode1s(NO_WORLD);
    p
}

/// World -> channel: slot assignment confirmation.
pub fn channel_connect(world_id: u8, channel_id: u8, port: u16) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::IO_CHANNEL_CONNECT);
    p.encode1s(world_id as i8);
    p.encode1s(channel_id as i8);
    p.encode2(port);
    p
}

/// World -> login: a channel finished registering.
pub fn register_channel(world_id: u8, channel_id: u8, ip: &str, port: u16) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::IO_REGISTER_CHANNEL);
    p.encode1s(world_id as i8);
    p.encode1s(channel_id as i8);
    p.encode_string(ip);
    p.encode2(port);
    p
}

/// World -> login: a channel went away.
pub fn remove_channel(world_id: u8, channel_id: u8) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::IO_REMOVE_CHANNEL);
    p.encode1s(world_id as i8);
    p.encode1s(channel_id as i8);
    p
}
