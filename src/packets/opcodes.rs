// Client-bound opcodes. These are fixed by the game client.
pub const LOGIN_STATUS: u16 = 0x0000;
pub const SERVER_LOAD_STATUS: u16 = 0x0003;
pub const PIN_OPERATION: u16 = 0x0006;
pub const PIN_ASSIGNED: u16 = 0x0007;
pub const SERVER_LIST: u16 = 0x000A;
pub const HANDSHAKE: u16 = 0x000D;
pub const PING: u16 = 0x0011;

// Interserver opcodes.
pub const IO_AUTH: u16 = 0x1000;
pub const IO_WORLD_CONNECT: u16 = 0x1001;
pub const IO_CHANNEL_CONNECT: u16 = 0x1002;
pub const IO_REGISTER_CHANNEL: u16 = 0x1003;
pub const IO_REMOVE_CHANNEL: u16 = 0x1004;
