use chrono::{DateTime, Utc};

use super::opcodes;
use crate::network::packet::Packet;

/// Build the handshake that must be sent UNENCRYPTED to a newly connected client.
pub fn handshake(version: u16, iv_send: [u8; 4], iv_recv: [u8; 4], test_server: bool) -> Packet {
    let mut p = Packet::new_plain(opcodes::HANDSHAKE);
    p.encode2(version);
    p.encode2(0x0000);
    p.append(&iv_recv);
    p.append(&iv_send);
    p.encode1(if test_server { 5 } else { 8 });
    p
}

/// Fresh random IVs for a client handshake.
pub fn random_ivs() -> ([u8; 4], [u8; 4]) {
    (rand::random(), rand::random())
}

pub fn ping() -> Packet {
    Packet::new_enciphered(opcodes::PING)
}

/// Login success that asks the client for its PIN next.
pub fn auth_success_request_pin(username: &str) -> Packet {
    const PREFIX: [u8; 13] = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0xFF, 0x6A, 0x01, 0x00, // account id slot, ignored by the client
        0x00, // player status
        0x00, // admin flag: client-side gm commands, no trading
        0x4E,
    ];
    const TRAILER: [u8; 22] = [
        0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0xDC, 0x3D, 0x0B, 0x28, 0x64, 0xC5, 0x01, 0x08, 0x00, 0x00, 0x00,
    ];

    let mut p = Packet::new_enciphered(opcodes::LOGIN_STATUS);
    p.append(&PREFIX);
    p.encode_string(username);
    p.append(&TRAILER);
    p
}

/// Reasons the client can display for a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LoginFailure {
    IdDeleted = 3,
    IncorrectPassword = 4,
    NotRegistered = 5,
    SystemError = 6,
    AlreadyLoggedIn = 7,
    SystemError2 = 8,
    SystemError3 = 9,
    TooManyConnections = 10,
    MustBeOver20 = 11,
    CannotLogAsMaster = 13,
    WrongGateway = 14,
    TooManyConnections2 = 15,
    MustVerifyEmail = 16,
    WrongGateway2 = 17,
    MustVerifyEmail2 = 21,
    ShowLicense = 23,
    EuropeNotice = 25,
    TrialVersionNotice = 27,
}

pub fn login_failed(reason: LoginFailure) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::LOGIN_STATUS);
    p.encode4(reason as u32);
    p.encode2(0x0000);
    p
}

const LOGIN_STATUS_BANNED: u32 = 2;

/// Seconds between 1601-01-01 and the unix epoch.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// Windows FILETIME (100ns ticks since 1601) for `t`, clamped at zero.
pub fn to_filetime(t: DateTime<Utc>) -> u64 {
    let secs = t.timestamp().saturating_add(FILETIME_EPOCH_OFFSET);
    if secs < 0 {
        return 0;
    }
    (secs as u64) * 10_000_000 + u64::from(t.timestamp_subsec_nanos() / 100)
}

pub fn login_banned(reason: u8, until: DateTime<Utc>) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::LOGIN_STATUS);
    p.encode4(LOGIN_STATUS_BANNED);
    p.encode2(0x0000);
    p.encode1(reason);
    p.encode8(to_filetime(until));
    p
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinOperation {
    Accepted = 0,
    New = 1,
    /// Wrong PIN, re-enter.
    Invalid = 2,
    SystemError = 3,
    Enter = 4,
}

pub fn pin_operation(op: PinOperation) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::PIN_OPERATION);
    p.encode1(op as u8);
    p
}

pub fn pin_accepted() -> Packet {
    pin_operation(PinOperation::Accepted)
}

pub fn request_pin_after_failure() -> Packet {
    pin_operation(PinOperation::Invalid)
}

pub fn request_pin() -> Packet {
    pin_operation(PinOperation::Enter)
}

pub fn pin_assigned() -> Packet {
    let mut p = Packet::new_enciphered(opcodes::PIN_ASSIGNED);
    p.encode1(0x01);
    p
}

/// Terminates the world list sent to the client.
pub fn server_list_end() -> Packet {
    let mut p = Packet::new_enciphered(opcodes::SERVER_LIST);
    p.encode1(0xFF);
    p
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ServerLoad {
    Normal = 0,
    HighlyPopulated = 1,
    Full = 2,
}

pub fn server_load_status(load: ServerLoad) -> Packet {
    let mut p = Packet::new_enciphered(opcodes::SERVER_LOAD_STATUS);
    p.encode2(load as u16);
    p
}
