//! Packet codec
//!
//! Builds and parses the little-endian packets exchanged between servers and
//! with clients. Building is append-only and never fails; decoding reads
//! strictly forward and returns `ServerError::Underflow` when a field runs
//! past the end of the buffer.
//!
//! Packet shapes:
//!   plaintext:  [opcode u16][payload...]
//!   enciphered: [placeholder 4B][opcode u16][payload...]
//!
//! The enciphered placeholder belongs to the transport layer, which fills it
//! in right before the bytes hit the socket.

use bytes::{Buf, BufMut};

use crate::error::ServerError;

/// Size of the encrypted-header placeholder at the front of enciphered packets.
pub const ENCIPHERED_HEADER_LEN: usize = 4;

/// An owned packet buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
    /// Offset of the opcode: 0 for plaintext and received packets, 4 for enciphered.
    offset: usize,
}

impl Packet {
    /// Starts a plaintext packet (sent before any cipher state exists).
    pub fn new_plain(opcode: u16) -> Self {
        let mut p = Self { buf: Vec::with_capacity(16), offset: 0 };
        p.encode2(opcode);
        p
    }

    /// Starts an enciphered packet: zeroed header placeholder, then the opcode.
    pub fn new_enciphered(opcode: u16) -> Self {
        let mut p = Self {
            buf: Vec::with_capacity(32),
            offset: ENCIPHERED_HEADER_LEN,
        };
        p.encode4(0x0000_0000);
        p.encode2(opcode);
        p
    }

    /// Wraps a body read off the wire. The transport header is already stripped.
    pub fn from_body(body: Vec<u8>) -> Self {
        Self { buf: body, offset: 0 }
    }

    pub fn is_enciphered(&self) -> bool {
        self.offset == ENCIPHERED_HEADER_LEN
    }

    pub fn encode1(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn encode1s(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn encode2(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn encode2s(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    pub fn encode4(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn encode4s(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn encode8(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn encode8s(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// Appends a raw byte run with no length prefix.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Appends a u16-length-prefixed string. Strings longer than 65535 bytes
    /// are cut at the limit.
    pub fn encode_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(u16::MAX as usize);
        self.encode2(n as u16);
        self.append(&bytes[..n]);
    }

    /// Every byte of the packet, placeholder included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The opcode and payload, without the placeholder.
    pub fn body(&self) -> &[u8] {
        &self.buf[self.offset..]
    }

    /// Overwritable placeholder bytes; `None` for plaintext packets.
    pub fn header_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_enciphered() {
            Some(&mut self.buf[..ENCIPHERED_HEADER_LEN])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// A cursor positioned on the opcode.
    pub fn begin(&self) -> PacketIterator<'_> {
        PacketIterator { buf: self.body() }
    }
}

/// Forward-only cursor over a packet body.
#[derive(Debug, Clone)]
pub struct PacketIterator<'a> {
    buf: &'a [u8],
}

impl<'a> PacketIterator<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ServerError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(ServerError::Underflow { needed, remaining });
        }
        Ok(())
    }

    pub fn decode1(&mut self) -> Result<u8, ServerError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn decode1s(&mut self) -> Result<i8, ServerError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn decode2(&mut self) -> Result<u16, ServerError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn decode2s(&mut self) -> Result<i16, ServerError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn decode4(&mut self) -> Result<u32, ServerError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn decode4s(&mut self) -> Result<i32, ServerError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn decode8(&mut self) -> Result<u64, ServerError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn decode8s(&mut self) -> Result<i64, ServerError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    /// Takes the next `len` raw bytes.
    pub fn decode_buffer(&mut self, len: usize) -> Result<&'a [u8], ServerError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a u16-length-prefixed UTF-8 string.
    ///
    /// The length prefix is consumed even when the body underflows; the
    /// packet is abandoned either way.
    pub fn decode_string(&mut self) -> Result<String, ServerError> {
        let len = self.decode2()? as usize;
        let raw = self.decode_buffer(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ServerError::InvalidString)
    }
}
