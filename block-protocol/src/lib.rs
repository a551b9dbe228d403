// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to updater communication over the serial link.
//! The host is a PC running an AVR109 (butterfly) style uploader, the target is the
//! updater running from the application section.
//! Defines the byte transport the updater talks through and the block upload session.

#![cfg_attr(not(test), no_std)]

mod fmt;

mod session;
#[cfg(test)]
mod tests;

pub use session::{FlashTarget, Poll, Session};

/// Byte-oriented serial link.
///
/// Implemented by the USART driver of the updater and by test doubles.
pub trait Transport {
    /// Send one byte, blocking until it is accepted by the hardware.
    fn send_byte(&mut self, byte: u8);

    /// Receive one byte, blocking until it arrives.
    fn receive_byte(&mut self) -> u8;

    /// Receive one byte, giving up after `timeout_ms` milliseconds.
    fn receive_byte_timeout(&mut self, timeout_ms: u16) -> Option<u8>;

    fn send_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.send_byte(b);
        }
    }

    /// Send a status line terminated by CR LF.
    fn send_line(&mut self, line: &str) {
        self.send_bytes(line.as_bytes());
        self.send_bytes(b"\r\n");
    }
}

/// Answer to commands that succeeded without returning data.
pub const ACK: u8 = b'\r';

/// Answer to unknown commands and unsupported memory types.
pub const NACK: u8 = b'?';

/// Answer to capability queries.
pub const YES: u8 = b'Y';

/// Single-character commands of the block upload protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `S`: return the identifier string
    Identify,
    /// `A`: set the word address, two bytes big-endian
    SetAddress,
    /// `g`: block read, size (two bytes big-endian) and memory type
    BlockRead,
    /// `B`: block load, size (two bytes big-endian), memory type and payload
    BlockLoad,
    /// `a`: auto-increment support query
    AutoIncrement,
    /// `b`: block mode query, answers the block size
    BlockSupport,
    /// `E`: leave the session
    Exit,
    /// Anything else
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            b'S' => Command::Identify,
            b'A' => Command::SetAddress,
            b'g' => Command::BlockRead,
            b'B' => Command::BlockLoad,
            b'a' => Command::AutoIncrement,
            b'b' => Command::BlockSupport,
            b'E' => Command::Exit,
            other => Command::Unknown(other),
        }
    }
}

/// Memory type byte of block commands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryType {
    /// `F`: program flash
    Flash,
    /// Any other memory type, answered with `?`
    Other(u8),
}

impl From<u8> for MemoryType {
    fn from(byte: u8) -> Self {
        match byte {
            b'F' => MemoryType::Flash,
            other => MemoryType::Other(other),
        }
    }
}
