// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{Command, MemoryType, Transport, ACK, NACK, YES};
use consts::{IDENTIFIER, PAGE_SIZE};
use heapless::Vec;

/// Flash access the session needs from the updater.
pub trait FlashTarget {
    type Error;

    /// Read one byte of program flash.
    fn read_flash(&mut self, byte_addr: u32) -> u8;

    /// Program one block of at most one page starting at `byte_addr`.
    fn write_flash(&mut self, byte_addr: u32, data: &[u8]) -> Result<(), Self::Error>;
}

/// What the caller should do after a command was handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll {
    Continue,
    Exit,
}

/// State of one block upload session.
///
/// The only state kept between commands is the current word address, which `g` and `B`
/// advance past the bytes they transferred.
#[derive(Debug, Default)]
pub struct Session {
    word_address: u16,
}

impl Session {
    pub const fn new() -> Self {
        Self { word_address: 0 }
    }

    /// Current address as a flash byte address.
    pub fn byte_address(&self) -> u32 {
        u32::from(self.word_address) << 1
    }

    /// Receive and handle one command.
    pub fn poll<T: Transport, F: FlashTarget>(&mut self, transport: &mut T, flash: &mut F) -> Poll {
        let command = Command::from(transport.receive_byte());
        self.handle(command, transport, flash)
    }

    /// Handle one command whose command byte was already received.
    pub fn handle<T: Transport, F: FlashTarget>(
        &mut self,
        command: Command,
        transport: &mut T,
        flash: &mut F,
    ) -> Poll {
        match command {
            Command::Identify => transport.send_bytes(IDENTIFIER.as_bytes()),
            Command::SetAddress => {
                self.word_address = receive_u16(transport);
                debug!("Address set to word {:#x}", self.word_address);
                transport.send_byte(ACK);
            }
            Command::BlockRead => self.block_read(transport, flash),
            Command::BlockLoad => self.block_load(transport, flash),
            Command::AutoIncrement => transport.send_byte(YES),
            Command::BlockSupport => {
                transport.send_byte(YES);
                transport.send_bytes(&(PAGE_SIZE as u16).to_be_bytes());
            }
            Command::Exit => {
                transport.send_byte(ACK);
                return Poll::Exit;
            }
            Command::Unknown(byte) => {
                debug!("Unknown command {:#x}", byte);
                transport.send_byte(NACK);
            }
        }
        Poll::Continue
    }

    fn block_read<T: Transport, F: FlashTarget>(&mut self, transport: &mut T, flash: &mut F) {
        let size = receive_u16(transport);
        match MemoryType::from(transport.receive_byte()) {
            MemoryType::Flash => {
                let start = self.byte_address();
                for offset in 0..u32::from(size) {
                    transport.send_byte(flash.read_flash(start + offset));
                }
                self.advance(size);
            }
            MemoryType::Other(kind) => {
                debug!("Block read of memory type {:#x} refused", kind);
                transport.send_byte(NACK);
            }
        }
    }

    fn block_load<T: Transport, F: FlashTarget>(&mut self, transport: &mut T, flash: &mut F) {
        let size = receive_u16(transport);
        let memory = MemoryType::from(transport.receive_byte());

        // The payload is always consumed so the host stays in sync, even when refused.
        let mut block: Vec<u8, PAGE_SIZE> = Vec::new();
        let mut overflow = false;
        for _ in 0..size {
            let byte = transport.receive_byte();
            if block.push(byte).is_err() {
                overflow = true;
            }
        }

        match memory {
            MemoryType::Flash if overflow => {
                warn!("Block of {} bytes exceeds page size", size);
                transport.send_byte(NACK);
            }
            MemoryType::Flash => match flash.write_flash(self.byte_address(), &block) {
                Ok(()) => {
                    info!("Block of {} bytes written at {:#x}", size, self.byte_address());
                    self.advance(size);
                    transport.send_byte(ACK);
                }
                Err(_) => {
                    warn!("Block write at {:#x} failed", self.byte_address());
                    transport.send_byte(NACK);
                }
            },
            MemoryType::Other(kind) => {
                debug!("Block load of memory type {:#x} refused", kind);
                transport.send_byte(NACK);
            }
        }
    }

    fn advance(&mut self, size: u16) {
        let words = size / 2 + size % 2;
        self.word_address = self.word_address.wrapping_add(words);
    }
}

fn receive_u16<T: Transport>(transport: &mut T) -> u16 {
    let hi = transport.receive_byte();
    let lo = transport.receive_byte();
    u16::from_be_bytes([hi, lo])
}
