// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Block uploads from the host written straight into the boot section.

use crate::addr::FlashAddr;
use crate::error::{BootStatus, WriteError};
use crate::replacer::BootImageReplacer;
use crate::{Mcu, ProgramMemory};
use block_protocol::FlashTarget;
use consts::PAGE_SIZE;

/// Why a block from the host was not written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockError {
    /// Lock check, discovery or guard write failed before the first block.
    NotPrepared(BootStatus),
    /// The block does not start on a page or crosses into the next one.
    Unaligned { byte_addr: u32, len: usize },
    Write(WriteError),
}

/// [`FlashTarget`] that prepares the replacer on the first block write and then maps every
/// block onto one boot page.
pub struct InteractiveTarget<M> {
    replacer: BootImageReplacer<M>,
    blocks: usize,
}

impl<M: Mcu> InteractiveTarget<M> {
    pub fn new(replacer: BootImageReplacer<M>) -> Self {
        Self { replacer, blocks: 0 }
    }

    /// Blocks written so far.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn replacer(&self) -> &BootImageReplacer<M> {
        &self.replacer
    }

    pub fn into_replacer(self) -> BootImageReplacer<M> {
        self.replacer
    }
}

impl<M: Mcu> FlashTarget for InteractiveTarget<M> {
    type Error = BlockError;

    fn read_flash(&mut self, byte_addr: u32) -> u8 {
        self.replacer.mcu().read_byte(FlashAddr::from_byte(byte_addr))
    }

    fn write_flash(&mut self, byte_addr: u32, data: &[u8]) -> Result<(), BlockError> {
        let dest = FlashAddr::from_byte(byte_addr);
        if !dest.is_page_aligned() || data.len() > PAGE_SIZE {
            return Err(BlockError::Unaligned {
                byte_addr,
                len: data.len(),
            });
        }
        self.replacer.prepare().map_err(BlockError::NotPrepared)?;
        self.replacer.write_page_at(dest, data).map_err(BlockError::Write)?;
        self.blocks += 1;
        Ok(())
    }
}
