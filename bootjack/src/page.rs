// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::addr::FlashAddr;
use crate::error::WriteError;
use crate::leap::{FlashCommand, LeapExecutor};
use crate::scanner::{SignatureScanner, SpmSequenceLocation};
use crate::{Device, Mcu, ProgramMemory};
use consts::{ERASED_BYTE, PAGE_SIZE};

/// Writes one boot section page as a sequence of leaps.
pub struct PageWriter<M> {
    executor: LeapExecutor<M>,
    scanner: SignatureScanner,
}

impl<M: Mcu> PageWriter<M> {
    pub fn new(executor: LeapExecutor<M>, scanner: SignatureScanner) -> Self {
        Self { executor, scanner }
    }

    pub fn executor(&self) -> &LeapExecutor<M> {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut LeapExecutor<M> {
        &mut self.executor
    }

    pub fn scanner(&self) -> &SignatureScanner {
        &self.scanner
    }

    /// Locate the sequence to start from, see [`SignatureScanner::find`].
    pub fn discover(&mut self) -> Option<SpmSequenceLocation> {
        self.scanner.find(self.executor.mcu())
    }

    pub fn into_executor(self) -> LeapExecutor<M> {
        self.executor
    }

    fn device(&self) -> &Device {
        self.executor.device()
    }

    /// Program `data` into the page at `dest`, padding with the erased value.
    ///
    /// Every word is staged into the page buffer, the page is erased, `sequence` is checked
    /// again and the buffer is committed and read back. If the erase removed the last copy of
    /// the sequence nothing is committed and [`WriteError::SequenceLost`] is returned.
    pub fn write_page(
        &mut self,
        sequence: &mut SpmSequenceLocation,
        data: &[u8],
        dest: FlashAddr,
    ) -> Result<(), WriteError> {
        if data.len() > PAGE_SIZE {
            return Err(WriteError::Oversized { len: data.len() });
        }
        if !dest.is_page_aligned() {
            return Err(WriteError::Misaligned { dest });
        }
        if !self.device().in_boot_section(dest) {
            return Err(WriteError::OutOfRange { dest });
        }

        let mut page = [ERASED_BYTE; PAGE_SIZE];
        page[..data.len()].copy_from_slice(data);
        debug!("Writing page {:#x} through {:#x}", dest.byte(), sequence.address.byte());

        let mut last = 0;
        for (offset, word) in page.chunks_exact(2).enumerate() {
            last = u16::from_le_bytes([word[0], word[1]]);
            self.executor
                .leap(sequence, dest.offset(offset as u32 * 2), FlashCommand::Enable, last)?;
        }

        self.executor.leap(sequence, dest, FlashCommand::Erase, last)?;

        *sequence = match self.scanner.revalidate(self.executor.mcu(), sequence) {
            Some(location) => location,
            None => {
                error!("Erase of {:#x} removed the last sequence copy", dest.byte());
                return Err(WriteError::SequenceLost);
            }
        };

        self.executor.leap(sequence, dest, FlashCommand::WritePage, last)?;
        self.verify(&page, dest)
    }

    fn verify(&self, page: &[u8; PAGE_SIZE], dest: FlashAddr) -> Result<(), WriteError> {
        let flash = self.executor.mcu();
        match (0..PAGE_SIZE).find(|&offset| flash.read_byte(dest.offset(offset as u32)) != page[offset]) {
            Some(offset) => {
                warn!("Page {:#x} differs at offset {}", dest.byte(), offset);
                Err(WriteError::VerifyFailed { offset })
            }
            None => Ok(()),
        }
    }
}
