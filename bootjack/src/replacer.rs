// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::addr::FlashAddr;
use crate::device::Device;
use crate::error::{BootStatus, PageSlot, WriteError, TOKEN_PAGE_PREFIX};
use crate::guard::guard_page;
use crate::image::BootImage;
use crate::leap::LeapExecutor;
use crate::page::PageWriter;
use crate::scanner::{ScanOptions, SignatureScanner, SpmSequenceLocation};
use crate::Mcu;
use block_protocol::Transport;
use consts::{LOCK_BITS_MASK, LOCK_BITS_UNLOCKED, PAGE_SIZE};
use core::fmt::Write;
use heapless::String;

/// Progress of a boot section rewrite.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplacerState {
    LockCheck,
    SequenceDiscovery,
    GuardWrite,
    /// Writing image page `next`.
    PageLoop { next: usize },
    Done,
    Failed(BootStatus),
}

/// Rewrites the boot section while keeping an intact sequence copy in flash.
///
/// The guard copy goes to the guard page before anything else is erased. Image pages are
/// then written from the start of the boot section upwards, and a page holding the last
/// intact copy is refused before it is erased.
pub struct BootImageReplacer<M> {
    writer: PageWriter<M>,
    device: Device,
    state: ReplacerState,
    sequence: Option<SpmSequenceLocation>,
}

impl<M: Mcu> BootImageReplacer<M> {
    pub fn new(mcu: M, device: Device, options: ScanOptions) -> Self {
        let executor = LeapExecutor::new(mcu, device);
        Self::with_executor(executor, options)
    }

    pub fn with_executor(executor: LeapExecutor<M>, options: ScanOptions) -> Self {
        let device = *executor.device();
        Self {
            writer: PageWriter::new(executor, SignatureScanner::new(device, options)),
            device,
            state: ReplacerState::LockCheck,
            sequence: None,
        }
    }

    pub fn state(&self) -> ReplacerState {
        self.state
    }

    /// Sequence the next leap will go through.
    pub fn sequence(&self) -> Option<&SpmSequenceLocation> {
        self.sequence.as_ref()
    }

    pub fn executor(&self) -> &LeapExecutor<M> {
        self.writer.executor()
    }

    pub fn mcu(&self) -> &M {
        self.writer.executor().mcu()
    }

    pub fn mcu_mut(&mut self) -> &mut M {
        self.writer.executor_mut().mcu_mut()
    }

    pub fn into_mcu(self) -> M {
        self.writer.into_executor().into_inner()
    }

    /// Whether [`BootImageReplacer::prepare`] already succeeded.
    pub fn is_prepared(&self) -> bool {
        matches!(self.state, ReplacerState::PageLoop { .. } | ReplacerState::Done)
    }

    /// Rewrite the boot section with `image`, reporting progress and the final status
    /// token on `transport`.
    pub fn replace<T: Transport + ?Sized>(&mut self, image: &BootImage<'_>, transport: &mut T) -> BootStatus {
        let status = match self.run(image, transport) {
            Ok(()) => {
                self.state = ReplacerState::Done;
                info!("Boot section replaced, {} pages", image.page_count());
                BootStatus::Success
            }
            Err(status) => status,
        };
        transport.send_line(status.token());
        status
    }

    fn run<T: Transport + ?Sized>(&mut self, image: &BootImage<'_>, transport: &mut T) -> Result<(), BootStatus> {
        self.check_lock()?;
        if let Err(_e) = image.check_fits(&self.device) {
            warn!("Image rejected: {:?}", _e);
            return Err(self.fail(BootStatus::InvalidImage));
        }
        self.discover()?;
        self.write_guard()?;

        for (index, data) in image.pages() {
            self.state = ReplacerState::PageLoop { next: index };
            let dest = self.device.boot_page(index);
            if let Err(error) = self.write_page_at(dest, data) {
                return Err(self.fail(BootStatus::WriteFailed {
                    page: PageSlot::Image(index),
                    error,
                }));
            }
            transport.send_line(&progress_token(index));
        }
        Ok(())
    }

    /// Lock check, sequence discovery and guard write, leaving the replacer ready for
    /// [`BootImageReplacer::write_page_at`].
    pub fn prepare(&mut self) -> Result<(), BootStatus> {
        if self.is_prepared() {
            return Ok(());
        }
        if let ReplacerState::Failed(status) = self.state {
            return Err(status);
        }
        self.check_lock()?;
        self.discover()?;
        self.write_guard()
    }

    /// Write one boot page, refusing to erase the page that holds the last intact copy of
    /// the sequence.
    ///
    /// Needs a successful [`BootImageReplacer::prepare`].
    pub fn write_page_at(&mut self, dest: FlashAddr, data: &[u8]) -> Result<(), WriteError> {
        let mut sequence = match self.sequence {
            Some(sequence) => sequence,
            None => return Err(WriteError::SequenceLost),
        };

        // The erase may go through the copy it destroys, as long as another one survives.
        let page_end = dest.page().offset(PAGE_SIZE as u32);
        if sequence.overlaps(dest.page(), page_end) {
            let scanner = self.writer.scanner();
            match scanner.find_outside(self.writer.executor().mcu(), dest.page(), page_end) {
                Some(_other) => debug!("Copy at {:#x} survives erase of {:#x}", _other.address.byte(), dest.byte()),
                None => {
                    error!("Page {:#x} holds the last sequence copy", dest.byte());
                    return Err(WriteError::LastCopy);
                }
            }
        }

        let result = self.writer.write_page(&mut sequence, data, dest);
        // The location may have moved even if the commit failed afterwards.
        self.sequence = Some(sequence);
        if result.is_err() && self.writer.scanner().revalidate(self.mcu(), &sequence).is_none() {
            self.sequence = None;
        }
        result
    }

    fn check_lock(&mut self) -> Result<(), BootStatus> {
        self.state = ReplacerState::LockCheck;
        let lock = self.mcu_mut().lock_bits();
        if lock & LOCK_BITS_MASK != LOCK_BITS_UNLOCKED {
            error!("Boot section locked, lock bits {:#x}", lock);
            return Err(self.fail(BootStatus::LockedDevice));
        }
        Ok(())
    }

    fn discover(&mut self) -> Result<(), BootStatus> {
        self.state = ReplacerState::SequenceDiscovery;
        self.sequence = self.writer.discover();
        if self.sequence.is_none() {
            return Err(self.fail(BootStatus::SequenceNotFound));
        }
        Ok(())
    }

    fn write_guard(&mut self) -> Result<(), BootStatus> {
        self.state = ReplacerState::GuardWrite;
        let Some(sequence) = self.sequence else {
            return Err(self.fail(BootStatus::SequenceNotFound));
        };
        let page = guard_page(&sequence, &self.device);
        if let Err(error) = self.write_page_at(self.device.guard_page, &page) {
            return Err(self.fail(BootStatus::WriteFailed {
                page: PageSlot::Guard,
                error,
            }));
        }
        self.state = ReplacerState::PageLoop { next: 0 };
        Ok(())
    }

    fn fail(&mut self, status: BootStatus) -> BootStatus {
        self.state = ReplacerState::Failed(status);
        status
    }
}

/// `AVRBPW` followed by the page index as two hex digits.
pub fn progress_token(index: usize) -> String<8> {
    let mut token = String::new();
    // Always fits: 6 prefix bytes and 2 digits for any boot section page.
    let _ = write!(token, "{}{:02X}", TOKEN_PAGE_PREFIX, index & 0xFF);
    token
}
