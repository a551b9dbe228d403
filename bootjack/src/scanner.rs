// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::addr::FlashAddr;
use crate::device::Device;
use crate::opcode::{self, REGISTER_MASK, SPM};
use crate::ProgramMemory;
use heapless::Vec;

/// Registers the leap itself loads right before entering the sequence: r1:r0 with the
/// payload and Z with the target address. A sequence storing one of them cannot be driven.
pub const UNDRIVABLE_REGISTERS: [u8; 4] = [0, 1, 30, 31];

/// Instruction the sequence uses to write SPMCSR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceKind {
    /// `sts SPMCSR, Rr ; spm`, three words.
    Sts,
    /// `out SPMCSR, Rr ; spm`, two words, one cycle shorter.
    Out,
}

impl SequenceKind {
    pub const fn len_bytes(self) -> u32 {
        match self {
            SequenceKind::Sts => 6,
            SequenceKind::Out => 4,
        }
    }
}

/// A self-programming sequence found in flash.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpmSequenceLocation {
    /// Byte address of the first instruction.
    pub address: FlashAddr,
    /// Register whose value the sequence stores into SPMCSR.
    pub command_register: u8,
    pub kind: SequenceKind,
}

impl SpmSequenceLocation {
    /// Instruction words of this sequence shape, as the scanner would match them.
    pub fn encode(&self, device: &Device) -> Vec<u16, 3> {
        let mut words = Vec::new();
        let r = self.command_register;
        // Both shapes fit the capacity.
        let _ = match self.kind {
            SequenceKind::Sts => words.extend_from_slice(&[opcode::sts(r), device.spmcsr_mem, SPM]),
            SequenceKind::Out => words.extend_from_slice(&[opcode::out(device.spmcsr_io, r), SPM]),
        };
        words
    }

    /// One past the last byte of the sequence.
    pub fn end(&self) -> FlashAddr {
        self.address.offset(self.kind.len_bytes())
    }

    /// Whether any byte of the sequence lies in `[start, end)`.
    pub fn overlaps(&self, start: FlashAddr, end: FlashAddr) -> bool {
        self.address < end && start < self.end()
    }
}

/// How the scanner picks a match.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanOptions {
    /// Number of drivable matches to pass over before the one returned by [`SignatureScanner::find`].
    /// Some factory images start with a decoy copy that must not be used.
    pub skip_count: usize,
    /// Also match the `out SPMCSR, Rr ; spm` form.
    pub accept_out_form: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_count: 0,
            accept_out_form: true,
        }
    }
}

/// Searches the scan range of a [`Device`] for the self-programming sequence.
#[derive(Clone, Copy, Debug)]
pub struct SignatureScanner {
    device: Device,
    options: ScanOptions,
    /// Matches below this address were passed over as decoys and are never picked again.
    decoy_end: FlashAddr,
}

impl SignatureScanner {
    pub const fn new(device: Device, options: ScanOptions) -> Self {
        Self {
            device,
            options,
            decoy_end: device.scan_start,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// The (`skip_count` + 1)-th drivable match in the scan range.
    ///
    /// With a non-zero `skip_count` every match below the one returned is a decoy:
    /// [`SignatureScanner::rescan`] and [`SignatureScanner::find_outside`] never return
    /// anything below it afterwards, even once the decoys are erased.
    pub fn find<P: ProgramMemory + ?Sized>(&mut self, flash: &P) -> Option<SpmSequenceLocation> {
        let found = self.matches(flash).nth(self.options.skip_count);
        match found {
            Some(location) => {
                info!(
                    "Sequence found at {:#x}, r{}",
                    location.address.byte(),
                    location.command_register
                );
                if self.options.skip_count > 0 {
                    self.decoy_end = location.address;
                }
            }
            None => warn!("No self-programming sequence in scan range"),
        }
        found
    }

    /// Start of the range searched after discovery.
    pub fn decoy_end(&self) -> FlashAddr {
        self.decoy_end
    }

    /// The first drivable match that is not a decoy.
    pub fn rescan<P: ProgramMemory + ?Sized>(&self, flash: &P) -> Option<SpmSequenceLocation> {
        self.candidates(flash).next()
    }

    /// The first drivable match that is not a decoy and has no byte in `[start, end)`.
    pub fn find_outside<P: ProgramMemory + ?Sized>(
        &self,
        flash: &P,
        start: FlashAddr,
        end: FlashAddr,
    ) -> Option<SpmSequenceLocation> {
        self.candidates(flash).find(|location| !location.overlaps(start, end))
    }

    fn candidates<'a, P: ProgramMemory + ?Sized>(&'a self, flash: &'a P) -> Matches<'a, P> {
        Matches {
            scanner: self,
            flash,
            next: self.decoy_end,
        }
    }

    /// Location to use after an erase: the old one if the copy there is still intact,
    /// otherwise the first match that is not a decoy.
    pub fn revalidate<P: ProgramMemory + ?Sized>(
        &self,
        flash: &P,
        location: &SpmSequenceLocation,
    ) -> Option<SpmSequenceLocation> {
        if self.matches_at(flash, location.address) == Some(*location) {
            return Some(*location);
        }
        let moved = self.rescan(flash);
        if let Some(new) = moved {
            debug!("Sequence moved from {:#x} to {:#x}", location.address.byte(), new.address.byte());
        }
        moved
    }

    /// Match a drivable sequence starting exactly at `addr`.
    pub fn matches_at<P: ProgramMemory + ?Sized>(&self, flash: &P, addr: FlashAddr) -> Option<SpmSequenceLocation> {
        if !addr.is_word_aligned() || addr.byte() + SequenceKind::Out.len_bytes() > self.device.flash_size {
            return None;
        }

        let first = flash.read_word(addr);
        let command_register = opcode::register_of(first);
        let masked = first & !REGISTER_MASK;
        let next = flash.read_word(addr.offset(2));

        let kind = if masked == opcode::sts(0)
            && next == self.device.spmcsr_mem
            && addr.byte() + SequenceKind::Sts.len_bytes() <= self.device.flash_size
            && flash.read_word(addr.offset(4)) == SPM
        {
            SequenceKind::Sts
        } else if self.options.accept_out_form && masked == opcode::out(self.device.spmcsr_io, 0) && next == SPM {
            SequenceKind::Out
        } else {
            return None;
        };

        if UNDRIVABLE_REGISTERS.contains(&command_register) {
            trace!("Skipping sequence at {:#x} using r{}", addr.byte(), command_register);
            return None;
        }

        Some(SpmSequenceLocation {
            address: addr,
            command_register,
            kind,
        })
    }

    /// All drivable matches in the scan range, in ascending address order.
    pub fn matches<'a, P: ProgramMemory + ?Sized>(&'a self, flash: &'a P) -> Matches<'a, P> {
        Matches {
            scanner: self,
            flash,
            next: self.device.scan_start,
        }
    }
}

/// Iterator returned by [`SignatureScanner::matches`].
pub struct Matches<'a, P: ?Sized> {
    scanner: &'a SignatureScanner,
    flash: &'a P,
    next: FlashAddr,
}

impl<P: ProgramMemory + ?Sized> Iterator for Matches<'_, P> {
    type Item = SpmSequenceLocation;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.scanner.device.scan_end {
            let addr = self.next;
            self.next = addr.offset(2);
            if let Some(location) = self.scanner.matches_at(self.flash, addr) {
                return Some(location);
            }
        }
        None
    }
}
