// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::addr::FlashAddr;
use crate::leap::Calibration;
use consts::PAGE_SIZE;

/// Layout and timing of the target microcontroller.
///
/// [`Device::ATMEGA1284P`] is built from the `consts` crate. Other values only exist so that
/// the simulator can model variants such as a 3-byte program counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Device {
    /// Size of program flash in bytes.
    pub flash_size: u32,
    /// First byte of the boot section. Replacement pages are written from here upwards.
    pub boot_start: FlashAddr,
    /// One past the last byte of the boot section.
    pub boot_end: FlashAddr,
    /// Range searched for the self-programming sequence.
    pub scan_start: FlashAddr,
    pub scan_end: FlashAddr,
    /// Page receiving the guard copy of the sequence.
    pub guard_page: FlashAddr,
    /// Bytes of a return address on the stack, 2 or 3.
    pub pc_bytes: u8,
    /// Data-space address of SPMCSR as encoded in the factory `sts`.
    pub spmcsr_mem: u16,
    /// I/O address of SPMCSR as encoded in the factory `out`.
    pub spmcsr_io: u8,
    pub calibration: Calibration,
}

impl Device {
    pub const ATMEGA1284P: Device = Device {
        flash_size: consts::FLASH_SIZE,
        boot_start: FlashAddr::from_byte(consts::BOOT_SECTION_START),
        boot_end: FlashAddr::from_byte(consts::BOOT_SECTION_END),
        scan_start: FlashAddr::from_byte(consts::SCAN_START),
        scan_end: FlashAddr::from_byte(consts::SCAN_END),
        guard_page: FlashAddr::from_byte(consts::GUARD_PAGE),
        pc_bytes: consts::PC_BYTES,
        spmcsr_mem: consts::SPMCSR_MEM,
        spmcsr_io: consts::SPMCSR_IO,
        calibration: Calibration::ATMEGA1284P,
    };

    /// Number of pages in the boot section.
    pub fn boot_pages(&self) -> usize {
        (self.boot_end.byte() - self.boot_start.byte()) as usize / PAGE_SIZE
    }

    /// Address of the `index`-th page of the boot section.
    pub fn boot_page(&self, index: usize) -> FlashAddr {
        self.boot_start.offset((index * PAGE_SIZE) as u32)
    }

    /// Index of the boot page starting at `addr`, if it is one.
    pub fn boot_page_index(&self, addr: FlashAddr) -> Option<usize> {
        if !addr.is_page_aligned() || !self.in_boot_section(addr) {
            return None;
        }
        Some((addr.byte() - self.boot_start.byte()) as usize / PAGE_SIZE)
    }

    pub fn in_boot_section(&self, addr: FlashAddr) -> bool {
        self.boot_start <= addr && addr < self.boot_end
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::ATMEGA1284P
    }
}
