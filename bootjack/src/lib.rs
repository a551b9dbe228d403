// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rewrites the protected boot section of an AVR through the factory self-programming
//! sequence found inside it.
//!
//! The sequence (`sts SPMCSR, Rr ; spm` or `out SPMCSR, Rr ; spm`) is located by
//! [`scanner::SignatureScanner`], entered through a forged return address by
//! [`leap::LeapExecutor`], and left again by the timer 0 compare interrupt armed by
//! [`timer::arm`] to fire right after `spm` retires. [`page::PageWriter`] drives one page
//! through the enable, erase and write phases, and [`replacer::BootImageReplacer`] writes a
//! whole image while keeping an intact copy of the sequence in flash at all times.

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod addr;
pub mod device;
pub mod error;
pub mod guard;
pub mod image;
pub mod interactive;
pub mod leap;
pub mod opcode;
pub mod page;
pub mod replacer;
pub mod scanner;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod timer;

#[cfg(test)]
mod tests;

pub use addr::{AddressUnit, FlashAddr};
pub use device::Device;
pub use error::{BootStatus, LeapFault, PageSlot, WriteError};
pub use image::{BootImage, ImageError};
pub use interactive::{BlockError, InteractiveTarget};
pub use leap::{Calibration, FlashCommand, LeapExecutor, LeapFrame, LeapPhase};
pub use page::PageWriter;
pub use replacer::{BootImageReplacer, ReplacerState};
pub use scanner::{ScanOptions, SequenceKind, SignatureScanner, SpmSequenceLocation};
pub use timer::{TimerReg, TimerRegisters};

/// Read access to program flash.
pub trait ProgramMemory {
    /// Little-endian word at the even byte address `addr`.
    fn read_word(&self, addr: FlashAddr) -> u16;

    fn read_byte(&self, addr: FlashAddr) -> u8 {
        let word = self.read_word(FlashAddr::from_byte(addr.byte() & !1));
        word.to_le_bytes()[addr.byte() as usize & 1]
    }
}

/// The microcontroller as seen by the engine.
///
/// Everything the engine does to the hardware goes through this trait: the updater implements
/// it with inline assembly and raw registers, [`sim::SimMcu`] with a cycle-accurate model.
pub trait Mcu: ProgramMemory {
    type Timer: TimerRegisters;

    /// Lock bits as read with `LPM` after setting BLBSET and SPMEN.
    fn lock_bits(&mut self) -> u8;

    /// SPMCSR.SPMEN, set while a previous flash operation is in progress.
    fn spm_busy(&self) -> bool;

    fn timer(&mut self) -> &mut Self::Timer;

    /// Perform the armed part of a leap: enable interrupts, start timer 0, forge the stack as
    /// described by `frame`, `ret` into the sequence and come back through the re-entry point.
    ///
    /// # Safety
    ///
    /// Timer 0 must have been armed with the calibration for `frame`'s sequence kind and no
    /// other interrupt may be enabled. A wrong frame or calibration runs unrelated boot code.
    unsafe fn leap(&mut self, frame: &LeapFrame) -> Result<(), LeapFault>;

    /// Restart the watchdog guarding against a leap that never returns.
    fn feed_watchdog(&mut self) {}
}
