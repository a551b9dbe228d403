// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Entering the factory sequence through a forged return address and coming back out of it
//! through the timer 0 compare interrupt.
//!
//! A leap runs through [`LeapPhase`] in order:
//!
//! 1. `Idle`: wait until SPMCSR.SPMEN is clear.
//! 2. `Armed`: timer 0 armed, interrupts enabled, timer started. This is cycle zero.
//! 3. `Prepared`: payload in r1:r0, the command register's value saved and replaced by the
//!    command, RAMPZ:Z loaded with the target, re-entry address and sequence address pushed.
//! 4. `Executing`: `ret` into the sequence, which stores the command into SPMCSR and runs `spm`.
//! 5. `Intercepted`: the compare interrupt fires once `spm` retired. Its handler drops the
//!    interrupted program counter and `reti`s to the re-entry address.
//! 6. `Restored`: the command register, RAMPZ, SREG and the scratch registers are restored.
//!
//! Steps 2 to 6 run as one block of assembly behind [`Mcu::leap`](crate::Mcu::leap). The
//! number of cycles from starting the timer to `spm` retiring is fixed by that block and the
//! sequence shape, see [`Calibration`].

use crate::addr::FlashAddr;
use crate::device::Device;
use crate::error::LeapFault;
use crate::scanner::{SequenceKind, SpmSequenceLocation};
use crate::{timer, Mcu};

/// Operation requested from `spm` through SPMCSR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashCommand {
    /// Store r1:r0 into the temporary page buffer at Z.
    Enable,
    /// Erase the page at RAMPZ:Z.
    Erase,
    /// Write the temporary page buffer to the page at RAMPZ:Z.
    WritePage,
}

impl FlashCommand {
    /// SPMCSR value: SPMEN, with PGERS or PGWRT.
    pub const fn bits(self) -> u8 {
        match self {
            FlashCommand::Enable => 0x01,
            FlashCommand::Erase => 0x03,
            FlashCommand::WritePage => 0x05,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x01 => Some(FlashCommand::Enable),
            0x03 => Some(FlashCommand::Erase),
            0x05 => Some(FlashCommand::WritePage),
            _ => None,
        }
    }
}

/// Cycles from starting timer 0 to `spm` retiring, per sequence shape.
///
/// This is the compare value loaded into OCR0B. One cycle less and the interrupt lands
/// before `spm`, one more and the boot code after the sequence starts running.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub sts: u8,
    pub out: u8,
}

impl Calibration {
    /// Leap of the updater on an ATmega1284P: 36 cycles up to and including the `ret` into
    /// the sequence, then `sts` (2) or `out` (1) and `spm` (1).
    pub const ATMEGA1284P: Calibration = Calibration {
        sts: consts::LEAP_CYCLES_STS,
        out: consts::LEAP_CYCLES_OUT,
    };

    pub const fn cycles(&self, kind: SequenceKind) -> u8 {
        match kind {
            SequenceKind::Sts => self.sts,
            SequenceKind::Out => self.out,
        }
    }
}

/// The linear progress of one leap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeapPhase {
    Idle,
    Armed,
    Prepared,
    Executing,
    Intercepted,
    Restored,
}

/// Bytes of a return address in the order they are pushed, low byte first.
///
/// `ret` pops the high byte first, so pushing these in order makes `ret` go to `word`.
/// Only the first `pc_bytes` entries are meaningful.
pub const fn return_address_bytes(word: u32, pc_bytes: u8) -> [u8; 3] {
    let ext = if pc_bytes > 2 { (word >> 16) as u8 } else { 0 };
    [word as u8, (word >> 8) as u8, ext]
}

/// Everything the assembly part of a leap needs, already encoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeapFrame {
    /// Register file index of the register the sequence stores into SPMCSR.
    pub command_register: u8,
    /// SPMCSR value placed into that register.
    pub command: u8,
    /// Word loaded into r1:r0.
    pub payload: u16,
    /// Flash byte address loaded into RAMPZ:Z.
    pub target: FlashAddr,
    /// Word address of the sequence in push order, see [`return_address_bytes`].
    pub jump: [u8; 3],
    pub pc_bytes: u8,
    pub kind: SequenceKind,
}

impl LeapFrame {
    pub fn new(
        device: &Device,
        sequence: &SpmSequenceLocation,
        target: FlashAddr,
        command: FlashCommand,
        payload: u16,
    ) -> Self {
        Self {
            command_register: sequence.command_register,
            command: command.bits(),
            payload,
            target,
            jump: return_address_bytes(sequence.address.word(), device.pc_bytes),
            pc_bytes: device.pc_bytes,
            kind: sequence.kind,
        }
    }

    /// The pushed part of [`LeapFrame::jump`].
    pub fn jump_bytes(&self) -> &[u8] {
        &self.jump[..self.pc_bytes as usize]
    }
}

/// Drives flash operations through a discovered sequence.
pub struct LeapExecutor<M> {
    mcu: M,
    device: Device,
    calibration: Calibration,
    leaps: usize,
}

impl<M: Mcu> LeapExecutor<M> {
    /// Executor using the calibration of `device`.
    pub fn new(mcu: M, device: Device) -> Self {
        Self {
            mcu,
            device,
            calibration: device.calibration,
            leaps: 0,
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of leaps performed so far, failed ones included.
    pub fn leaps(&self) -> usize {
        self.leaps
    }

    pub fn mcu(&self) -> &M {
        &self.mcu
    }

    pub fn mcu_mut(&mut self) -> &mut M {
        &mut self.mcu
    }

    pub fn into_inner(self) -> M {
        self.mcu
    }

    /// Run `command` with RAMPZ:Z = `target` and r1:r0 = `payload` through `sequence`.
    pub fn leap(
        &mut self,
        sequence: &SpmSequenceLocation,
        target: FlashAddr,
        command: FlashCommand,
        payload: u16,
    ) -> Result<(), LeapFault> {
        while self.mcu.spm_busy() {}

        timer::arm(self.mcu.timer(), self.calibration.cycles(sequence.kind));
        let frame = LeapFrame::new(&self.device, sequence, target, command, payload);

        // SAFETY: the timer was armed above with the calibration for this sequence kind,
        // and `sequence` came out of the scanner so it is a drivable sequence.
        let result = unsafe { self.mcu.leap(&frame) };
        self.mcu.feed_watchdog();
        self.leaps += 1;

        if let Err(fault) = result {
            error!("Leap {:?} at {:#x} failed: {:?}", command, target.byte(), fault);
        }
        result
    }
}
