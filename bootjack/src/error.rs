// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::addr::FlashAddr;
use consts::IDENTIFIER;

/// Status token sent when the lock bits forbid self-programming.
pub const TOKEN_LOCKED: &str = "AVRBCE9";
/// Status token sent when no self-programming sequence was found.
pub const TOKEN_NOT_FOUND: &str = "AVRBCE1";
/// Status token sent when an erase destroyed the last copy of the sequence.
pub const TOKEN_SEQUENCE_LOST: &str = "AVRBCE2";
/// Status token sent when any other page write failed.
pub const TOKEN_WRITE_FAILED: &str = "AVRBCE3";
/// Status token sent when the replacement image does not fit the boot section.
pub const TOKEN_INVALID_IMAGE: &str = "AVRBCE4";
/// Prefix of the per-page progress token, followed by the page index in hex.
pub const TOKEN_PAGE_PREFIX: &str = "AVRBPW";

/// A leap that did not come back through the re-entry point as intended.
///
/// Real hardware cannot observe these, a failed leap hangs until the watchdog fires.
/// The simulator reports them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeapFault {
    /// The compare interrupt fired before `spm` retired, nothing was programmed.
    Premature,
    /// Instructions after `spm` ran before the interrupt.
    FellThrough,
    /// The interrupt never fired.
    Hang,
}

/// Why a page write stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteError {
    /// More than one page of payload.
    Oversized { len: usize },
    /// Destination is not the start of a page.
    Misaligned { dest: FlashAddr },
    /// Destination lies outside the boot section.
    OutOfRange { dest: FlashAddr },
    /// The erase removed the last intact copy of the sequence. Nothing was committed.
    SequenceLost,
    /// The destination page holds the only intact copy of the sequence.
    /// Refused before anything was erased.
    LastCopy,
    /// The committed page does not read back as written.
    VerifyFailed { offset: usize },
    Leap(LeapFault),
}

impl From<LeapFault> for WriteError {
    fn from(fault: LeapFault) -> Self {
        WriteError::Leap(fault)
    }
}

/// Page a write failure refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageSlot {
    /// The guard copy of the sequence.
    Guard,
    /// Page `n` of the replacement image.
    Image(usize),
}

/// Result of a whole boot section rewrite.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootStatus {
    Success,
    /// Lock bits forbid self-programming. Flash was not touched.
    LockedDevice,
    /// No drivable self-programming sequence in the scan range. Flash was not touched.
    SequenceNotFound,
    /// The image is empty or larger than the boot section. Flash was not touched.
    InvalidImage,
    WriteFailed { page: PageSlot, error: WriteError },
}

impl BootStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BootStatus::Success)
    }

    /// Fixed token reported over the transport.
    pub fn token(&self) -> &'static str {
        match self {
            BootStatus::Success => IDENTIFIER,
            BootStatus::LockedDevice => TOKEN_LOCKED,
            BootStatus::SequenceNotFound => TOKEN_NOT_FOUND,
            BootStatus::InvalidImage => TOKEN_INVALID_IMAGE,
            BootStatus::WriteFailed {
                error: WriteError::SequenceLost,
                ..
            } => TOKEN_SEQUENCE_LOST,
            BootStatus::WriteFailed { .. } => TOKEN_WRITE_FAILED,
        }
    }
}
