// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

/// Total size of the program flash in bytes (128 KiB).
/// Addresses above 64 KiB need RAMPZ for ELPM and SPM, but the program counter
/// still fits in 16 bits because it counts words.
pub const FLASH_SIZE: u32 = 0x2_0000;

/// Size in bytes of one flash page, the erase and write granularity.
pub const PAGE_SIZE: usize = 256;

/// Value of an erased flash byte. Partial pages are padded with it.
pub const ERASED_BYTE: u8 = 0xFF;

/// First byte of the boot section (BOOTSZ = 1024 words).
/// This is also the end of the application section.
pub const BOOT_SECTION_START: u32 = 0x1_F800;

/// One past the last byte of the boot section.
pub const BOOT_SECTION_END: u32 = FLASH_SIZE;

/// First byte scanned for the factory self-programming sequence.
pub const SCAN_START: u32 = BOOT_SECTION_START;

/// One past the last byte scanned for the factory self-programming sequence.
/// The last word of flash is never part of a match.
pub const SCAN_END: u32 = 0x1_FFFE;

/// Page that receives the guard copy of the sequence before anything else is erased.
/// It is the highest page of the boot section.
pub const GUARD_PAGE: u32 = BOOT_SECTION_END - PAGE_SIZE as u32;

/// Width of the return address pushed by `call`, `ret` and interrupts, in bytes.
pub const PC_BYTES: u8 = 2;

/// I/O address of SPMCSR (store program memory control and status register).
pub const SPMCSR_IO: u8 = 0x37;

/// Data-space alias of SPMCSR, the operand of the factory `sts` instruction.
pub const SPMCSR_MEM: u16 = SPMCSR_IO as u16 + 0x20;

/// I/O address of RAMPZ, the extended Z pointer used by ELPM and SPM.
pub const RAMPZ_IO: u8 = 0x3B;

/// I/O address of SREG.
pub const SREG_IO: u8 = 0x3F;

/// I/O addresses of the stack pointer.
pub const SPL_IO: u8 = 0x3D;
pub const SPH_IO: u8 = 0x3E;

/// Timer 0 and pin-change interrupt registers touched by the timer armer.
/// `_IO` registers are reachable with `in`/`out`, `_MEM` ones only through data space.
pub const TCCR0A_IO: u8 = 0x24;
pub const TCCR0B_IO: u8 = 0x25;
pub const TCNT0_IO: u8 = 0x26;
pub const OCR0B_IO: u8 = 0x28;
pub const TIFR0_IO: u8 = 0x15;
pub const PCIFR_IO: u8 = 0x1B;
pub const TIMSK0_MEM: u16 = 0x6E;
pub const PCICR_MEM: u16 = 0x68;

/// Watchdog control register (data space).
pub const WDTCSR_MEM: u16 = 0x60;

/// Watchdog periods in ms, indexed by the WDP3..0 selection.
pub const WATCHDOG_PERIODS_MS: [u16; 10] = [16, 32, 64, 125, 250, 500, 1_000, 2_000, 4_000, 8_000];

/// WDP3..0 bits of WDTCSR selecting a period of exactly `ms`, if the watchdog has one.
pub const fn watchdog_prescaler(ms: u16) -> Option<u8> {
    let mut i = 0;
    while i < WATCHDOG_PERIODS_MS.len() {
        if WATCHDOG_PERIODS_MS[i] == ms {
            let i = i as u8;
            // WDP3 sits apart from WDP2..0, at bit 5.
            return Some((i & 0x07) | ((i & 0x08) << 2));
        }
        i += 1;
    }
    None
}

/// Cycles from starting timer 0 until the `spm` of an `sts SPMCSR, Rr ; spm` sequence retires.
/// Measured on the leap sequence with a 16-bit program counter. Re-measure when the leap
/// instruction sequence or the target changes.
pub const LEAP_CYCLES_STS: u8 = 39;

/// Same as [`LEAP_CYCLES_STS`] for an `out SPMCSR, Rr ; spm` sequence.
/// `out` takes one cycle less than `sts`.
pub const LEAP_CYCLES_OUT: u8 = LEAP_CYCLES_STS - 1;

/// Bits of the lock byte that gate self-programming (LB1/2, BLB01/02, BLB11/12).
pub const LOCK_BITS_MASK: u8 = 0x3F;

/// Lock byte pattern of a device whose lock bits are all unprogrammed.
pub const LOCK_BITS_UNLOCKED: u8 = 0x3F;

/// CPU clock of the reference board.
pub const CPU_FREQUENCY_HZ: u32 = 16_000_000;

/// UART baud rate of the status and block-upload link.
pub const UART_BAUD: u32 = 38_400;

/// How long the updater waits for a block-upload command before falling back to the
/// built-in image.
pub const SESSION_TIMEOUT_MS: u16 = 2_000;

/// Watchdog period while the updater works. A leap that never comes back resets the device.
/// Must be one of [`WATCHDOG_PERIODS_MS`]. The watchdog is fed after every leap and while
/// waiting on the link, so it only has to outlast one page operation.
pub const HANG_GUARD_TIMEOUT_MS: u16 = 250;

/// Identification string returned on `S` and sent after a successful rewrite.
pub const IDENTIFIER: &str = "AVRBOOT";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hang_guard_is_a_watchdog_period() {
        assert_eq!(watchdog_prescaler(HANG_GUARD_TIMEOUT_MS), Some(0x04));
    }

    #[test]
    fn long_periods_set_wdp3() {
        assert_eq!(watchdog_prescaler(16), Some(0x00));
        assert_eq!(watchdog_prescaler(2_000), Some(0x07));
        assert_eq!(watchdog_prescaler(4_000), Some(0x20));
        assert_eq!(watchdog_prescaler(8_000), Some(0x21));
    }

    #[test]
    fn other_periods_are_refused() {
        assert_eq!(watchdog_prescaler(0), None);
        assert_eq!(watchdog_prescaler(15), None);
        assert_eq!(watchdog_prescaler(200), None);
    }
}
