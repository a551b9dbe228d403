// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::{watchdog_prescaler, HANG_GUARD_TIMEOUT_MS, WDTCSR_MEM};
use core::arch::asm;

const WDE: u8 = 1 << 3;
const WDCE: u8 = 1 << 4;

/// Watchdog prescaler selection (WDP3..0).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeout(u8);

impl Timeout {
    /// Shortest period, used to reset.
    pub const SHORTEST: Timeout = Timeout(0x00);

    /// Guard of the whole rewrite, see [`HANG_GUARD_TIMEOUT_MS`].
    pub const HANG_GUARD: Timeout = match watchdog_prescaler(HANG_GUARD_TIMEOUT_MS) {
        Some(bits) => Timeout(bits),
        None => panic!("HANG_GUARD_TIMEOUT_MS is not a watchdog period"),
    };
}

/// Enable the watchdog in system reset mode.
pub fn enable(timeout: Timeout) {
    avr_device::interrupt::free(|_| {
        avr_device::asm::wdr();
        // SAFETY: the timed sequence only touches WDTCSR. The second store has to follow
        // the first within four cycles, which two back to back `sts` guarantee.
        unsafe {
            asm!(
                "sts {wdtcsr}, {change}",
                "sts {wdtcsr}, {value}",
                wdtcsr = const WDTCSR_MEM,
                change = in(reg) WDCE | WDE,
                value = in(reg) WDE | timeout.0,
                options(nostack, preserves_flags),
            );
        }
    });
}

/// Reset the device through the watchdog.
///
/// Execution resumes at the reset vector, which is the boot section when BOOTRST is
/// programmed.
pub fn soft_reset() -> ! {
    avr_device::interrupt::disable();
    enable(Timeout::SHORTEST);
    loop {}
}
