// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The ATmega1284P behind [`bootjack::Mcu`].
//!
//! The leap below and the simulator's `sim::program` are the same instruction sequence. Any
//! change here changes the leap timing and has to be made there too, then re-measured.

use bootjack::{FlashAddr, LeapFault, LeapFrame, Mcu, ProgramMemory, TimerReg, TimerRegisters};
use consts::{RAMPZ_IO, SPMCSR_IO, SPMCSR_MEM, SREG_IO, TCCR0B_IO, TCNT0_IO, TIFR0_IO};
use core::arch::{asm, naked_asm};
use core::ptr::{read_volatile, write_volatile};

/// SPMCSR bits.
const SPMEN: u8 = 1 << 0;
const BLBSET: u8 = 1 << 3;

/// Timer 0 and pin change registers, accessed through their data-space addresses.
pub struct Timer0 {
    _private: (),
}

impl TimerRegisters for Timer0 {
    fn write(&mut self, reg: TimerReg, value: u8) {
        // SAFETY: every `TimerReg` maps to a timer 0 or pin change register of this part.
        unsafe { write_volatile(reg.mem_addr() as *mut u8, value) }
    }

    fn read(&mut self, reg: TimerReg) -> u8 {
        // SAFETY: as above.
        unsafe { read_volatile(reg.mem_addr() as *const u8) }
    }
}

pub struct Avr {
    timer: Timer0,
}

impl Avr {
    /// # Safety
    ///
    /// Only one instance may exist: it owns timer 0, its compare B vector, RAMPZ and SPMCSR.
    pub unsafe fn steal() -> Self {
        Self {
            timer: Timer0 { _private: () },
        }
    }
}

impl ProgramMemory for Avr {
    fn read_word(&self, addr: FlashAddr) -> u16 {
        let [z_lo, z_hi, rampz, _] = addr.byte().to_le_bytes();
        let lo: u8;
        let hi: u8;
        // SAFETY: ELPM only reads flash. RAMPZ is not used by compiled code on this part.
        unsafe {
            asm!(
                "out {rampz_io}, {rampz}",
                "elpm {lo}, Z+",
                "elpm {hi}, Z",
                rampz_io = const RAMPZ_IO,
                rampz = in(reg) rampz,
                lo = out(reg) lo,
                hi = out(reg) hi,
                inout("Z") u16::from_le_bytes([z_lo, z_hi]) => _,
                options(nostack, preserves_flags),
            );
        }
        u16::from_le_bytes([lo, hi])
    }
}

impl Mcu for Avr {
    type Timer = Timer0;

    fn lock_bits(&mut self) -> u8 {
        while self.spm_busy() {}
        let bits: u8;
        // SAFETY: BLBSET | SPMEN followed by LPM within three cycles reads the lock byte
        // instead of flash. Nothing is programmed.
        unsafe {
            asm!(
                "out {spmcsr}, {command}",
                "lpm {bits}, Z",
                spmcsr = const SPMCSR_IO,
                command = in(reg) BLBSET | SPMEN,
                bits = out(reg) bits,
                in("Z") 0x0001u16,
                options(nostack, preserves_flags),
            );
        }
        bits
    }

    fn spm_busy(&self) -> bool {
        // SAFETY: SPMCSR is always readable.
        unsafe { read_volatile(SPMCSR_MEM as *const u8) & SPMEN != 0 }
    }

    fn timer(&mut self) -> &mut Timer0 {
        &mut self.timer
    }

    /// The ATmega1284P pushes 2-byte return addresses, `frame.jump[2]` is never used.
    unsafe fn leap(&mut self, frame: &LeapFrame) -> Result<(), LeapFault> {
        let [z_lo, z_hi, rampz, _] = frame.target.byte().to_le_bytes();
        let [payload_lo, payload_hi] = frame.payload.to_le_bytes();

        asm!(
            // Save what the leap clobbers, then start the timer: cycle zero.
            "push r0",
            "push r1",
            "push r16",
            "push r30",
            "push r31",
            "in r16, {sreg}",
            "push r16",
            "in r16, {rampz}",
            "push r16",
            "sei",
            "ldi r16, 1",
            "out {tccr0b}, r16",
            // Payload, then the command register's old value and its index.
            "movw r0, r20",
            "mov r30, r18",
            "ldi r31, 0",
            "ld r16, Z",
            "push r16",
            "push r18",
            // Where the compare handler returns to, under where `ret` goes.
            "ldi r30, pm_lo8(2f)",
            "ldi r31, pm_hi8(2f)",
            "push r30",
            "push r31",
            "push r26",
            "push r27",
            "out {rampz}, r22",
            "push r24",
            "push r25",
            "mov r30, r18",
            "ldi r31, 0",
            "st Z, r19",
            "pop r31",
            "pop r30",
            "ret",
            // Re-entry: put the command register back, then the rest.
            "2:",
            "pop r30",
            "ldi r31, 0",
            "pop r0",
            "st Z, r0",
            "pop r16",
            "out {rampz}, r16",
            "pop r16",
            "out {sreg}, r16",
            "pop r31",
            "pop r30",
            "pop r16",
            "pop r1",
            "pop r0",
            sreg = const SREG_IO,
            rampz = const RAMPZ_IO,
            tccr0b = const TCCR0B_IO,
            in("r18") frame.command_register,
            in("r19") frame.command,
            in("r20") payload_lo,
            in("r21") payload_hi,
            in("r22") rampz,
            in("r24") z_lo,
            in("r25") z_hi,
            in("r26") frame.jump[0],
            in("r27") frame.jump[1],
        );

        // The hardware gives no way to tell where the interrupt landed. A wrong calibration
        // shows up in the page read-back, a run-away as a watchdog reset.
        Ok(())
    }

    fn feed_watchdog(&mut self) {
        avr_device::asm::wdr();
    }
}

/// TIMER0_COMPB: stop and clear timer 0, drop the interrupted program counter and `reti` to
/// the re-entry address the leap pushed below it.
///
/// r16, r30 and r31 are scratch here, the leap saved them before starting the timer.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn __vector_17() {
    naked_asm!(
        "ldi r16, 0",
        "out {tccr0b}, r16",
        "out {tcnt0}, r16",
        "ldi r16, 7",
        "out {tifr0}, r16",
        "pop r31",
        "pop r30",
        "reti",
        tccr0b = const TCCR0B_IO,
        tcnt0 = const TCNT0_IO,
        tifr0 = const TIFR0_IO,
    )
}
