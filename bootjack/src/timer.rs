// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Timer 0 setup for the compare interrupt that ends a leap.

/// Registers touched when arming timer 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerReg {
    Pcicr,
    Pcifr,
    Tccr0a,
    Tccr0b,
    Tcnt0,
    Tifr0,
    Ocr0b,
    Timsk0,
}

impl TimerReg {
    /// Data-space address of the register.
    pub const fn mem_addr(self) -> u16 {
        match self {
            TimerReg::Pcicr => consts::PCICR_MEM,
            TimerReg::Timsk0 => consts::TIMSK0_MEM,
            TimerReg::Pcifr => io_to_mem(consts::PCIFR_IO),
            TimerReg::Tccr0a => io_to_mem(consts::TCCR0A_IO),
            TimerReg::Tccr0b => io_to_mem(consts::TCCR0B_IO),
            TimerReg::Tcnt0 => io_to_mem(consts::TCNT0_IO),
            TimerReg::Tifr0 => io_to_mem(consts::TIFR0_IO),
            TimerReg::Ocr0b => io_to_mem(consts::OCR0B_IO),
        }
    }
}

const fn io_to_mem(io: u8) -> u16 {
    io as u16 + 0x20
}

/// Pin change interrupt 2 enable in PCICR, and its flag in PCIFR.
pub const PCIE2: u8 = 1 << 2;
pub const TOV0: u8 = 1 << 0;
pub const OCF0A: u8 = 1 << 1;
pub const OCF0B: u8 = 1 << 2;
pub const OCIE0B: u8 = 1 << 2;
/// Clock select for TCCR0B: no prescaling, one count per CPU cycle.
pub const CS00: u8 = 1 << 0;

/// Access to the registers of timer 0 and the pin change interrupt controller.
pub trait TimerRegisters {
    fn write(&mut self, reg: TimerReg, value: u8);
    fn read(&mut self, reg: TimerReg) -> u8;
}

/// Prepare timer 0 so that, once started with [`CS00`], its compare B interrupt fires after
/// `cycles` CPU cycles and nothing else can interrupt.
///
/// The timer is left stopped; the leap starts it as the last instruction before cycle zero.
pub fn arm<T: TimerRegisters + ?Sized>(timer: &mut T, cycles: u8) {
    // The UART receive pin sits on PCINT2 on the updater board.
    let pcicr = timer.read(TimerReg::Pcicr);
    timer.write(TimerReg::Pcicr, pcicr & !PCIE2);
    timer.write(TimerReg::Pcifr, PCIE2);

    timer.write(TimerReg::Tccr0b, 0);
    timer.write(TimerReg::Tccr0a, 0);
    timer.write(TimerReg::Tcnt0, 0);
    // Flags are cleared by writing ones.
    timer.write(TimerReg::Tifr0, OCF0B | OCF0A | TOV0);
    timer.write(TimerReg::Ocr0b, cycles);
    timer.write(TimerReg::Timsk0, OCIE0B);
    trace!("Timer 0 armed for {} cycles", cycles);
}

/// First half of the compare handler: stop the timer, reset its counter, clear its flags.
///
/// The handler of the updater does the same in assembly before discarding the interrupted
/// program counter.
pub fn acknowledge<T: TimerRegisters + ?Sized>(timer: &mut T) {
    timer.write(TimerReg::Tccr0b, 0);
    timer.write(TimerReg::Tcnt0, 0);
    timer.write(TimerReg::Tifr0, OCF0B | OCF0A | TOV0);
}
