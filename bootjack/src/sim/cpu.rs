// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cycle counting interpreter for the AVR instructions the leap and the factory sequence use.
//!
//! Data space is laid out as on the device: registers at 0..32, I/O at 0x20 + io, extended
//! I/O and SRAM above. Timer 0 counts one step per CPU cycle from the instruction that set
//! its clock select.

use crate::addr::FlashAddr;
use crate::device::Device;
use crate::leap::{return_address_bytes, FlashCommand};
use crate::opcode::{CLI, ERASED, NOP, RET, RETI, SEI, SPM};
use crate::timer::{TimerReg, TimerRegisters, OCF0B, OCIE0B};
use consts::{ERASED_BYTE, PAGE_SIZE, RAMPZ_IO, SPH_IO, SPL_IO, SREG_IO};

/// Top of SRAM, the initial stack pointer.
pub const RAMEND: u16 = 0x40FF;

/// Global interrupt enable in SREG.
pub const SREG_I: u8 = 1 << 7;

const fn io(addr: u8) -> u16 {
    addr as u16 + 0x20
}

/// What the executed instruction was, as far as the leap cares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Executed {
    Normal,
    Spm {
        command: Option<FlashCommand>,
        target: FlashAddr,
    },
    Unknown(u16),
}

/// Register state visible to the caller of a leap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub regs: [u8; 32],
    pub sp: u16,
    pub sreg: u8,
    pub rampz: u8,
}

pub struct Cpu {
    flash: Vec<u8>,
    data: Vec<u8>,
    page_buffer: [u8; PAGE_SIZE],
    pc: u32,
    cycles: u64,
    pc_bytes: u8,
    boot_start: FlashAddr,
    boot_end: FlashAddr,
    spmcsr: u16,
    timer_running: bool,
    timer_origin: Option<u64>,
    timer_start_pending: bool,
    timer_writes: Vec<(TimerReg, u8)>,
}

impl Cpu {
    pub fn new(device: &Device) -> Self {
        let mut cpu = Self {
            flash: vec![ERASED_BYTE; device.flash_size as usize],
            data: vec![0; RAMEND as usize + 1],
            page_buffer: [ERASED_BYTE; PAGE_SIZE],
            pc: 0,
            cycles: 0,
            pc_bytes: device.pc_bytes,
            boot_start: device.boot_start,
            boot_end: device.boot_end,
            spmcsr: device.spmcsr_mem,
            timer_running: false,
            timer_origin: None,
            timer_start_pending: false,
            timer_writes: Vec::new(),
        };
        cpu.set_sp(RAMEND);
        cpu
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    pub fn fetch(&self, word: u32) -> u16 {
        let byte = word as usize * 2;
        match self.flash.get(byte..byte + 2) {
            Some(w) => u16::from_le_bytes([w[0], w[1]]),
            None => ERASED,
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, word: u32) {
        self.pc = word;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn reg(&self, r: u8) -> u8 {
        self.data[r as usize]
    }

    pub fn set_reg(&mut self, r: u8, value: u8) {
        self.data[r as usize] = value;
    }

    pub fn read_data(&self, addr: u16) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0)
    }

    /// Store into data space with the side effects of timer 0's registers.
    pub fn write_data(&mut self, addr: u16, value: u8) {
        let Some(slot) = self.data.get_mut(addr as usize) else {
            return;
        };
        if addr == TimerReg::Tifr0.mem_addr() {
            // Flags are cleared by writing one.
            *slot &= !value;
        } else if addr == TimerReg::Tccr0b.mem_addr() {
            *slot = value;
            let running = value & 0x07 != 0;
            if running && !self.timer_running {
                self.timer_start_pending = true;
            }
            self.timer_running = running;
        } else if addr == TimerReg::Tcnt0.mem_addr() {
            *slot = value;
            if self.timer_running {
                self.timer_start_pending = true;
            }
        } else {
            *slot = value;
        }
    }

    pub fn sreg(&self) -> u8 {
        self.read_data(io(SREG_IO))
    }

    pub fn set_sreg(&mut self, value: u8) {
        self.write_data(io(SREG_IO), value);
    }

    pub fn sp(&self) -> u16 {
        u16::from_le_bytes([self.read_data(io(SPL_IO)), self.read_data(io(SPH_IO))])
    }

    pub fn set_sp(&mut self, sp: u16) {
        let [lo, hi] = sp.to_le_bytes();
        self.write_data(io(SPL_IO), lo);
        self.write_data(io(SPH_IO), hi);
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut regs = [0; 32];
        regs.copy_from_slice(&self.data[..32]);
        Snapshot {
            regs,
            sp: self.sp(),
            sreg: self.sreg(),
            rampz: self.read_data(io(RAMPZ_IO)),
        }
    }

    pub fn push(&mut self, value: u8) {
        let sp = self.sp();
        self.write_data(sp, value);
        self.set_sp(sp.wrapping_sub(1));
    }

    pub fn pop(&mut self) -> u8 {
        let sp = self.sp().wrapping_add(1);
        self.set_sp(sp);
        self.read_data(sp)
    }

    /// Push a return address the way `call` does.
    pub fn push_pc(&mut self, word: u32) {
        let bytes = return_address_bytes(word, self.pc_bytes);
        for &b in &bytes[..self.pc_bytes as usize] {
            self.push(b);
        }
    }

    /// Pop a return address the way `ret` does.
    pub fn pop_pc(&mut self) -> u32 {
        (0..self.pc_bytes).fold(0, |pc, _| (pc << 8) | u32::from(self.pop()))
    }

    fn return_cycles(&self) -> u64 {
        if self.pc_bytes > 2 {
            5
        } else {
            4
        }
    }

    /// Cycles since timer 0 was last started, whether it still runs or not.
    pub fn elapsed(&self) -> Option<u64> {
        self.timer_origin.map(|origin| self.cycles - origin)
    }

    /// Take a pending start of timer 0 into account, counting from the current cycle.
    /// Returns the cycle the timer started at.
    pub fn latch_timer_start(&mut self) -> Option<u64> {
        if !std::mem::take(&mut self.timer_start_pending) {
            return None;
        }
        self.timer_origin = Some(self.cycles);
        Some(self.cycles)
    }

    /// Set OCF0B once the running timer reached OCR0B.
    pub fn update_compare(&mut self) {
        if !self.timer_running {
            return;
        }
        let ocr = self.read_data(TimerReg::Ocr0b.mem_addr());
        if self.elapsed().is_some_and(|e| e >= u64::from(ocr)) {
            let tifr = TimerReg::Tifr0.mem_addr();
            self.data[tifr as usize] |= OCF0B;
        }
    }

    pub fn compare_interrupt_pending(&self) -> bool {
        self.sreg() & SREG_I != 0
            && self.read_data(TimerReg::Tifr0.mem_addr()) & OCF0B != 0
            && self.read_data(TimerReg::Timsk0.mem_addr()) & OCIE0B != 0
    }

    /// Hardware part of taking the compare interrupt: clear its flag and I, push the PC.
    pub fn enter_interrupt(&mut self) {
        let tifr = TimerReg::Tifr0.mem_addr();
        self.data[tifr as usize] &= !OCF0B;
        self.set_sreg(self.sreg() & !SREG_I);
        self.push_pc(self.pc);
        self.cycles += self.return_cycles();
    }

    /// Charge `cycles` for instructions modelled outside the interpreter.
    pub fn spend(&mut self, cycles: u64) {
        self.cycles += cycles;
    }

    pub fn take_timer_writes(&mut self) -> Vec<(TimerReg, u8)> {
        std::mem::take(&mut self.timer_writes)
    }

    fn z(&self) -> u16 {
        u16::from_le_bytes([self.reg(30), self.reg(31)])
    }

    fn pc_byte_len(&self) -> u32 {
        if is_two_word(self.fetch(self.pc)) {
            2
        } else {
            1
        }
    }

    /// Execute the instruction at the PC. A timer start it caused is left pending for
    /// [`Cpu::latch_timer_start`].
    pub fn step(&mut self) -> Executed {
        let op = self.fetch(self.pc);
        let d = ((op >> 4) & 0x1F) as u8;
        let io_addr = (((op >> 5) & 0x30) | (op & 0x0F)) as u8;
        let mut next = self.pc + 1;
        let mut outcome = Executed::Normal;

        let cost = match op {
            NOP => 1,
            SEI => {
                self.set_sreg(self.sreg() | SREG_I);
                1
            }
            CLI => {
                self.set_sreg(self.sreg() & !SREG_I);
                1
            }
            RET | RETI => {
                next = self.pop_pc();
                if op == RETI {
                    self.set_sreg(self.sreg() | SREG_I);
                }
                self.return_cycles()
            }
            SPM => {
                outcome = self.spm();
                1
            }
            _ if op & 0xFF00 == 0x0100 => {
                let rd = ((op >> 4) & 0x0F) as u8 * 2;
                let rr = (op & 0x0F) as u8 * 2;
                self.set_reg(rd, self.reg(rr));
                self.set_reg(rd + 1, self.reg(rr + 1));
                1
            }
            _ if op & 0xFC00 == 0x2C00 => {
                let rr = (((op >> 5) & 0x10) | (op & 0x0F)) as u8;
                self.set_reg(d, self.reg(rr));
                1
            }
            _ if op & 0xF000 == 0xE000 => {
                let k = (((op >> 4) & 0xF0) | (op & 0x0F)) as u8;
                self.set_reg(16 + (d & 0x0F), k);
                1
            }
            _ if op & 0xF800 == 0xB000 => {
                let value = self.read_data(io(io_addr));
                self.set_reg(d, value);
                1
            }
            _ if op & 0xF800 == 0xB800 => {
                self.write_data(io(io_addr), self.reg(d));
                1
            }
            _ if op & 0xFC08 == 0xFC00 => {
                // sbrc / sbrs
                let set = self.reg(d) & (1 << (op & 0x07)) != 0;
                let skip_if_set = op & 0x0200 != 0;
                if set == skip_if_set {
                    self.pc = next;
                    let len = self.pc_byte_len();
                    next += len;
                    1 + u64::from(len)
                } else {
                    1
                }
            }
            _ if op & 0xF000 == 0xC000 => {
                // Sign-extend the 12-bit offset.
                let k = (((op & 0x0FFF) << 4) as i16) >> 4;
                next = next.wrapping_add_signed(i32::from(k));
                2
            }
            _ if op & 0xFE0F == 0x8000 => {
                let value = self.read_data(self.z());
                self.set_reg(d, value);
                2
            }
            _ if op & 0xFE0F == 0x8200 => {
                self.write_data(self.z(), self.reg(d));
                2
            }
            _ if op & 0xFE0F == 0x920F => {
                self.push(self.reg(d));
                2
            }
            _ if op & 0xFE0F == 0x900F => {
                let value = self.pop();
                self.set_reg(d, value);
                2
            }
            _ if op & 0xFE0F == 0x9200 => {
                let k = self.fetch(self.pc + 1);
                self.write_data(k, self.reg(d));
                next += 1;
                2
            }
            _ if op & 0xFE0F == 0x9000 => {
                let k = self.fetch(self.pc + 1);
                let value = self.read_data(k);
                self.set_reg(d, value);
                next += 1;
                2
            }
            _ => return Executed::Unknown(op),
        };

        self.pc = next;
        self.cycles += cost;
        outcome
    }

    /// `spm` as executed from `self.pc`. Only effective from the boot section.
    fn spm(&mut self) -> Executed {
        let target = FlashAddr::from_byte(u32::from(self.read_data(io(RAMPZ_IO))) << 16 | u32::from(self.z()));
        let bits = self.read_data(self.spmcsr) & 0x07;
        self.write_data(self.spmcsr, 0);

        let here = FlashAddr::from_word(self.pc);
        if here < self.boot_start || here >= self.boot_end {
            return Executed::Spm { command: None, target };
        }

        let command = FlashCommand::from_bits(bits);
        let page = target.page().byte() as usize;
        match command {
            Some(FlashCommand::Enable) => {
                let offset = target.page_offset() & !1;
                self.page_buffer[offset] = self.reg(0);
                self.page_buffer[offset + 1] = self.reg(1);
            }
            Some(FlashCommand::Erase) => {
                if let Some(bytes) = self.flash.get_mut(page..page + PAGE_SIZE) {
                    bytes.fill(ERASED_BYTE);
                }
            }
            Some(FlashCommand::WritePage) => {
                if let Some(bytes) = self.flash.get_mut(page..page + PAGE_SIZE) {
                    // Programming only clears bits.
                    for (cell, staged) in bytes.iter_mut().zip(self.page_buffer) {
                        *cell &= staged;
                    }
                }
                self.page_buffer = [ERASED_BYTE; PAGE_SIZE];
            }
            None => {}
        }
        Executed::Spm { command, target }
    }
}

/// `lds`, `sts`, `jmp` and `call` take a second word.
fn is_two_word(op: u16) -> bool {
    op & 0xFC0F == 0x9000 || op & 0xFE0C == 0x940C
}

impl TimerRegisters for Cpu {
    fn write(&mut self, reg: TimerReg, value: u8) {
        self.timer_writes.push((reg, value));
        self.write_data(reg.mem_addr(), value);
        self.latch_timer_start();
    }

    fn read(&mut self, reg: TimerReg) -> u8 {
        self.read_data(reg.mem_addr())
    }
}
