// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulated microcontroller running the leap instruction by instruction.
//!
//! [`SimMcu`] keeps program flash, data space and timer 0 of the device. Its
//! [`Mcu::leap`](crate::Mcu::leap) loads the frame into the input registers of the assembled
//! leap ([`program`]), executes it together with whatever sequence sits in flash, models the
//! compare interrupt and its handler, and records what happened in a trace.

pub mod cpu;
pub mod program;

use crate::addr::FlashAddr;
use crate::device::Device;
use crate::error::LeapFault;
use crate::leap::{FlashCommand, LeapFrame, LeapPhase};
use crate::timer::{self, TimerReg};
use crate::{Mcu, ProgramMemory};
use cpu::{Cpu, Executed, Snapshot, RAMEND};
use program::LeapProgram;

/// Word address the leap program is placed at, inside the application section.
pub const LEAP_BASE: u32 = 0x0100;

/// Return address pushed for the caller of the leap. Reaching it ends the run.
pub const RETURN_SENTINEL: u32 = 0x0000;

/// Cycles after which a leap counts as hung.
pub const CYCLE_BUDGET: u64 = 10_000;

/// Cycles of the compare handler between entry and `reti`, not counting the pops:
/// `ldi`, `out`, `out`, `ldi`, `out`.
const HANDLER_CYCLES: u64 = 5;

/// Something observed during one leap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    Phase(LeapPhase),
    TimerStarted { cycle: u64 },
    /// `spm` retired `elapsed` cycles after the timer started.
    SpmRetired {
        elapsed: u64,
        command: Option<FlashCommand>,
        target: FlashAddr,
    },
    /// The compare interrupt was taken; `interrupted_pc` is what its handler discarded.
    Intercepted { elapsed: u64, interrupted_pc: u32 },
    /// The handler's `reti` popped the forged re-entry address.
    ForgedReturnConsumed { elapsed: u64, resume_pc: u32 },
    /// The leap returned to its caller.
    Returned,
}

/// One call of [`Mcu::leap`] with the frame decoded back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeapRecord {
    pub seq: usize,
    /// Address of the sequence jumped to.
    pub sequence: FlashAddr,
    pub target: FlashAddr,
    pub command: Option<FlashCommand>,
    pub payload: u16,
    pub result: Result<(), LeapFault>,
}

pub struct SimMcu {
    device: Device,
    cpu: Cpu,
    program: LeapProgram,
    lock_bits: u8,
    trace: Vec<Event>,
    log: Vec<LeapRecord>,
    entry: Option<Snapshot>,
    exit: Option<Snapshot>,
    watchdog_feeds: usize,
}

impl SimMcu {
    /// Erased flash, unlocked lock bits, the leap program installed.
    pub fn new(device: Device) -> Self {
        let program = program::assemble(LEAP_BASE, device.pc_bytes);
        let mut mcu = Self {
            device,
            cpu: Cpu::new(&device),
            program,
            lock_bits: 0xFF,
            trace: Vec::new(),
            log: Vec::new(),
            entry: None,
            exit: None,
            watchdog_feeds: 0,
        };
        let words = mcu.program.words.clone();
        mcu.load_words(FlashAddr::from_word(LEAP_BASE), &words);
        mcu
    }

    pub fn atmega1284p() -> Self {
        Self::new(Device::ATMEGA1284P)
    }

    pub fn with_lock_bits(mut self, lock_bits: u8) -> Self {
        self.lock_bits = lock_bits;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Copy `bytes` into flash, bypassing `spm`.
    pub fn load(&mut self, addr: FlashAddr, bytes: &[u8]) {
        let start = addr.byte() as usize;
        self.cpu.flash_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn load_words(&mut self, addr: FlashAddr, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.load(addr.offset(i as u32 * 2), &word.to_le_bytes());
        }
    }

    pub fn flash(&self) -> &[u8] {
        self.cpu.flash()
    }

    /// Bytes of the page starting at `addr`.
    pub fn page(&self, addr: FlashAddr) -> &[u8] {
        let start = addr.page().byte() as usize;
        &self.cpu.flash()[start..start + consts::PAGE_SIZE]
    }

    pub fn program(&self) -> &LeapProgram {
        &self.program
    }

    /// Events of the last leap.
    pub fn trace(&self) -> &[Event] {
        &self.trace
    }

    /// Every leap so far.
    pub fn log(&self) -> &[LeapRecord] {
        &self.log
    }

    /// Registers as loaded on entry of the last leap, and as left when it returned.
    pub fn entry_state(&self) -> Option<&Snapshot> {
        self.entry.as_ref()
    }

    pub fn exit_state(&self) -> Option<&Snapshot> {
        self.exit.as_ref()
    }

    pub fn set_register(&mut self, r: u8, value: u8) {
        self.cpu.set_reg(r, value);
    }

    pub fn set_sreg(&mut self, value: u8) {
        self.cpu.set_sreg(value);
    }

    /// Timer register writes since the last call.
    pub fn take_timer_writes(&mut self) -> Vec<(TimerReg, u8)> {
        self.cpu.take_timer_writes()
    }

    pub fn watchdog_feeds(&self) -> usize {
        self.watchdog_feeds
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    fn load_frame(&mut self, frame: &LeapFrame) {
        use program::*;

        let [payload_lo, payload_hi] = frame.payload.to_le_bytes();
        let [z_lo, z_hi] = frame.target.z().to_le_bytes();
        let regs = [
            (R_COMMAND_REGISTER, frame.command_register),
            (R_COMMAND, frame.command),
            (R_PAYLOAD, payload_lo),
            (R_PAYLOAD + 1, payload_hi),
            (R_RAMPZ, frame.target.rampz()),
            (R_JUMP_EXT, frame.jump[2]),
            (R_Z, z_lo),
            (R_Z + 1, z_hi),
            (R_JUMP, frame.jump[0]),
            (R_JUMP + 1, frame.jump[1]),
        ];
        for (r, value) in regs {
            self.cpu.set_reg(r, value);
        }
    }

    /// Compare handler: acknowledge the timer, drop the interrupted PC into Z, `reti`.
    fn service_compare(&mut self) -> u32 {
        let elapsed = self.cpu.elapsed().unwrap_or(0);
        self.cpu.enter_interrupt();
        self.trace.push(Event::Phase(LeapPhase::Intercepted));

        timer::acknowledge(&mut self.cpu);
        self.cpu.spend(HANDLER_CYCLES);

        let mut interrupted_pc = 0;
        for i in 0..self.device.pc_bytes {
            let byte = self.cpu.pop();
            self.cpu.set_reg(if i == 0 { 31 } else { 30 }, byte);
            interrupted_pc = (interrupted_pc << 8) | u32::from(byte);
            self.cpu.spend(2);
        }
        self.trace.push(Event::Intercepted { elapsed, interrupted_pc });

        let resume_pc = self.cpu.pop_pc();
        self.cpu.set_pc(resume_pc);
        self.cpu.set_sreg(self.cpu.sreg() | cpu::SREG_I);
        self.cpu.spend(if self.device.pc_bytes > 2 { 5 } else { 4 });
        self.trace.push(Event::ForgedReturnConsumed {
            elapsed: self.cpu.elapsed().unwrap_or(0),
            resume_pc,
        });
        resume_pc
    }

    fn run(&mut self, frame: &LeapFrame) -> Result<(), LeapFault> {
        self.trace.clear();
        self.exit = None;
        self.cpu.set_sp(RAMEND);
        self.load_frame(frame);
        self.entry = Some(self.cpu.snapshot());
        self.cpu.push_pc(RETURN_SENTINEL);
        self.cpu.set_pc(self.program.base);
        self.trace.push(Event::Phase(LeapPhase::Idle));

        let start = self.cpu.cycles();
        let sequence = jump_word(frame);
        let mut spm_elapsed = None;
        let mut intercepted = false;
        let mut premature = false;

        loop {
            if self.cpu.cycles() - start > CYCLE_BUDGET {
                return Err(LeapFault::Hang);
            }

            self.cpu.update_compare();
            if self.cpu.compare_interrupt_pending() {
                premature |= spm_elapsed.is_none();
                intercepted = true;
                self.service_compare();
                continue;
            }

            let pc = self.cpu.pc();
            if pc == RETURN_SENTINEL {
                self.trace.push(Event::Returned);
                self.exit = Some(self.cpu.snapshot());
                break;
            }
            if spm_elapsed.is_some() && !intercepted {
                return Err(LeapFault::FellThrough);
            }
            if pc == self.program.armed {
                self.trace.push(Event::Phase(LeapPhase::Armed));
            } else if pc == self.program.prepared {
                self.trace.push(Event::Phase(LeapPhase::Prepared));
            } else if pc == self.program.reentry {
                self.trace.push(Event::Phase(LeapPhase::Restored));
            }

            match self.cpu.step() {
                Executed::Normal => {}
                Executed::Spm { command, target } => {
                    if !intercepted && spm_elapsed.is_none() {
                        let elapsed = self.cpu.elapsed().unwrap_or(0);
                        spm_elapsed = Some(elapsed);
                        self.trace.push(Event::SpmRetired {
                            elapsed,
                            command,
                            target,
                        });
                    }
                }
                Executed::Unknown(_) => return Err(LeapFault::FellThrough),
            }
            if let Some(cycle) = self.cpu.latch_timer_start() {
                self.trace.push(Event::TimerStarted { cycle });
            }
            if pc == self.program.prepared && self.cpu.pc() == sequence {
                self.trace.push(Event::Phase(LeapPhase::Executing));
            }
        }

        if premature {
            return Err(LeapFault::Premature);
        }
        Ok(())
    }
}

fn jump_word(frame: &LeapFrame) -> u32 {
    frame.jump_bytes().iter().rev().fold(0, |word, &b| (word << 8) | u32::from(b))
}

impl ProgramMemory for SimMcu {
    fn read_word(&self, addr: FlashAddr) -> u16 {
        self.cpu.fetch(addr.word())
    }
}

impl Mcu for SimMcu {
    type Timer = Cpu;

    fn lock_bits(&mut self) -> u8 {
        self.lock_bits
    }

    fn spm_busy(&self) -> bool {
        self.cpu.read_data(self.device.spmcsr_mem) & 0x01 != 0
    }

    fn timer(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    unsafe fn leap(&mut self, frame: &LeapFrame) -> Result<(), LeapFault> {
        let result = self.run(frame);
        // SPMEN clears itself four cycles after being set.
        self.cpu.write_data(self.device.spmcsr_mem, 0);
        self.log.push(LeapRecord {
            seq: self.log.len(),
            sequence: FlashAddr::from_word(jump_word(frame)),
            target: frame.target,
            command: FlashCommand::from_bits(frame.command),
            payload: frame.payload,
            result,
        });
        result
    }

    fn feed_watchdog(&mut self) {
        self.watchdog_feeds += 1;
    }
}
