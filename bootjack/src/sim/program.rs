// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The armed part of a leap as machine code, instruction for instruction what the updater's
//! inline assembly emits.
//!
//! Inputs: r18 command register index, r19 command, r21:r20 payload, r22 target RAMPZ,
//! r25:r24 target Z, r27:r26 sequence word address, r23 its extended byte.

use crate::opcode::*;
use consts::{RAMPZ_IO, SREG_IO, TCCR0B_IO};

pub const R_COMMAND_REGISTER: u8 = 18;
pub const R_COMMAND: u8 = 19;
pub const R_PAYLOAD: u8 = 20;
pub const R_RAMPZ: u8 = 22;
pub const R_JUMP_EXT: u8 = 23;
pub const R_Z: u8 = 24;
pub const R_JUMP: u8 = 26;

/// Assembled leap with the word addresses of its labels.
#[derive(Clone, Debug)]
pub struct LeapProgram {
    pub base: u32,
    pub words: Vec<u16>,
    /// First instruction after the timer was started.
    pub armed: u32,
    /// The `ret` into the sequence.
    pub prepared: u32,
    /// Where the compare handler returns to.
    pub reentry: u32,
}

struct Asm {
    base: u32,
    words: Vec<u16>,
}

impl Asm {
    fn here(&self) -> u32 {
        self.base + self.words.len() as u32
    }

    fn emit(&mut self, words: &[u16]) {
        self.words.extend_from_slice(words);
    }
}

/// Assemble the leap at word address `base` for a `pc_bytes` program counter.
pub fn assemble(base: u32, pc_bytes: u8) -> LeapProgram {
    let mut asm = Asm {
        base,
        words: Vec::new(),
    };
    let wide = pc_bytes > 2;

    // Save what the leap clobbers, then start the timer: cycle zero.
    asm.emit(&[push(0), push(1), push(16), push(30), push(31)]);
    asm.emit(&[r#in(16, SREG_IO), push(16), r#in(16, RAMPZ_IO), push(16)]);
    asm.emit(&[SEI, ldi(16, 1), out(TCCR0B_IO, 16)]);
    let armed = asm.here();

    asm.emit(&[movw(0, R_PAYLOAD)]);
    // Save the command register through its data-space alias.
    asm.emit(&[mov(30, R_COMMAND_REGISTER), ldi(31, 0), ld_z(16), push(16), push(R_COMMAND_REGISTER)]);

    // The re-entry address is patched in once its position is known.
    let reentry_ldi = asm.words.len();
    asm.emit(&[NOP, NOP, push(30), push(31)]);
    if wide {
        asm.emit(&[NOP, push(16)]);
    }
    asm.emit(&[push(R_JUMP), push(R_JUMP + 1)]);
    if wide {
        asm.emit(&[push(R_JUMP_EXT)]);
    }

    asm.emit(&[out(RAMPZ_IO, R_RAMPZ), push(R_Z), push(R_Z + 1)]);
    asm.emit(&[mov(30, R_COMMAND_REGISTER), ldi(31, 0), st_z(R_COMMAND), pop(31), pop(30)]);
    let prepared = asm.here();
    asm.emit(&[RET]);

    let reentry = asm.here();
    asm.emit(&[pop(30), ldi(31, 0), pop(0), st_z(0)]);
    asm.emit(&[pop(16), out(RAMPZ_IO, 16), pop(16), out(SREG_IO, 16)]);
    asm.emit(&[pop(31), pop(30), pop(16), pop(1), pop(0), RET]);

    asm.words[reentry_ldi] = ldi(30, reentry as u8);
    asm.words[reentry_ldi + 1] = ldi(31, (reentry >> 8) as u8);
    if wide {
        asm.words[reentry_ldi + 4] = ldi(16, (reentry >> 16) as u8);
    }

    LeapProgram {
        base,
        words: asm.words,
        armed,
        prepared,
        reentry,
    }
}
