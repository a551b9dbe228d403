// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! AVR instruction encodings.
//!
//! Only the instructions that appear in the factory sequence, the guard copy and the leap
//! itself are covered.

/// Bits selecting Rd/Rr in single-register instructions such as `sts`, `out`, `push`.
pub const REGISTER_MASK: u16 = 0x01F0;

pub const NOP: u16 = 0x0000;
pub const SEI: u16 = 0x9478;
pub const CLI: u16 = 0x94F8;
pub const RET: u16 = 0x9508;
pub const RETI: u16 = 0x9518;
pub const SPM: u16 = 0x95E8;

/// Content of erased flash. Not a valid instruction.
pub const ERASED: u16 = 0xFFFF;

const fn reg(r: u8) -> u16 {
    ((r as u16) & 0x1F) << 4
}

/// Register operand of a single-register instruction.
pub const fn register_of(word: u16) -> u8 {
    ((word & REGISTER_MASK) >> 4) as u8
}

/// First word of `sts k, Rr`; the second word is `k`.
pub const fn sts(r: u8) -> u16 {
    0x9200 | reg(r)
}

/// First word of `lds Rd, k`; the second word is `k`.
pub const fn lds(d: u8) -> u16 {
    0x9000 | reg(d)
}

pub const fn out(io: u8, r: u8) -> u16 {
    0xB800 | (((io as u16) & 0x30) << 5) | reg(r) | ((io as u16) & 0x0F)
}

pub const fn r#in(d: u8, io: u8) -> u16 {
    0xB000 | (((io as u16) & 0x30) << 5) | reg(d) | ((io as u16) & 0x0F)
}

pub const fn push(r: u8) -> u16 {
    0x920F | reg(r)
}

pub const fn pop(d: u8) -> u16 {
    0x900F | reg(d)
}

/// `ldi Rd, K`, `d` in 16..=31.
pub const fn ldi(d: u8, k: u8) -> u16 {
    0xE000 | (((k as u16) & 0xF0) << 4) | ((((d - 16) as u16) & 0x0F) << 4) | ((k as u16) & 0x0F)
}

pub const fn mov(d: u8, r: u8) -> u16 {
    0x2C00 | (((r as u16) & 0x10) << 5) | reg(d) | ((r as u16) & 0x0F)
}

/// `movw Rd+1:Rd, Rr+1:Rr`, both even.
pub const fn movw(d: u8, r: u8) -> u16 {
    0x0100 | (((d as u16) >> 1) << 4) | ((r as u16) >> 1)
}

/// `ld Rd, Z`
pub const fn ld_z(d: u8) -> u16 {
    0x8000 | reg(d)
}

/// `st Z, Rr`
pub const fn st_z(r: u8) -> u16 {
    0x8200 | reg(r)
}

pub const fn sbrc(r: u8, bit: u8) -> u16 {
    0xFC00 | reg(r) | ((bit as u16) & 0x07)
}

/// `rjmp .+2k`, `k` in words relative to the next instruction.
pub const fn rjmp(k: i16) -> u16 {
    0xC000 | ((k as u16) & 0x0FFF)
}
