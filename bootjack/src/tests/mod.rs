use crate::addr::FlashAddr;
use crate::device::Device;
use crate::leap::{Calibration, FlashCommand};
use crate::opcode::{self, SPM};
use crate::sim::{LeapRecord, SimMcu};
use crate::ProgramMemory;
use block_protocol::Transport;
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

mod image;
mod page;
mod replacer;

/// Flash image without any simulation behind it.
struct Flash(Vec<u8>);

impl Flash {
    fn erased() -> Self {
        Self(std::vec![0xFF; Device::ATMEGA1284P.flash_size as usize])
    }

    fn put(&mut self, addr: u32, words: &[u16]) -> &mut Self {
        for (i, word) in words.iter().enumerate() {
            let at = addr as usize + i * 2;
            self.0[at..at + 2].copy_from_slice(&word.to_le_bytes());
        }
        self
    }
}

impl ProgramMemory for Flash {
    fn read_word(&self, addr: FlashAddr) -> u16 {
        let at = addr.byte() as usize;
        u16::from_le_bytes([self.0[at], self.0[at + 1]])
    }
}

fn sts_sequence(r: u8) -> [u16; 3] {
    [opcode::sts(r), consts::SPMCSR_MEM, SPM]
}

fn out_sequence(r: u8) -> [u16; 2] {
    [opcode::out(consts::SPMCSR_IO, r), SPM]
}

fn addr(byte: u32) -> FlashAddr {
    FlashAddr::from_byte(byte)
}

/// Simulated ATmega1284P with an `sts` sequence using `r24` at each of `at`.
fn sim_with_sequences(at: &[u32]) -> SimMcu {
    let mut mcu = SimMcu::atmega1284p();
    for &a in at {
        mcu.load_words(addr(a), &sts_sequence(24));
    }
    mcu
}

/// Same layout as the ATmega1284P with a 3-byte program counter and 256 KiB of flash.
fn wide_device() -> Device {
    Device {
        flash_size: 0x4_0000,
        boot_start: addr(0x3_F800),
        boot_end: addr(0x4_0000),
        scan_start: addr(0x3_F800),
        scan_end: addr(0x3_FFFE),
        guard_page: addr(0x3_FF00),
        pc_bytes: 3,
        calibration: Calibration { sts: 45, out: 44 },
        ..Device::ATMEGA1284P
    }
}

fn commands(log: &[LeapRecord]) -> Vec<Option<FlashCommand>> {
    log.iter().map(|record| record.command).collect()
}

/// Targets of the leaps running `command`, in call order.
fn targets_of(log: &[LeapRecord], command: FlashCommand) -> Vec<u32> {
    log.iter()
        .filter(|record| record.command == Some(command))
        .map(|record| record.target.byte())
        .collect()
}

#[derive(Default)]
struct Link {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl Link {
    fn with_input(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.iter().copied().collect(),
            tx: Vec::new(),
        }
    }

    fn lines(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.tx);
        text.split_terminator("\r\n").map(String::from).collect()
    }
}

impl Transport for Link {
    fn send_byte(&mut self, byte: u8) {
        self.tx.push(byte);
    }

    fn receive_byte(&mut self) -> u8 {
        self.rx.pop_front().expect("test input exhausted")
    }

    fn receive_byte_timeout(&mut self, _timeout_ms: u16) -> Option<u8> {
        self.rx.pop_front()
    }
}
