// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use avr_device::atmega1284p::USART0;
use block_protocol::Transport;
use consts::{CPU_FREQUENCY_HZ, UART_BAUD};

const UBRR: u16 = (CPU_FREQUENCY_HZ / (16 * UART_BAUD) - 1) as u16;

/// Receive polling step of [`Usart0::receive_byte_timeout`].
const POLL_STEP_CYCLES: u32 = CPU_FREQUENCY_HZ / 10_000;
const POLL_STEPS_PER_MS: u16 = 10;

// UCSR0B
const TXEN0: u8 = 1 << 3;
const RXEN0: u8 = 1 << 4;
// UCSR0C
const UCSZ00: u8 = 1 << 1;
const UCSZ01: u8 = 1 << 2;

/// Polled USART0, 8N1, no interrupts.
///
/// Waiting for a byte keeps feeding the watchdog, so a host that takes its time between
/// commands does not reset the updater.
pub struct Usart0 {
    usart: USART0,
}

impl Usart0 {
    pub fn new(usart: USART0) -> Self {
        usart.ubrr0.write(|w| w.bits(UBRR));
        usart.ucsr0b.write(|w| w.bits(RXEN0 | TXEN0));
        usart.ucsr0c.write(|w| w.bits(UCSZ01 | UCSZ00));
        Self { usart }
    }

    fn received(&self) -> bool {
        self.usart.ucsr0a.read().rxc0().bit_is_set()
    }
}

impl Transport for Usart0 {
    fn send_byte(&mut self, byte: u8) {
        self.usart.udr0.write(|w| w.bits(byte));
        while self.usart.ucsr0a.read().txc0().bit_is_clear() {}
        // TXC0 is cleared by writing a one.
        self.usart.ucsr0a.modify(|_, w| w.txc0().set_bit());
    }

    fn receive_byte(&mut self) -> u8 {
        while !self.received() {
            avr_device::asm::wdr();
        }
        self.usart.udr0.read().bits()
    }

    fn receive_byte_timeout(&mut self, timeout_ms: u16) -> Option<u8> {
        let mut steps = u32::from(timeout_ms) * u32::from(POLL_STEPS_PER_MS);
        while !self.received() {
            if steps == 0 {
                return None;
            }
            steps -= 1;
            avr_device::asm::wdr();
            avr_device::asm::delay_cycles(POLL_STEP_CYCLES);
        }
        Some(self.usart.udr0.read().bits())
    }
}
