// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod avr;
mod uart;
mod watchdog;

use avr::Avr;
use block_protocol::Transport;
use bootjack::{BootImage, BootImageReplacer, BootStatus, Device, ScanOptions};
use defmt::{error, info};
use panic_halt as _;
use uart::Usart0;
use watchdog::Timeout;

mod new_boot {
    include!(concat!(env!("OUT_DIR"), "/new_boot.rs"));
}

mod dummy_logging {
    #[defmt::global_logger]
    struct Logger;

    unsafe impl defmt::Logger for Logger {
        fn acquire() {}

        unsafe fn flush() {}

        unsafe fn release() {}

        unsafe fn write(_bytes: &[u8]) {}
    }
}

fn scan_options() -> ScanOptions {
    ScanOptions {
        skip_count: if cfg!(feature = "skip-decoy") { 1 } else { 0 },
        ..ScanOptions::default()
    }
}

#[avr_device::entry]
fn main() -> ! {
    let Some(dp) = avr_device::atmega1284p::Peripherals::take() else {
        watchdog::soft_reset();
    };

    watchdog::enable(Timeout::HANG_GUARD);

    let mut link = Usart0::new(dp.USART0);
    // SAFETY: the only instance, created once.
    let mcu = unsafe { Avr::steal() };
    let replacer = BootImageReplacer::new(mcu, Device::ATMEGA1284P, scan_options());

    #[cfg(feature = "interactive")]
    let replacer = match link.receive_byte_timeout(consts::SESSION_TIMEOUT_MS) {
        Some(first) => {
            interactive(replacer, &mut link, first);
            watchdog::soft_reset();
        }
        None => replacer,
    };

    let status = replace_from_image(replacer, &mut link);
    if status.is_success() {
        info!("Boot section replaced");
    } else {
        error!("Boot section replacement failed: {}", status);
    }

    watchdog::soft_reset();
}

fn replace_from_image(mut replacer: BootImageReplacer<Avr>, link: &mut Usart0) -> BootStatus {
    let image = match BootImage::verified(&new_boot::NEW_BOOT, new_boot::NEW_BOOT_CRC) {
        Ok(image) => image,
        Err(e) => {
            error!("Built-in image rejected: {}", e);
            let status = BootStatus::InvalidImage;
            link.send_line(status.token());
            return status;
        }
    };
    info!("Writing {} pages", new_boot::NEW_BOOT_PAGES);
    replacer.replace(&image, link)
}

#[cfg(feature = "interactive")]
fn interactive(replacer: BootImageReplacer<Avr>, link: &mut Usart0, first: u8) {
    use block_protocol::{Command, Poll, Session};
    use bootjack::InteractiveTarget;

    info!("Block upload session");
    let mut target = InteractiveTarget::new(replacer);
    let mut session = Session::new();
    let mut poll = session.handle(Command::from(first), link, &mut target);
    while poll == Poll::Continue {
        poll = session.poll(link, &mut target);
    }
    info!("Session closed after {} blocks", target.blocks());
}
