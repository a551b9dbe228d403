// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Places the replacement boot image where `main.rs` includes it from.
//!
//! `cargo xtask image <hex>` writes `new_boot.rs`; point `NEW_BOOT_RS` at it. Without it an
//! empty image is built in, which the updater refuses with `AVRBCE4` before touching flash.

use crc::{Crc, CRC_32_ISCSI};
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    let target = out.join("new_boot.rs");

    println!("cargo:rerun-if-env-changed=NEW_BOOT_RS");
    match env::var_os("NEW_BOOT_RS") {
        Some(path) => {
            let path = PathBuf::from(path);
            println!("cargo:rerun-if-changed={}", path.display());
            fs::copy(&path, &target).unwrap();
        }
        None => {
            println!("cargo:warning=NEW_BOOT_RS not set, building with an empty boot image");
            let crc = Crc::<u32>::new(&CRC_32_ISCSI).checksum(&[]);
            let content = format!(
                "pub static NEW_BOOT: [u8; 0] = [];\n\
                 pub const NEW_BOOT_CRC: u32 = {crc:#010X};\n\
                 pub const NEW_BOOT_PAGES: usize = 0;\n"
            );
            fs::write(&target, content).unwrap();
        }
    }

    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
