// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::device::Device;
use crate::scanner::SpmSequenceLocation;
use consts::{ERASED_BYTE, PAGE_SIZE};

/// Content of the guard page: a copy of `sequence`'s shape at offset 0, erased elsewhere.
///
/// The erased word after `spm` is never executed, the compare interrupt fires first.
pub fn guard_page(sequence: &SpmSequenceLocation, device: &Device) -> [u8; PAGE_SIZE] {
    let mut page = [ERASED_BYTE; PAGE_SIZE];
    for (slot, word) in page.chunks_exact_mut(2).zip(sequence.encode(device)) {
        slot.copy_from_slice(&word.to_le_bytes());
    }
    page
}
