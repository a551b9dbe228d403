// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::device::Device;
use consts::PAGE_SIZE;
use crc::{Crc, CRC_32_ISCSI};

/// Checksum over the replacement image, as computed by `xtask image`.
pub const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageError {
    Empty,
    /// The image does not fit the boot section.
    TooLarge { len: usize, capacity: usize },
    CrcMismatch { expected: u32, actual: u32 },
}

/// Replacement boot section content, page 0 landing at the start of the boot section.
#[derive(Clone, Copy, Debug)]
pub struct BootImage<'a> {
    bytes: &'a [u8],
}

impl<'a> BootImage<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self { bytes })
    }

    /// Image whose CRC-32/ISCSI must equal `expected`.
    pub fn verified(bytes: &'a [u8], expected: u32) -> Result<Self, ImageError> {
        let image = Self::new(bytes)?;
        let actual = image.crc();
        if actual != expected {
            return Err(ImageError::CrcMismatch { expected, actual });
        }
        Ok(image)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn crc(&self) -> u32 {
        IMAGE_CRC.checksum(self.bytes)
    }

    /// Pages needed, the last one possibly partial.
    pub fn page_count(&self) -> usize {
        self.bytes.len().div_ceil(PAGE_SIZE)
    }

    pub fn check_fits(&self, device: &Device) -> Result<(), ImageError> {
        let capacity = device.boot_pages() * PAGE_SIZE;
        if self.bytes.len() > capacity {
            return Err(ImageError::TooLarge {
                len: self.bytes.len(),
                capacity,
            });
        }
        Ok(())
    }

    /// Pages with their index, in ascending destination order.
    pub fn pages(&self) -> impl Iterator<Item = (usize, &'a [u8])> {
        self.bytes.chunks(PAGE_SIZE).enumerate()
    }
}
