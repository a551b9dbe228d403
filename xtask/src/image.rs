// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Intel HEX boot loader to the page image built into the updater.

use consts::{BOOT_SECTION_END, BOOT_SECTION_START, ERASED_BYTE, PAGE_SIZE};
use crc::{Crc, CRC_32_ISCSI};
use std::fmt::Write;

/// Same checksum as `bootjack::image::IMAGE_CRC`.
const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid Intel HEX: {0}")]
    Parse(#[from] ihex::ReaderError),
    #[error("{len} bytes at {address:#07x} are outside the boot section")]
    OutOfRange { address: u32, len: usize },
    #[error("byte at {address:#07x} is defined twice")]
    Overlap { address: u32 },
    #[error("no data records")]
    Empty,
}

/// Boot section image starting at `BOOT_SECTION_START`, a whole number of pages long.
#[derive(Debug, Eq, PartialEq)]
pub struct PageImage {
    pub bytes: Vec<u8>,
}

impl PageImage {
    /// Collect the data records of `hex`. Addresses are absolute flash byte addresses, gaps
    /// and the tail of the last page are filled with erased bytes.
    pub fn from_ihex(hex: &str) -> Result<Self, ImageError> {
        let capacity = (BOOT_SECTION_END - BOOT_SECTION_START) as usize;
        let mut bytes = vec![None; capacity];
        let mut upper = 0u32;

        for record in ihex::Reader::new(hex) {
            match record? {
                ihex::Record::ExtendedSegmentAddress(segment) => upper = u32::from(segment) << 4,
                ihex::Record::ExtendedLinearAddress(high) => upper = u32::from(high) << 16,
                ihex::Record::Data { offset, value } => {
                    let address = upper + u32::from(offset);
                    let start = address
                        .checked_sub(BOOT_SECTION_START)
                        .map(|start| start as usize)
                        .filter(|start| start + value.len() <= capacity)
                        .ok_or(ImageError::OutOfRange {
                            address,
                            len: value.len(),
                        })?;
                    for (i, byte) in value.into_iter().enumerate() {
                        let slot = &mut bytes[start + i];
                        if slot.is_some() {
                            return Err(ImageError::Overlap {
                                address: address + i as u32,
                            });
                        }
                        *slot = Some(byte);
                    }
                }
                // Entry points mean nothing to the updater.
                ihex::Record::StartSegmentAddress { .. }
                | ihex::Record::StartLinearAddress(_)
                | ihex::Record::EndOfFile => {}
            }
        }

        let used = bytes.iter().rposition(Option::is_some).ok_or(ImageError::Empty)? + 1;
        let len = used.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        Ok(Self {
            bytes: bytes[..len].iter().map(|b| b.unwrap_or(ERASED_BYTE)).collect(),
        })
    }

    pub fn pages(&self) -> usize {
        self.bytes.len() / PAGE_SIZE
    }

    pub fn crc(&self) -> u32 {
        IMAGE_CRC.checksum(&self.bytes)
    }

    /// Rust source defining `NEW_BOOT`, `NEW_BOOT_CRC` and `NEW_BOOT_PAGES`.
    pub fn to_rust(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "// Generated by `cargo xtask image`, do not edit.");
        let _ = writeln!(out, "pub static NEW_BOOT: [u8; {}] = [", self.bytes.len());
        for line in self.bytes.chunks(16) {
            let line: Vec<String> = line.iter().map(|b| format!("0x{b:02X},")).collect();
            let _ = writeln!(out, "    {}", line.join(" "));
        }
        let _ = writeln!(out, "];");
        let _ = writeln!(out, "pub const NEW_BOOT_CRC: u32 = {:#010X};", self.crc());
        let _ = writeln!(out, "pub const NEW_BOOT_PAGES: usize = {};", self.pages());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(records: &[ihex::Record]) -> String {
        let mut records = records.to_vec();
        records.push(ihex::Record::EndOfFile);
        ihex::create_object_file_representation(&records).unwrap()
    }

    fn boot_start() -> Vec<ihex::Record> {
        vec![ihex::Record::ExtendedSegmentAddress((BOOT_SECTION_START >> 4) as u16)]
    }

    #[test]
    fn tail_is_padded_to_a_page() {
        let mut records = boot_start();
        records.push(ihex::Record::Data {
            offset: 0,
            value: vec![0x0C, 0x94, 0x3E, 0xFC],
        });
        let image = PageImage::from_ihex(&hex(&records)).unwrap();

        assert_eq!(image.pages(), 1);
        assert_eq!(&image.bytes[..4], &[0x0C, 0x94, 0x3E, 0xFC]);
        assert!(image.bytes[4..].iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn gaps_are_erased() {
        let mut records = boot_start();
        records.push(ihex::Record::Data {
            offset: 0,
            value: vec![1, 2],
        });
        records.push(ihex::Record::Data {
            offset: 0x110,
            value: vec![3],
        });
        let image = PageImage::from_ihex(&hex(&records)).unwrap();

        assert_eq!(image.pages(), 2);
        assert_eq!(image.bytes[0x10F], ERASED_BYTE);
        assert_eq!(image.bytes[0x110], 3);
    }

    #[test]
    fn linear_addressing_is_understood() {
        let records = [
            ihex::Record::ExtendedLinearAddress(1),
            ihex::Record::Data {
                offset: 0xFF00,
                value: vec![0xAA],
            },
        ];
        let image = PageImage::from_ihex(&hex(&records)).unwrap();
        assert_eq!(image.pages(), 8);
        assert_eq!(image.bytes[0x700], 0xAA);
    }

    #[test]
    fn application_section_data_is_refused() {
        let records = [ihex::Record::Data {
            offset: 0x0100,
            value: vec![0; 4],
        }];
        assert!(matches!(
            PageImage::from_ihex(&hex(&records)),
            Err(ImageError::OutOfRange { address: 0x0100, len: 4 })
        ));
    }

    #[test]
    fn overlapping_records_are_refused() {
        let mut records = boot_start();
        records.push(ihex::Record::Data {
            offset: 0,
            value: vec![0; 4],
        });
        records.push(ihex::Record::Data {
            offset: 2,
            value: vec![0; 4],
        });
        assert!(matches!(
            PageImage::from_ihex(&hex(&records)),
            Err(ImageError::Overlap { address }) if address == BOOT_SECTION_START + 2
        ));
    }

    #[test]
    fn no_data_is_refused() {
        assert!(matches!(PageImage::from_ihex(&hex(&boot_start())), Err(ImageError::Empty)));
    }

    #[test]
    fn generated_source_carries_length_and_checksum() {
        let image = PageImage {
            bytes: vec![ERASED_BYTE; PAGE_SIZE],
        };
        let source = image.to_rust();
        assert!(source.contains("pub static NEW_BOOT: [u8; 256] = ["));
        assert!(source.contains(&format!("pub const NEW_BOOT_CRC: u32 = {:#010X};", image.crc())));
        assert!(source.contains("pub const NEW_BOOT_PAGES: usize = 1;"));
        assert_eq!(source.matches("0xFF,").count(), PAGE_SIZE);
    }
}
