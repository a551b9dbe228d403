// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::PAGE_SIZE;

/// Unit an interface uses to express flash addresses.
///
/// LPM/ELPM, SPM and the Z pointer count bytes; the program counter, `ret` and the block
/// protocol count 16-bit words.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressUnit {
    Byte,
    Word,
}

/// Address of a byte in program flash.
///
/// Every conversion between byte and word addresses goes through [`FlashAddr::from_unit`]
/// and [`FlashAddr::to_unit`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashAddr(u32);

impl FlashAddr {
    pub const fn from_unit(raw: u32, unit: AddressUnit) -> Self {
        match unit {
            AddressUnit::Byte => Self(raw),
            AddressUnit::Word => Self(raw << 1),
        }
    }

    pub const fn to_unit(self, unit: AddressUnit) -> u32 {
        match unit {
            AddressUnit::Byte => self.0,
            AddressUnit::Word => self.0 >> 1,
        }
    }

    pub const fn from_byte(byte: u32) -> Self {
        Self::from_unit(byte, AddressUnit::Byte)
    }

    pub const fn from_word(word: u32) -> Self {
        Self::from_unit(word, AddressUnit::Word)
    }

    pub const fn byte(self) -> u32 {
        self.to_unit(AddressUnit::Byte)
    }

    pub const fn word(self) -> u32 {
        self.to_unit(AddressUnit::Word)
    }

    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }

    /// Start of the page containing this address.
    pub const fn page(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    pub const fn page_offset(self) -> usize {
        (self.0 & (PAGE_SIZE as u32 - 1)) as usize
    }

    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub const fn is_word_aligned(self) -> bool {
        self.0 & 1 == 0
    }

    /// Low 16 bits, the value loaded into Z.
    pub const fn z(self) -> u16 {
        self.0 as u16
    }

    /// Bits 16 and up, the value loaded into RAMPZ.
    pub const fn rampz(self) -> u8 {
        (self.0 >> 16) as u8
    }
}
