/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! The 16-byte DMK image header (spec §3, §6).

use crate::error::{DiskforgeError, Result};
use binrw::BinRead;
use bitflags::bitflags;

bitflags! {
    /// The DMK header's option-flags byte.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DmkOptionFlags: u8 {
        const SINGLE_SIDED     = 1 << 4;
        const RX02             = 1 << 5;
        const SINGLE_DENSITY   = 1 << 6;
        /// Legacy quirk: ignore density bit entirely when reading IDAMs.
        const IGNORE_DENSITY   = 1 << 7;
    }
}

/// Parsed 16-byte DMK header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct DmkHeader {
    write_protect_raw: u8,
    pub track_count: u8,
    pub track_length: u16,
    flags_raw: u8,
    pub quirks: u8,
    #[br(pad_before = 6)]
    pub native_magic: u32,
}

impl DmkHeader {
    pub const SIZE: usize = 16;

    /// Parse a 16-byte DMK header. Fails with [`DiskforgeError::InvalidImage`]
    /// if `bytes` is too short.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(DiskforgeError::InvalidImage(format!(
                "DMK header truncated: got {} bytes, need {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        let mut cursor = std::io::Cursor::new(&bytes[..Self::SIZE]);
        DmkHeader::read(&mut cursor)
            .map_err(|e| DiskforgeError::InvalidImage(format!("malformed DMK header: {e}")))
    }

    pub fn write_protected(&self) -> bool {
        self.write_protect_raw != 0
    }

    pub fn flags(&self) -> DmkOptionFlags {
        DmkOptionFlags::from_bits_truncate(self.flags_raw)
    }

    pub fn single_sided(&self) -> bool {
        self.flags().contains(DmkOptionFlags::SINGLE_SIDED)
    }

    pub fn heads(&self) -> u8 {
        if self.single_sided() {
            1
        }
        else {
            2
        }
    }

    pub fn single_density(&self) -> bool {
        self.flags().contains(DmkOptionFlags::SINGLE_DENSITY)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = if self.write_protect_raw != 0 { 0xFF } else { 0x00 };
        out[1] = self.track_count;
        out[2..4].copy_from_slice(&self.track_length.to_le_bytes());
        out[4] = self.flags_raw;
        out[5] = self.quirks;
        out[12..16].copy_from_slice(&self.native_magic.to_le_bytes());
        out
    }

    /// Build a fresh header for a new image.
    pub fn new(track_count: u8, track_length: u16, flags: DmkOptionFlags, write_protected: bool) -> Self {
        DmkHeader {
            write_protect_raw: if write_protected { 0xFF } else { 0x00 },
            track_count,
            track_length,
            flags_raw: flags.bits(),
            quirks: 0,
            native_magic: 0,
        }
    }
}
