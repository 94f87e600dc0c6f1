/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Derived DMK sector records (spec §3 "DMK sector record").

use crate::histogram::Encoding;

/// Non-standard sizing conventions a controller may have used for the
/// data field length, keyed off the size code N.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SizeMode {
    /// `128 << N`, the normal IBM-compatible convention.
    Standard,
    /// RX02: the data field is double the standard length for the same N.
    Rx02Doubled,
    /// WD1771 "non-IBM" mode: `16 * N` bytes.
    Wd1771NonIbm,
}

/// Compute the data-field length in bytes for size code `n` under `mode`.
pub fn sector_data_len(n: u8, mode: SizeMode) -> usize {
    match mode {
        SizeMode::Standard => 128usize << n,
        SizeMode::Rx02Doubled => (128usize << n) * 2,
        SizeMode::Wd1771NonIbm => 16usize * n as usize,
    }
}

/// A single decoded sector, owning its extracted data bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Sector {
    pub cylinder: u8,
    pub head: u8,
    pub sector: u8,
    /// Size code N; data length is derived via [`sector_data_len`].
    pub size_code: u8,
    pub encoding: Encoding,
    pub deleted: bool,
    /// Byte offset of the ID field within the parent track block.
    pub data_offset: usize,
    pub id_crc_ok: bool,
    pub data_crc_ok: bool,
    pub data: Vec<u8>,
}

impl Sector {
    pub fn is_valid(&self) -> bool {
        self.id_crc_ok && self.data_crc_ok
    }
}
