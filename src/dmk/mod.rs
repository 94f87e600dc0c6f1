/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! DMK: a variable-length-track MFM/FM disk image format used by TRS-80
//! and CP/M controllers (spec §4.4, §6).

pub mod header;
pub mod sector;
pub mod track;

pub use header::{DmkHeader, DmkOptionFlags};
pub use sector::{sector_data_len, Sector, SizeMode};
pub use track::{
    extract_sectors, parse_idam_table, write_track, IdamEntry, SectorWriteSpec, TrackDecodeOptions,
    IDAM_TABLE_SIZE,
};

use crate::error::{DiskforgeError, Result};

/// Nominal drive size, used to pick a default track length.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriveSize {
    FiveInch,
    EightInch,
}

/// Density, used alongside [`DriveSize`] to pick a default track length.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Density {
    Single,
    Double,
}

/// Default track length in bytes for a (drive size, density) pair. The
/// caller may always override this with an explicit length.
pub fn default_track_length(drive: DriveSize, density: Density) -> u16 {
    match (drive, density) {
        (DriveSize::FiveInch, Density::Single) => 0x0CC0,
        (DriveSize::FiveInch, Density::Double) => 0x1900,
        (DriveSize::EightInch, Density::Single) => 0x14E0,
        (DriveSize::EightInch, Density::Double) => 0x2940,
    }
}

/// A fully parsed DMK image: header plus one raw track block per
/// (track, side), with sectors derived lazily via [`DmkImage::sectors`].
#[derive(Clone, Debug)]
pub struct DmkImage {
    pub header: DmkHeader,
    /// Raw bytes of each track block, in physical order: all sides of
    /// track 0, then all sides of track 1, etc.
    pub tracks: Vec<Vec<u8>>,
    pub decode_opts: TrackDecodeOptions,
}

impl DmkImage {
    /// Parse a complete DMK image from its raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = DmkHeader::parse(bytes)?;
        let heads = header.heads() as usize;
        let track_len = header.track_length as usize;
        let n_blocks = header.track_count as usize * heads;

        let mut tracks = Vec::with_capacity(n_blocks);
        let mut pos = DmkHeader::SIZE;
        for _ in 0..n_blocks {
            let end = pos + track_len;
            if end > bytes.len() {
                return Err(DiskforgeError::InvalidImage(format!(
                    "DMK image truncated: expected {n_blocks} track blocks of {track_len} bytes"
                )));
            }
            tracks.push(bytes[pos..end].to_vec());
            pos = end;
        }

        Ok(DmkImage {
            header,
            tracks,
            decode_opts: TrackDecodeOptions {
                rx02: header.flags().contains(DmkOptionFlags::RX02),
                wd1771_non_ibm: false,
                dam_scan_window: 0,
            },
        })
    }

    /// Derived sector records for track block `index` (physical order, see
    /// [`DmkImage::tracks`]).
    pub fn sectors(&self, index: usize) -> Result<Vec<Sector>> {
        let block = self
            .tracks
            .get(index)
            .ok_or_else(|| DiskforgeError::InvalidInput(format!("no such track block {index}")))?;
        Ok(extract_sectors(block, self.header.track_length as usize, &self.decode_opts))
    }

    /// Serialize the image back to bytes (header + all track blocks).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DmkHeader::SIZE + self.tracks.iter().map(Vec::len).sum::<usize>());
        out.extend_from_slice(&self.header.to_bytes());
        for track in &self.tracks {
            out.extend_from_slice(track);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_truncated_image() {
        let mut bytes = vec![0u8; DmkHeader::SIZE];
        bytes[1] = 1; // one track
        bytes[2..4].copy_from_slice(&100u16.to_le_bytes());
        bytes[4] = DmkOptionFlags::SINGLE_SIDED.bits();
        // No track body bytes follow -> truncated.
        assert!(DmkImage::parse(&bytes).is_err());
    }

    #[test]
    fn parse_accepts_well_formed_single_track_image() {
        let track_len = 200usize;
        let mut bytes = vec![0u8; DmkHeader::SIZE];
        bytes[1] = 1;
        bytes[2..4].copy_from_slice(&(track_len as u16).to_le_bytes());
        bytes[4] = DmkOptionFlags::SINGLE_SIDED.bits();
        bytes.extend(vec![0u8; track_len]);

        let image = DmkImage::parse(&bytes).unwrap();
        assert_eq!(image.tracks.len(), 1);
        assert_eq!(image.header.heads(), 1);
    }

    #[test]
    fn default_track_length_table_has_distinct_entries() {
        let a = default_track_length(DriveSize::FiveInch, Density::Double);
        let b = default_track_length(DriveSize::EightInch, Density::Double);
        assert_ne!(a, b);
    }
}
