/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! D64 disk geometry: track/sector layout and file-size variant detection
//! (spec §4.6 "Geometry", §6 "D64 image layout").

use crate::error::{DiskforgeError, Result};

/// Sectors-per-track for every 1541-family track, 1-indexed at `[0]`
/// (track 0 is never used; a 42-entry table per spec, though D64 images
/// only ever span tracks 1-40).
const SECTORS_PER_TRACK_TABLE: [u8; 43] = [
    0, // unused index 0
    21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, // 1-17
    19, 19, 19, 19, 19, 19, 19, // 18-24
    18, 18, 18, 18, 18, 18, // 25-30
    17, 17, 17, 17, 17, 17, 17, 17, 17, 17, 17, 17, // 31-42
];

/// The four file sizes a D64 image is recognized from (spec §4.6
/// "Geometry").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum D64Variant {
    /// 174,848 bytes: 35 tracks, no error-info bytes.
    Standard35,
    /// 175,531 bytes: 35 tracks plus one error-info byte per sector.
    Standard35WithErrors,
    /// 196,608 bytes: 40 tracks, no error-info bytes.
    Extended40,
    /// 197,376 bytes: 40 tracks plus one error-info byte per sector.
    Extended40WithErrors,
}

impl D64Variant {
    pub fn track_count(self) -> u8 {
        match self {
            D64Variant::Standard35 | D64Variant::Standard35WithErrors => 35,
            D64Variant::Extended40 | D64Variant::Extended40WithErrors => 40,
        }
    }

    pub fn has_error_info(self) -> bool {
        matches!(self, D64Variant::Standard35WithErrors | D64Variant::Extended40WithErrors)
    }

    pub fn image_size(self) -> usize {
        let sectors = total_sectors(self.track_count());
        sectors * 256 + if self.has_error_info() { sectors } else { 0 }
    }

    /// Detect the variant from a raw file size; any size not matching one
    /// of the four recognized layouts is rejected.
    pub fn detect(file_size: usize) -> Result<Self> {
        for variant in [
            D64Variant::Standard35,
            D64Variant::Standard35WithErrors,
            D64Variant::Extended40,
            D64Variant::Extended40WithErrors,
        ] {
            if variant.image_size() == file_size {
                return Ok(variant);
            }
        }
        Err(DiskforgeError::InvalidImage(format!(
            "unrecognized D64 file size {file_size}: expected one of 174848, 175531, 196608, 197376"
        )))
    }
}

/// Sectors-per-track for 1-based track `t`. Zero for any `t` outside the
/// table (including `t == 0`).
pub fn sectors_per_track(t: u8) -> u8 {
    SECTORS_PER_TRACK_TABLE.get(t as usize).copied().unwrap_or(0)
}

/// Total sector count across tracks `1..=track_count`.
pub fn total_sectors(track_count: u8) -> usize {
    (1..=track_count).map(|t| sectors_per_track(t) as usize).sum()
}

/// Sum of sectors-per-track strictly before track `t`.
fn cumulative_sectors_before(t: u8) -> usize {
    (1..t).map(|track| sectors_per_track(track) as usize).sum()
}

/// Byte offset of sector `(t, s)` within the image buffer. Fails if `s`
/// is not a valid sector index for track `t`.
pub fn sector_offset(t: u8, s: u8) -> Result<usize> {
    let per_track = sectors_per_track(t);
    if per_track == 0 || s >= per_track {
        return Err(DiskforgeError::InvalidInput(format!(
            "invalid sector ({t}, {s}): track has {per_track} sectors"
        )));
    }
    Ok((cumulative_sectors_before(t) + s as usize) * 256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_all_four_variants() {
        assert_eq!(D64Variant::detect(174_848).unwrap(), D64Variant::Standard35);
        assert_eq!(D64Variant::detect(175_531).unwrap(), D64Variant::Standard35WithErrors);
        assert_eq!(D64Variant::detect(196_608).unwrap(), D64Variant::Extended40);
        assert_eq!(D64Variant::detect(197_376).unwrap(), D64Variant::Extended40WithErrors);
    }

    #[test]
    fn rejects_unrecognized_size() {
        assert!(D64Variant::detect(123_456).is_err());
    }

    #[test]
    fn sectors_per_track_matches_known_bands() {
        assert_eq!(sectors_per_track(1), 21);
        assert_eq!(sectors_per_track(17), 21);
        assert_eq!(sectors_per_track(18), 19);
        assert_eq!(sectors_per_track(24), 19);
        assert_eq!(sectors_per_track(25), 18);
        assert_eq!(sectors_per_track(30), 18);
        assert_eq!(sectors_per_track(31), 17);
        assert_eq!(sectors_per_track(40), 17);
    }

    #[test]
    fn sector_offset_rejects_out_of_range_sector() {
        assert!(sector_offset(1, 21).is_err());
        assert!(sector_offset(1, 20).is_ok());
    }

    /// Geometry round-trip property (spec §8 property 1): for every valid
    /// `(t, s)`, `sector_offset(t, s) / 256` equals the cumulative sector
    /// count preceding `(t, s)`.
    #[test]
    fn geometry_round_trip_over_full_range() {
        for t in 1..=40u8 {
            for s in 0..sectors_per_track(t) {
                let offset = sector_offset(t, s).unwrap();
                assert_eq!(offset / 256, cumulative_sectors_before(t) + s as usize);
            }
        }
    }
}
