/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! DMK track codec: IDAM table parsing, sector extraction, and track
//! reconstruction (spec §4.4).

use crate::crc::{crc_ccitt, CRC_INITIAL_FM, CRC_INITIAL_MFM_DATA};
use crate::dmk::sector::{sector_data_len, Sector, SizeMode};
use crate::histogram::Encoding;

/// Maximum IDAM pointers in a track block.
pub const IDAM_TABLE_ENTRIES: usize = 64;
/// Size in bytes of the IDAM offset table at the start of every track block.
pub const IDAM_TABLE_SIZE: usize = IDAM_TABLE_ENTRIES * 2;

const IDAM_DOUBLE_DENSITY_BIT: u16 = 0x8000;
const IDAM_EXTRA_INFO_BIT: u16 = 0x4000;
const IDAM_OFFSET_MASK: u16 = 0x3FFF;

const IDAM_MARK: u8 = 0xFE;
const DAM_MARK: u8 = 0xFB;
const DDAM_MARK: u8 = 0xF8;
const SYNC_BYTE: u8 = 0xA1;
const GAP_BYTE: u8 = 0x4E;

/// How to interpret a sector's size code when extracting/writing data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct TrackDecodeOptions {
    pub rx02: bool,
    pub wd1771_non_ibm: bool,
    /// How many bytes past the ID field to scan for a Data Address Mark.
    pub dam_scan_window: usize,
}

impl TrackDecodeOptions {
    fn size_mode(&self) -> SizeMode {
        if self.rx02 {
            SizeMode::Rx02Doubled
        }
        else if self.wd1771_non_ibm {
            SizeMode::Wd1771NonIbm
        }
        else {
            SizeMode::Standard
        }
    }
}

/// One entry from the 128-byte IDAM offset table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdamEntry {
    pub double_density: bool,
    pub extra_info: bool,
    /// Byte offset into the track block (including the 128-byte IDAM
    /// table itself) at which the ID Address Mark lives.
    pub offset: u16,
}

/// Parse the 128-byte IDAM offset table at the start of a track block.
///
/// Walks up to 64 little-endian pointers, stopping at the first zero
/// pointer. Entries whose offset falls outside `[128, track_length)` are
/// logged and skipped rather than aborting the whole table, since later
/// entries are still useful.
pub fn parse_idam_table(track_block: &[u8], track_length: usize) -> Vec<IdamEntry> {
    let mut entries = Vec::new();
    for i in 0..IDAM_TABLE_ENTRIES {
        let off = i * 2;
        if off + 2 > track_block.len() {
            break;
        }
        let raw = u16::from_le_bytes([track_block[off], track_block[off + 1]]);
        if raw == 0 {
            break;
        }
        let offset = raw & IDAM_OFFSET_MASK;
        if (offset as usize) < IDAM_TABLE_SIZE || offset as usize >= track_length {
            log::warn!("parse_idam_table(): IDAM pointer {offset:#06x} out of range, skipping");
            continue;
        }
        entries.push(IdamEntry {
            double_density: raw & IDAM_DOUBLE_DENSITY_BIT != 0,
            extra_info: raw & IDAM_EXTRA_INFO_BIT != 0,
            offset,
        });
    }
    entries
}

fn read_be16(data: &[u8], pos: usize) -> Option<u16> {
    if pos + 2 > data.len() {
        return None;
    }
    Some(u16::from_be_bytes([data[pos], data[pos + 1]]))
}

/// Extract one sector starting from a parsed IDAM table entry.
///
/// Returns `None` when no Data Address Mark is found within the scan
/// window: per spec, a missing DAM aborts only this sector, not the track.
fn extract_sector(track_block: &[u8], idam: &IdamEntry, opts: &TrackDecodeOptions) -> Option<Sector> {
    let offset = idam.offset as usize;
    let encoding = if idam.double_density { Encoding::Mfm } else { Encoding::Fm };

    if track_block.get(offset).copied() != Some(IDAM_MARK) {
        log::warn!("extract_sector(): no IDAM mark at offset {offset:#06x}");
        return None;
    }
    if offset + 7 > track_block.len() {
        return None;
    }
    let cylinder = track_block[offset + 1];
    let head = track_block[offset + 2];
    let sector = track_block[offset + 3];
    let size_code = track_block[offset + 4];

    let id_bytes = [IDAM_MARK, cylinder, head, sector, size_code];
    let id_seed = match encoding {
        Encoding::Fm => CRC_INITIAL_FM,
        Encoding::Mfm => CRC_INITIAL_MFM_DATA,
    };
    let computed_id_crc = crc_ccitt(&id_bytes, Some(id_seed));
    let stored_id_crc = read_be16(track_block, offset + 5).unwrap_or(!computed_id_crc);
    let id_crc_ok = computed_id_crc == stored_id_crc;

    let scan_start = offset + 7;
    let scan_window = if opts.dam_scan_window == 0 { 50 } else { opts.dam_scan_window };
    let scan_end = (scan_start + scan_window).min(track_block.len());

    let mut found: Option<(usize, bool)> = None; // (mark_offset, deleted)
    let mut p = scan_start;
    while p < scan_end {
        let is_mfm_sync = matches!(encoding, Encoding::Mfm)
            && p + 3 < track_block.len()
            && track_block[p] == SYNC_BYTE
            && track_block[p + 1] == SYNC_BYTE
            && track_block[p + 2] == SYNC_BYTE;
        if is_mfm_sync {
            match track_block.get(p + 3) {
                Some(&DAM_MARK) => {
                    found = Some((p + 3, false));
                    break;
                }
                Some(&DDAM_MARK) => {
                    found = Some((p + 3, true));
                    break;
                }
                _ => {}
            }
        }
        else if matches!(encoding, Encoding::Fm) {
            match track_block.get(p) {
                Some(&DAM_MARK) => {
                    found = Some((p, false));
                    break;
                }
                Some(&DDAM_MARK) => {
                    found = Some((p, true));
                    break;
                }
                _ => {}
            }
        }
        p += 1;
    }

    let (mark_offset, deleted) = found?;
    let data_start = mark_offset + 1;
    let data_len = sector_data_len(size_code, opts.size_mode());
    let available = track_block.len().saturating_sub(data_start);
    let copy_len = data_len.min(available);
    let data = track_block[data_start..data_start + copy_len].to_vec();

    let mark_byte = if deleted { DDAM_MARK } else { DAM_MARK };
    let mut data_crc_input = Vec::with_capacity(data.len() + 1);
    data_crc_input.push(mark_byte);
    data_crc_input.extend_from_slice(&data);
    let data_seed = match encoding {
        Encoding::Fm => CRC_INITIAL_FM,
        Encoding::Mfm => CRC_INITIAL_MFM_DATA,
    };
    let computed_data_crc = crc_ccitt(&data_crc_input, Some(data_seed));
    let stored_data_crc = read_be16(track_block, data_start + copy_len).unwrap_or(!computed_data_crc);
    let data_crc_ok = copy_len == data_len && computed_data_crc == stored_data_crc;

    Some(Sector {
        cylinder,
        head,
        sector,
        size_code,
        encoding,
        deleted,
        data_offset: offset,
        id_crc_ok,
        data_crc_ok,
        data,
    })
}

/// Parse the IDAM table and extract every sector from a raw track block.
///
/// A sector whose DAM is never found is silently dropped from the result,
/// per spec: that aborts the sector, not the track.
pub fn extract_sectors(track_block: &[u8], track_length: usize, opts: &TrackDecodeOptions) -> Vec<Sector> {
    let idams = parse_idam_table(track_block, track_length);
    idams
        .iter()
        .filter_map(|idam| extract_sector(track_block, idam, opts))
        .collect()
}

/// Everything needed to lay one sector back into a reconstructed track.
#[derive(Clone, Debug)]
pub struct SectorWriteSpec {
    pub cylinder: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
    pub encoding: Encoding,
    pub deleted: bool,
    pub data: Vec<u8>,
}

const GAP1_LEN: usize = 12;
const GAP2_LEN: usize = 22;
const GAP3_LEN: usize = 24;

/// Emit a complete track block (IDAM table + raw bytes) from a list of
/// sector specs, choosing `track_length` from the caller (spec leaves the
/// exact gap-table selection to the caller/format).
pub fn write_track(specs: &[SectorWriteSpec], track_length: usize, opts: &TrackDecodeOptions) -> Vec<u8> {
    let mut idam_table = [0u16; IDAM_TABLE_ENTRIES];
    let mut body: Vec<u8> = Vec::new();

    for (i, spec) in specs.iter().enumerate().take(IDAM_TABLE_ENTRIES) {
        for _ in 0..GAP1_LEN {
            body.push(GAP_BYTE);
        }
        if matches!(spec.encoding, Encoding::Mfm) {
            body.extend_from_slice(&[SYNC_BYTE, SYNC_BYTE, SYNC_BYTE]);
        }
        let idam_pos = IDAM_TABLE_SIZE + body.len();
        body.push(IDAM_MARK);
        body.push(spec.cylinder);
        body.push(spec.head);
        body.push(spec.sector);
        body.push(spec.size_code);

        let id_bytes = [IDAM_MARK, spec.cylinder, spec.head, spec.sector, spec.size_code];
        let id_seed = match spec.encoding {
            Encoding::Fm => CRC_INITIAL_FM,
            Encoding::Mfm => CRC_INITIAL_MFM_DATA,
        };
        let id_crc = crc_ccitt(&id_bytes, Some(id_seed));
        body.extend_from_slice(&id_crc.to_be_bytes());

        let mut pointer = idam_pos as u16 & IDAM_OFFSET_MASK;
        if matches!(spec.encoding, Encoding::Mfm) {
            pointer |= IDAM_DOUBLE_DENSITY_BIT;
        }
        idam_table[i] = pointer;

        for _ in 0..GAP2_LEN {
            body.push(GAP_BYTE);
        }
        if matches!(spec.encoding, Encoding::Mfm) {
            body.extend_from_slice(&[SYNC_BYTE, SYNC_BYTE, SYNC_BYTE]);
        }
        let mark_byte = if spec.deleted { DDAM_MARK } else { DAM_MARK };
        body.push(mark_byte);
        body.extend_from_slice(&spec.data);

        let mut data_crc_input = Vec::with_capacity(spec.data.len() + 1);
        data_crc_input.push(mark_byte);
        data_crc_input.extend_from_slice(&spec.data);
        let data_seed = match spec.encoding {
            Encoding::Fm => CRC_INITIAL_FM,
            Encoding::Mfm => CRC_INITIAL_MFM_DATA,
        };
        let data_crc = crc_ccitt(&data_crc_input, Some(data_seed));
        body.extend_from_slice(&data_crc.to_be_bytes());

        for _ in 0..GAP3_LEN {
            body.push(GAP_BYTE);
        }
    }

    let mut track_block = Vec::with_capacity(track_length);
    for entry in idam_table {
        track_block.extend_from_slice(&entry.to_le_bytes());
    }
    track_block.extend_from_slice(&body);
    while track_block.len() < track_length {
        track_block.push(GAP_BYTE);
    }
    track_block.truncate(track_length.max(track_block.len()));
    track_block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spec(sector: u8, data: Vec<u8>) -> SectorWriteSpec {
        SectorWriteSpec {
            cylinder: 0,
            head: 0,
            sector,
            size_code: 1,
            encoding: Encoding::Mfm,
            deleted: false,
            data,
        }
    }

    #[test]
    fn write_then_extract_round_trip() {
        let specs = vec![make_spec(1, vec![0xAA; 256]), make_spec(2, vec![0xBB; 256])];
        let track_len = 3000;
        let opts = TrackDecodeOptions::default();
        let block = write_track(&specs, track_len, &opts);
        assert_eq!(block.len(), track_len);

        let sectors = extract_sectors(&block, track_len, &opts);
        assert_eq!(sectors.len(), 2);
        assert!(sectors[0].id_crc_ok);
        assert!(sectors[0].data_crc_ok);
        assert_eq!(sectors[0].data, vec![0xAA; 256]);
        assert_eq!(sectors[1].sector, 2);
        assert!(!sectors[0].deleted);
    }

    #[test]
    fn idam_table_stops_at_zero_pointer() {
        let mut block = vec![0u8; 200];
        block[0..2].copy_from_slice(&(200u16 | IDAM_DOUBLE_DENSITY_BIT).to_le_bytes());
        // Everything after stays zero -> stops immediately after first entry.
        let entries = parse_idam_table(&block, 200);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].offset, 200 & IDAM_OFFSET_MASK);
    }

    #[test]
    fn out_of_range_idam_pointer_is_skipped() {
        let mut block = vec![0u8; 200];
        // Offset 1 is inside the IDAM table itself -> invalid, skip.
        block[0..2].copy_from_slice(&1u16.to_le_bytes());
        block[2..4].copy_from_slice(&(150u16 | IDAM_DOUBLE_DENSITY_BIT).to_le_bytes());
        let entries = parse_idam_table(&block, 200);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].offset, 150);
    }

    #[test]
    fn missing_dam_drops_only_that_sector() {
        let specs = vec![make_spec(1, vec![0xAA; 256])];
        let opts = TrackDecodeOptions::default();
        let mut block = write_track(&specs, 3000, &opts);
        // Corrupt the DAM sync bytes so no mark can be located.
        let idam_offset = IDAM_TABLE_SIZE + GAP1_LEN + 3;
        let dam_search_start = idam_offset + 7 + GAP2_LEN;
        for b in block.iter_mut().skip(dam_search_start).take(60) {
            *b = 0x00;
        }
        let sectors = extract_sectors(&block, 3000, &opts);
        assert!(sectors.is_empty());
    }

    #[test]
    fn deleted_sector_round_trips_deleted_flag() {
        let mut spec = make_spec(1, vec![0x11; 256]);
        spec.deleted = true;
        let opts = TrackDecodeOptions::default();
        let block = write_track(&[spec], 3000, &opts);
        let sectors = extract_sectors(&block, 3000, &opts);
        assert_eq!(sectors.len(), 1);
        assert!(sectors[0].deleted);
    }
}
