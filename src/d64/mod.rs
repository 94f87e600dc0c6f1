/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! D64: Commodore 1541 disk images -- geometry, BAM, and directory/file
//! operations (spec §4.6, §4.7, §6).

pub mod bam;
pub mod directory;
pub mod geometry;
pub mod petscii;

pub use bam::{AllocateOutcome, BamEntry, BamReport, CrossLink, TrackDiscrepancy};
pub use directory::{D64File, DirEntry, EntryLocation, FileType};
pub use geometry::D64Variant;

use crate::error::{DiskforgeError, Result};
use std::collections::{HashMap, HashSet};

const SECTOR_SIZE: usize = 256;

/// A parsed D64 image: the raw sector data plus the detected size
/// variant. BAM and directory operations all act on this buffer in
/// place.
#[derive(Clone, Debug)]
pub struct D64Image {
    data: Vec<u8>,
    variant: D64Variant,
}

impl D64Image {
    /// Parse a D64 image from raw bytes, detecting its variant from the
    /// buffer length (spec §4.6 "Geometry").
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let variant = D64Variant::detect(bytes.len())?;
        Ok(D64Image { data: bytes.to_vec(), variant })
    }

    /// Create a freshly formatted, empty image: every sector on every
    /// data track free, BAM header populated, and a single (empty)
    /// directory sector linked at (18, 1) (spec §8 scenario S1).
    pub fn create(variant: D64Variant, disk_name: &str, disk_id: &str) -> Self {
        let mut image = D64Image { data: vec![0u8; variant.image_size()], variant };

        for t in 1..=bam::BAM_ENTRY_COUNT as u8 {
            let per_track = geometry::sectors_per_track(t);
            if per_track == 0 {
                continue;
            }
            let mut bitmap = [0u8; 3];
            for s in 0..per_track {
                bitmap[(s / 8) as usize] |= 1 << (s % 8);
            }
            image.write_bam_entry(t, BamEntry { free_count: per_track, bitmap }).expect("valid track");
        }

        {
            let sector = image.sector_mut(bam::BAM_TRACK, bam::BAM_SECTOR).expect("BAM sector in range");
            sector[0] = bam::BAM_TRACK;
            sector[1] = bam::FIRST_DIR_SECTOR;
            sector[2] = b'A';
            sector[3] = 0x00;
            let name_bytes = petscii::ascii_to_petscii_padded(disk_name, 16);
            sector[0x90..0x90 + 16].copy_from_slice(&name_bytes);
            sector[0xA0..0xA2].fill(petscii::PAD_BYTE);
            let id_bytes = petscii::ascii_to_petscii_padded(disk_id, 2);
            sector[0xA2..0xA4].copy_from_slice(&id_bytes);
            sector[0xA4] = petscii::PAD_BYTE;
            sector[0xA5] = b'2';
            sector[0xA6] = b'A';
            sector[0xA7..0xAB].fill(petscii::PAD_BYTE);
        }

        {
            let dir_sector = image.sector_mut(bam::BAM_TRACK, bam::FIRST_DIR_SECTOR).expect("dir sector in range");
            dir_sector.fill(0);
        }

        image.allocate(bam::BAM_TRACK, bam::BAM_SECTOR).expect("BAM sector allocatable");
        image.allocate(bam::BAM_TRACK, bam::FIRST_DIR_SECTOR).expect("dir sector allocatable");

        image
    }

    /// Disk name from the BAM header, converted back to ASCII.
    pub fn disk_name(&self) -> Result<String> {
        let sector = self.sector(bam::BAM_TRACK, bam::BAM_SECTOR)?;
        Ok(petscii::petscii_to_ascii(&sector[0x90..0xA0]))
    }

    /// Disk ID from the BAM header, converted back to ASCII.
    pub fn disk_id(&self) -> Result<String> {
        let sector = self.sector(bam::BAM_TRACK, bam::BAM_SECTOR)?;
        Ok(petscii::petscii_to_ascii(&sector[0xA2..0xA4]))
    }

    /// The two-byte DOS-type field, normally `"2A"`.
    pub fn dos_type(&self) -> Result<String> {
        let sector = self.sector(bam::BAM_TRACK, bam::BAM_SECTOR)?;
        Ok(String::from_utf8_lossy(&sector[0xA5..0xA7]).into_owned())
    }

    /// Count of directory entries that hold a file (excluding free
    /// slots).
    pub fn file_count(&self) -> Result<usize> {
        Ok(self.walk()?.iter().filter(|(_, e)| !e.is_free_slot()).count())
    }

    /// Extract every file on the disk, in directory-chain order (spec §8
    /// scenario S3).
    pub fn extract_all(&self) -> Result<Vec<D64File>> {
        self.walk()?
            .iter()
            .filter(|(_, e)| !e.is_free_slot())
            .map(|(_, e)| self.extract_file(e))
            .collect()
    }

    pub fn variant(&self) -> D64Variant {
        self.variant
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn sector(&self, t: u8, s: u8) -> Result<&[u8]> {
        let off = geometry::sector_offset(t, s)?;
        self.data
            .get(off..off + SECTOR_SIZE)
            .ok_or_else(|| DiskforgeError::InvalidImage(format!("sector ({t}, {s}) falls outside image buffer")))
    }

    fn sector_mut(&mut self, t: u8, s: u8) -> Result<&mut [u8]> {
        let off = geometry::sector_offset(t, s)?;
        let len = self.data.len();
        if off + SECTOR_SIZE > len {
            return Err(DiskforgeError::InvalidImage(format!(
                "sector ({t}, {s}) falls outside image buffer"
            )));
        }
        Ok(&mut self.data[off..off + SECTOR_SIZE])
    }

    // ---- BAM engine (spec §4.6) ----------------------------------------

    fn read_bam_entry(&self, t: u8) -> Result<BamEntry> {
        let bam_sector = self.sector(bam::BAM_TRACK, bam::BAM_SECTOR)?;
        BamEntry::read(bam_sector, t)
            .ok_or_else(|| DiskforgeError::InvalidInput(format!("track {t} has no BAM entry")))
    }

    fn write_bam_entry(&mut self, t: u8, entry: BamEntry) -> Result<()> {
        let bam_sector = self.sector_mut(bam::BAM_TRACK, bam::BAM_SECTOR)?;
        entry.write(bam_sector, t);
        Ok(())
    }

    /// `is_free(t, s)`: out-of-range inputs return `false` rather than an
    /// error (spec §4.6).
    pub fn is_free(&self, t: u8, s: u8) -> bool {
        if s >= geometry::sectors_per_track(t) {
            return false;
        }
        match self.read_bam_entry(t) {
            Ok(entry) => entry.is_free(s),
            Err(_) => false,
        }
    }

    /// `allocate(t, s)`: clears the bit and decrements the free count. An
    /// already-allocated sector returns [`AllocateOutcome::AlreadyAllocated`]
    /// rather than failing.
    pub fn allocate(&mut self, t: u8, s: u8) -> Result<AllocateOutcome> {
        geometry::sector_offset(t, s)?;
        let mut entry = self.read_bam_entry(t)?;
        if !entry.is_free(s) {
            return Ok(AllocateOutcome::AlreadyAllocated);
        }
        entry.set_free(s, false);
        entry.free_count = entry.free_count.saturating_sub(1);
        self.write_bam_entry(t, entry)?;
        Ok(AllocateOutcome::Allocated)
    }

    /// `free(t, s)`: sets the bit and increments the free count.
    /// Idempotent when the sector is already free.
    pub fn free(&mut self, t: u8, s: u8) -> Result<()> {
        geometry::sector_offset(t, s)?;
        let mut entry = self.read_bam_entry(t)?;
        if !entry.is_free(s) {
            entry.set_free(s, true);
            entry.free_count = entry.free_count.saturating_add(1);
            self.write_bam_entry(t, entry)?;
        }
        Ok(())
    }

    fn first_free_sector_on_track(&self, t: u8) -> Option<u8> {
        let entry = self.read_bam_entry(t).ok()?;
        (0..geometry::sectors_per_track(t)).find(|&s| entry.is_free(s))
    }

    /// `allocate_next_free(start_track)`: an expanding ring search
    /// centered on `start_track`, marking the first free sector found
    /// allocated. The standard 1541 caller passes [`bam::BAM_TRACK`] as
    /// `start_track`, which makes this the "ring search outward from
    /// track 18, skipping track 18 itself" policy spec §4.6 describes;
    /// passing a different center lets a caller keep a multi-block file
    /// contiguous by searching outward from its last-allocated track.
    pub fn allocate_next_free(&mut self, start_track: u8) -> Result<(u8, u8)> {
        let max_track = self.variant.track_count();
        for distance in 0..=max_track as i32 {
            let mut candidates = Vec::with_capacity(2);
            if distance == 0 {
                candidates.push(start_track as i32);
            }
            else {
                candidates.push(start_track as i32 - distance);
                candidates.push(start_track as i32 + distance);
            }
            for t in candidates {
                if t < 1 || t > max_track as i32 {
                    continue;
                }
                let t = t as u8;
                if t == bam::BAM_TRACK {
                    continue;
                }
                if let Some(s) = self.first_free_sector_on_track(t) {
                    self.allocate(t, s)?;
                    return Ok((t, s));
                }
            }
        }
        Err(DiskforgeError::Full("no free sectors remain on disk".into()))
    }

    /// Free-block count: sum of per-track free counts excluding the
    /// directory track.
    pub fn free_block_count(&self) -> u32 {
        (1..=bam::BAM_ENTRY_COUNT as u8)
            .filter(|&t| t != bam::BAM_TRACK)
            .filter_map(|t| self.read_bam_entry(t).ok())
            .map(|e| e.free_count as u32)
            .sum()
    }

    /// Validate the BAM against recomputed bitmap popcounts and the
    /// header padding/DOS-type fields (spec §4.6 "Validation").
    pub fn validate_bam(&self) -> Result<BamReport> {
        let mut discrepancies = Vec::new();
        for t in 1..=bam::BAM_ENTRY_COUNT as u8 {
            let entry = self.read_bam_entry(t)?;
            let computed = entry.popcount_valid(t);
            if computed != entry.free_count as u32 {
                discrepancies.push(TrackDiscrepancy {
                    track: t,
                    stored_free_count: entry.free_count,
                    computed_free_count: computed,
                });
            }
        }
        let bam_sector = self.sector(bam::BAM_TRACK, bam::BAM_SECTOR)?;
        let (padding_ok, dos_type_ok) = bam::validate_header_fields(bam_sector);
        Ok(BamReport { track_discrepancies: discrepancies, padding_ok, dos_type_ok })
    }

    /// Reset every track's bitmap to all-free (restricted to valid
    /// sector positions), then re-walk every directory entry's file
    /// chain marking visited blocks allocated, finally re-allocating the
    /// BAM sector and the directory chain itself. The only recovery
    /// action offered for BAM corruption (spec §4.6 "Repair"); returns
    /// the number of blocks (re-)marked allocated.
    pub fn repair_bam(&mut self) -> Result<usize> {
        for t in 1..=bam::BAM_ENTRY_COUNT as u8 {
            let per_track = geometry::sectors_per_track(t);
            if per_track == 0 {
                continue;
            }
            let mut bitmap = [0u8; 3];
            for s in 0..per_track {
                bitmap[(s / 8) as usize] |= 1 << (s % 8);
            }
            self.write_bam_entry(t, BamEntry { free_count: per_track, bitmap })?;
        }

        let mut touched = 0usize;
        let entries = self.walk()?;
        for (_, entry) in &entries {
            if entry.is_free_slot() {
                continue;
            }
            touched += self.mark_chain_allocated(entry.first_track, entry.first_sector)?;
        }

        if self.allocate(bam::BAM_TRACK, bam::BAM_SECTOR)? == AllocateOutcome::Allocated {
            touched += 1;
        }
        for (t, s) in self.directory_sectors()? {
            if self.allocate(t, s)? == AllocateOutcome::Allocated {
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn mark_chain_allocated(&mut self, first_track: u8, first_sector: u8) -> Result<usize> {
        let mut touched = 0;
        let mut t = first_track;
        let mut s = first_sector;
        let mut visited = HashSet::new();
        loop {
            if t == 0 || !visited.insert((t, s)) {
                break;
            }
            if self.allocate(t, s)? == AllocateOutcome::Allocated {
                touched += 1;
            }
            let sector = self.sector(t, s)?;
            let (next_t, next_s) = (sector[0], sector[1]);
            if next_t == 0 {
                break;
            }
            t = next_t;
            s = next_s;
        }
        Ok(touched)
    }

    /// Walk every file chain, recording the directory index that first
    /// claims each block; a second claim is reported as a cross-link
    /// (spec §4.6 "Cross-link detection"). Read-only: never mutates the
    /// image.
    pub fn detect_cross_links(&self) -> Result<Vec<CrossLink>> {
        let entries = self.walk()?;
        let mut owner_of: HashMap<(u8, u8), usize> = HashMap::new();
        let mut cross_links = Vec::new();
        for (idx, (_, entry)) in entries.iter().enumerate() {
            if entry.is_free_slot() {
                continue;
            }
            let mut t = entry.first_track;
            let mut s = entry.first_sector;
            let mut visited_here = HashSet::new();
            loop {
                if t == 0 || !visited_here.insert((t, s)) {
                    break;
                }
                match owner_of.get(&(t, s)) {
                    Some(&first_owner) => {
                        cross_links.push(CrossLink { track: t, sector: s, first_owner, second_owner: idx });
                    }
                    None => {
                        owner_of.insert((t, s), idx);
                    }
                }
                let sector = self.sector(t, s)?;
                let (next_t, next_s) = (sector[0], sector[1]);
                if next_t == 0 {
                    break;
                }
                t = next_t;
                s = next_s;
            }
        }
        Ok(cross_links)
    }

    // ---- Directory / file operations (spec §4.7) -----------------------

    /// Walk the directory chain starting at (18, 1), returning every
    /// entry (including free slots) with its location.
    pub fn walk(&self) -> Result<Vec<(EntryLocation, DirEntry)>> {
        let mut out = Vec::new();
        let mut t = bam::BAM_TRACK;
        let mut s = bam::FIRST_DIR_SECTOR;
        let mut visited = HashSet::new();
        loop {
            if !visited.insert((t, s)) {
                break;
            }
            let sector = self.sector(t, s)?;
            let (next_t, next_s) = (sector[0], sector[1]);
            for slot in 0..directory::ENTRIES_PER_SECTOR {
                let off = 2 + slot * directory::ENTRY_SIZE;
                let entry = DirEntry::parse(&sector[off..off + directory::ENTRY_SIZE]);
                out.push((EntryLocation { track: t, sector: s, slot }, entry));
            }
            if next_t == 0 {
                break;
            }
            t = next_t;
            s = next_s;
        }
        Ok(out)
    }

    fn directory_sectors(&self) -> Result<Vec<(u8, u8)>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for (loc, _) in self.walk()? {
            if seen.insert((loc.track, loc.sector)) {
                out.push((loc.track, loc.sector));
            }
        }
        Ok(out)
    }

    /// Look up a file by ASCII name, converting to PETSCII and comparing
    /// the full 16-byte padded field (spec §4.7 "Lookup by name").
    pub fn lookup_by_name(&self, ascii_name: &str) -> Result<Option<(EntryLocation, DirEntry)>> {
        for (loc, entry) in self.walk()? {
            if !entry.is_free_slot() && entry.matches_name(ascii_name) {
                return Ok(Some((loc, entry)));
            }
        }
        Ok(None)
    }

    fn read_entry(&self, loc: EntryLocation) -> Result<DirEntry> {
        let sector = self.sector(loc.track, loc.sector)?;
        let off = 2 + loc.slot * directory::ENTRY_SIZE;
        Ok(DirEntry::parse(&sector[off..off + directory::ENTRY_SIZE]))
    }

    fn write_entry(&mut self, loc: EntryLocation, entry: &DirEntry) -> Result<()> {
        let sector = self.sector_mut(loc.track, loc.sector)?;
        let off = 2 + loc.slot * directory::ENTRY_SIZE;
        sector[off..off + directory::ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        Ok(())
    }

    /// Extract a file's data from its directory entry (spec §4.7
    /// "Extract file"). For PRG files the first two bytes of the
    /// concatenated stream are recognized as a little-endian load
    /// address.
    pub fn extract_file(&self, entry: &DirEntry) -> Result<D64File> {
        let file_type = entry
            .file_type()
            .ok_or_else(|| DiskforgeError::InvalidImage("directory entry has unrecognized file type".into()))?;

        let mut data = Vec::new();
        let mut t = entry.first_track;
        let mut s = entry.first_sector;
        let mut visited = HashSet::new();
        loop {
            if !visited.insert((t, s)) {
                return Err(DiskforgeError::InvalidImage("file chain loop detected".into()));
            }
            let sector = self.sector(t, s)?;
            let (next_t, next_s) = (sector[0], sector[1]);
            if next_t == 0 {
                let used = (next_s as usize).saturating_sub(1).min(254);
                data.extend_from_slice(&sector[2..2 + used]);
                break;
            }
            data.extend_from_slice(&sector[2..256]);
            t = next_t;
            s = next_s;
        }

        let load_address =
            if file_type == FileType::Prg && data.len() >= 2 { Some(u16::from_le_bytes([data[0], data[1]])) } else { None };

        Ok(D64File {
            name: entry.name_ascii(),
            file_type,
            first_track: entry.first_track,
            first_sector: entry.first_sector,
            data,
            load_address,
        })
    }

    fn find_free_directory_slot(&self) -> Result<Option<EntryLocation>> {
        for (loc, entry) in self.walk()? {
            if entry.is_free_slot() {
                return Ok(Some(loc));
            }
        }
        Ok(None)
    }

    fn allocate_directory_sector(&mut self) -> Result<(u8, u8)> {
        let sectors = self.directory_sectors()?;
        let last = *sectors
            .last()
            .ok_or_else(|| DiskforgeError::InvalidImage("directory chain is empty".into()))?;

        let per_track = geometry::sectors_per_track(bam::BAM_TRACK);
        let found = (1..per_track).find(|&s| self.is_free(bam::BAM_TRACK, s));
        let s = found.ok_or_else(|| DiskforgeError::Full("directory full".into()))?;

        self.allocate(bam::BAM_TRACK, s)?;
        self.sector_mut(bam::BAM_TRACK, s)?.fill(0);
        let prev = self.sector_mut(last.0, last.1)?;
        prev[0] = bam::BAM_TRACK;
        prev[1] = s;
        Ok((bam::BAM_TRACK, s))
    }

    /// Insert a new file (spec §4.7 "Insert file"). Fails with
    /// [`DiskforgeError::Exists`] before allocating anything when
    /// `overwrite == false` and the name is already taken; fails with
    /// [`DiskforgeError::Full`] ("directory full" or disk-full) with all
    /// partial allocations undone.
    pub fn insert_file(&mut self, name: &str, file_type: FileType, data: &[u8], overwrite: bool) -> Result<EntryLocation> {
        if let Some((_, _)) = self.lookup_by_name(name)? {
            if !overwrite {
                return Err(DiskforgeError::Exists(format!("file '{name}' already exists")));
            }
            self.delete_file(name)?;
        }

        let blocks_needed = (data.len() + 253) / 254;
        let blocks_needed = blocks_needed.max(1);

        let mut allocated: Vec<(u8, u8)> = Vec::with_capacity(blocks_needed);
        for _ in 0..blocks_needed {
            match self.allocate_next_free(bam::BAM_TRACK) {
                Ok(pos) => allocated.push(pos),
                Err(e) => {
                    for (t, s) in &allocated {
                        let _ = self.free(*t, *s);
                    }
                    return Err(e);
                }
            }
        }

        let slot_loc = match self.find_free_directory_slot()? {
            Some(loc) => loc,
            None => match self.allocate_directory_sector() {
                Ok((t, s)) => EntryLocation { track: t, sector: s, slot: 0 },
                Err(e) => {
                    for (t, s) in &allocated {
                        let _ = self.free(*t, *s);
                    }
                    return Err(e);
                }
            },
        };

        for (i, &(t, s)) in allocated.iter().enumerate() {
            let start = i * 254;
            let end = ((i + 1) * 254).min(data.len());
            let chunk = &data[start..end];
            let sector = self.sector_mut(t, s)?;
            if i + 1 < allocated.len() {
                let (nt, ns) = allocated[i + 1];
                sector[0] = nt;
                sector[1] = ns;
            }
            else {
                sector[0] = 0;
                sector[1] = (chunk.len() + 1) as u8;
            }
            sector[2..2 + chunk.len()].copy_from_slice(chunk);
            for b in sector[2 + chunk.len()..256].iter_mut() {
                *b = 0;
            }
        }

        let mut filename = [0u8; 16];
        filename.copy_from_slice(&petscii::ascii_to_petscii_padded(name, 16));
        let entry = DirEntry {
            next_track: 0,
            next_sector: 0,
            file_type_raw: file_type.low_bits() | 0x80,
            first_track: allocated[0].0,
            first_sector: allocated[0].1,
            filename,
            rel_track: 0,
            rel_sector: 0,
            record_length: 0,
            block_count: blocks_needed as u16,
        };
        self.write_entry(slot_loc, &entry)?;
        Ok(slot_loc)
    }

    /// Delete a file: free its whole chain and clear the directory
    /// entry's type to DEL (spec §4.7 "Delete").
    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        let (loc, entry) = self
            .lookup_by_name(name)?
            .ok_or_else(|| DiskforgeError::NotFound(format!("file '{name}' not found")))?;

        let mut t = entry.first_track;
        let mut s = entry.first_sector;
        let mut visited = HashSet::new();
        loop {
            if t == 0 || !visited.insert((t, s)) {
                break;
            }
            let sector = self.sector(t, s)?;
            let (next_t, next_s) = (sector[0], sector[1]);
            self.free(t, s)?;
            if next_t == 0 {
                break;
            }
            t = next_t;
            s = next_s;
        }

        let mut cleared = entry;
        cleared.file_type_raw = FileType::Del.low_bits();
        cleared.first_track = 0;
        cleared.first_sector = 0;
        self.write_entry(loc, &cleared)?;
        Ok(())
    }

    /// Rename a file in place (spec §4.7 "Rename / lock").
    pub fn rename_file(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let (loc, mut entry) = self
            .lookup_by_name(old_name)?
            .ok_or_else(|| DiskforgeError::NotFound(format!("file '{old_name}' not found")))?;
        let mut filename = [0u8; 16];
        filename.copy_from_slice(&petscii::ascii_to_petscii_padded(new_name, 16));
        entry.filename = filename;
        self.write_entry(loc, &entry)
    }

    /// Set or clear a file's locked flag in place (spec §4.7 "Rename / lock").
    pub fn set_locked(&mut self, name: &str, locked: bool) -> Result<()> {
        let (loc, mut entry) = self
            .lookup_by_name(name)?
            .ok_or_else(|| DiskforgeError::NotFound(format!("file '{name}' not found")))?;
        entry.set_locked(locked);
        self.write_entry(loc, &entry)
    }
}
