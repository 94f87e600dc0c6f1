/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Longtrack protection family detection (spec §4.10).
//!
//! All of these schemes share one trick: write a track longer than a
//! standard drive can produce, so a naive copy that trims it to the
//! nominal length breaks a checksum. They differ in sync word, minimum
//! length, and what fills the extra space; several publishers' variants
//! share a sync word and are disambiguated only by an ASCII signature or
//! by length range, which is why detection must run in a fixed priority
//! order rather than independently per type.

use super::{find_sync16, find_sync32};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, strum::Display)]
pub enum LongtrackKind {
    #[default]
    Unknown,
    Protec,
    Protoscan,
    Tiertex,
    Silmarils,
    Infogrames,
    Prolance,
    App,
    SevenCities,
    SuperMethaneBros,
    Empty,
    Zeroes,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, strum::Display, strum::EnumIter)]
pub enum Confidence {
    #[default]
    None,
    Possible,
    Likely,
    Certain,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum SyncWidth {
    Bits16(u16),
    Bits32(u32),
}

struct LongtrackDef {
    kind: LongtrackKind,
    sync: Option<SyncWidth>,
    alt_sync: Option<SyncWidth>,
    min_bits: usize,
    max_bits: Option<usize>,
    pattern_byte: Option<u8>,
    match_pct_threshold: Option<f64>,
    signature: Option<&'static [u8]>,
    signature_excludes: bool,
}

/// The 11-entry definition table, in the exact priority order the
/// original detector dispatches: Silmarils and Infogrames share a sync
/// word and are told apart only by the "ROD0" signature, so Silmarils
/// (which requires it) must be tried first. `Empty` and `Zeroes` close
/// the table as syncless, whole-track fallbacks for an overlength track
/// that fills almost entirely with one filler byte but matches none of
/// the named publisher schemes above them.
const DEFS: &[LongtrackDef] = &[
    LongtrackDef {
        kind: LongtrackKind::Protec,
        sync: Some(SyncWidth::Bits16(0x4454)),
        alt_sync: None,
        min_bits: 107_200,
        max_bits: None,
        pattern_byte: Some(0x33),
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Silmarils,
        sync: Some(SyncWidth::Bits16(0xA144)),
        alt_sync: None,
        min_bits: 104_128,
        max_bits: None,
        pattern_byte: None,
        match_pct_threshold: None,
        signature: Some(b"ROD0"),
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Infogrames,
        sync: Some(SyncWidth::Bits16(0xA144)),
        alt_sync: None,
        min_bits: 104_128,
        max_bits: None,
        pattern_byte: None,
        match_pct_threshold: None,
        signature: Some(b"ROD0"),
        signature_excludes: true,
    },
    LongtrackDef {
        kind: LongtrackKind::App,
        sync: Some(SyncWidth::Bits16(0x924A)),
        alt_sync: None,
        min_bits: 110_000,
        max_bits: None,
        pattern_byte: Some(0xDC),
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Prolance,
        sync: Some(SyncWidth::Bits16(0x8945)),
        alt_sync: None,
        min_bits: 109_152,
        max_bits: None,
        pattern_byte: None,
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Tiertex,
        sync: Some(SyncWidth::Bits32(0x4124_4124)),
        alt_sync: None,
        min_bits: 99_328,
        max_bits: Some(103_680),
        pattern_byte: Some(0x00),
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Protoscan,
        sync: Some(SyncWidth::Bits32(0x4124_4124)),
        alt_sync: None,
        min_bits: 102_400,
        max_bits: None,
        pattern_byte: Some(0x00),
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::SevenCities,
        sync: Some(SyncWidth::Bits16(0x9251)),
        alt_sync: Some(SyncWidth::Bits16(0x924A)),
        min_bits: 101_500,
        max_bits: None,
        pattern_byte: None,
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::SuperMethaneBros,
        sync: Some(SyncWidth::Bits32(0x9999_9999)),
        alt_sync: None,
        min_bits: 105_500 / 2,
        max_bits: None,
        pattern_byte: None,
        match_pct_threshold: None,
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Empty,
        sync: None,
        alt_sync: None,
        min_bits: STANDARD_TRACK_BITS + 1,
        max_bits: None,
        pattern_byte: Some(0xFF),
        match_pct_threshold: Some(90.0),
        signature: None,
        signature_excludes: false,
    },
    LongtrackDef {
        kind: LongtrackKind::Zeroes,
        sync: None,
        alt_sync: None,
        min_bits: STANDARD_TRACK_BITS + 1,
        max_bits: None,
        pattern_byte: Some(0x00),
        match_pct_threshold: Some(90.0),
        signature: None,
        signature_excludes: false,
    },
];

/// Histogram + dominant-byte analysis of a (possibly partial) byte
/// window, used both to confirm a definition's pattern byte and as the
/// generic Empty/Zeroes fallback.
#[derive(Clone, Debug, Default)]
pub struct PatternAnalysis {
    pub dominant_byte: u8,
    pub match_pct: f64,
    pub region_start: usize,
    pub region_len: usize,
}

const ANALYZE_WINDOW: usize = 1000;
const MIN_PATTERN_REGION: usize = 100;

/// Find the most common byte in up to [`ANALYZE_WINDOW`] bytes starting
/// at `start`, and the length of the longest contiguous run matching it.
pub fn analyze_pattern(data: &[u8], start: usize) -> PatternAnalysis {
    let end = (start + ANALYZE_WINDOW).min(data.len());
    if start >= end {
        return PatternAnalysis::default();
    }
    let window = &data[start..end];

    let mut counts = [0u32; 256];
    for &b in window {
        counts[b as usize] += 1;
    }
    let (dominant_byte, count) =
        counts.iter().enumerate().max_by_key(|&(_, &c)| c).map(|(b, &c)| (b as u8, c)).unwrap_or((0, 0));
    let match_pct = count as f64 / window.len() as f64 * 100.0;

    let mut best_start = 0usize;
    let mut best_len = 0usize;
    let mut run_start = 0usize;
    let mut run_len = 0usize;
    for (i, &b) in window.iter().enumerate() {
        if b == dominant_byte {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len > best_len {
                best_len = run_len;
                best_start = run_start;
            }
        }
        else {
            run_len = 0;
        }
    }

    PatternAnalysis { dominant_byte, match_pct, region_start: start + best_start, region_len: best_len }
}

fn find_def_sync(data: &[u8], track_bits: usize, def: &LongtrackDef) -> Option<usize> {
    let primary = match def.sync {
        Some(SyncWidth::Bits16(p)) => find_sync16(data, track_bits, p, 0),
        Some(SyncWidth::Bits32(p)) => find_sync32(data, track_bits, p, 0),
        None => None,
    };
    primary.or_else(|| {
        def.alt_sync.and_then(|alt| match alt {
            SyncWidth::Bits16(p) => find_sync16(data, track_bits, p, 0),
            SyncWidth::Bits32(p) => find_sync32(data, track_bits, p, 0),
        })
    })
}

fn signature_present(data: &[u8], start_byte: usize, signature: &[u8]) -> bool {
    let end = (start_byte + ANALYZE_WINDOW).min(data.len());
    if start_byte >= end {
        return false;
    }
    data[start_byte..end].windows(signature.len()).any(|w| w == signature)
}

/// One definition's hit against one track.
#[derive(Clone, Debug, Default)]
pub struct LongtrackDetection {
    pub detected: bool,
    pub kind: LongtrackKind,
    pub confidence: Confidence,
    pub sync_offset: Option<usize>,
    pub signature_found: bool,
    pub pattern: Option<PatternAnalysis>,
    pub track_bits: usize,
    pub track: u8,
    pub head: u8,
}

/// Maximum number of non-primary candidates [`detect`] reports alongside
/// the primary hit.
pub const MAX_CANDIDATES: usize = 3;

/// Result of running the full definition table against one track: the
/// highest-priority match, plus up to [`MAX_CANDIDATES`] lower-priority
/// definitions the same track also satisfied.
#[derive(Clone, Debug, Default)]
pub struct LongtrackResult {
    pub detected: bool,
    pub primary: LongtrackDetection,
    pub candidates: Vec<LongtrackDetection>,
}

const STANDARD_TRACK_BITS: usize = 100_000;

fn detect_def(data: &[u8], track_bits: usize, def: &LongtrackDef) -> Option<LongtrackDetection> {
    if track_bits < def.min_bits {
        return None;
    }
    if let Some(max) = def.max_bits {
        if track_bits > max {
            return None;
        }
    }

    let sync_offset = find_def_sync(data, track_bits, def);
    if def.sync.is_some() && sync_offset.is_none() {
        return None;
    }

    let signature_found = match (def.signature, sync_offset) {
        (Some(sig), Some(bit_off)) => signature_present(data, bit_off / 8, sig),
        _ => false,
    };
    if def.signature.is_some() {
        if def.signature_excludes && signature_found {
            return None;
        }
        if !def.signature_excludes && !signature_found {
            return None;
        }
    }

    let pattern_start = sync_offset.map(|bit_off| bit_off / 8).unwrap_or(0);
    let pattern = if def.pattern_byte.is_some() || def.match_pct_threshold.is_some() {
        Some(analyze_pattern(data, pattern_start))
    }
    else {
        None
    };
    let pattern_match_pct = pattern.as_ref().map(|p| p.match_pct).unwrap_or(0.0);
    let pattern_ok = match (def.pattern_byte, def.match_pct_threshold) {
        (Some(expected), Some(threshold)) => pattern.as_ref().is_some_and(|p| p.dominant_byte == expected && p.match_pct > threshold),
        (Some(expected), None) => pattern.as_ref().is_some_and(|p| p.dominant_byte == expected && p.region_len >= MIN_PATTERN_REGION),
        (None, _) => true,
    };

    if sync_offset.is_none() && def.pattern_byte.is_none() && def.signature.is_none() {
        return None;
    }
    if def.pattern_byte.is_some() && !pattern_ok {
        return None;
    }

    let confidence = if def.sync.is_none() {
        // Empty/Zeroes: a whole-track fill pattern carries no sync to
        // anchor a Certain verdict, however dominant the fill byte is.
        Confidence::Likely
    }
    else if signature_found || pattern_match_pct > 80.0 {
        Confidence::Certain
    }
    else if sync_offset.is_some() {
        Confidence::Likely
    }
    else {
        Confidence::Possible
    };

    Some(LongtrackDetection {
        detected: true,
        kind: def.kind,
        confidence,
        sync_offset,
        signature_found,
        pattern,
        track_bits,
        track: 0,
        head: 0,
    })
}

/// Run the priority-ordered definition table against one track. Every
/// definition that matches is kept, in table order; the first is the
/// primary result and up to [`MAX_CANDIDATES`] further matches (distinct
/// publisher schemes that happen to also fit, e.g. a shared sync word)
/// are reported as candidates.
pub fn detect(data: &[u8], track_bits: usize, track: u8, head: u8) -> LongtrackResult {
    let mut hits: Vec<LongtrackDetection> = Vec::new();

    for def in DEFS {
        if let Some(mut hit) = detect_def(data, track_bits, def) {
            hit.track = track;
            hit.head = head;
            hits.push(hit);
            if hits.len() > MAX_CANDIDATES {
                break;
            }
        }
    }

    if hits.is_empty() {
        return LongtrackResult {
            detected: false,
            primary: LongtrackDetection { track_bits, track, head, ..Default::default() },
            candidates: Vec::new(),
        };
    }

    let primary = hits.remove(0);
    LongtrackResult { detected: true, primary, candidates: hits }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embed_word16(data: &mut [u8], bit_pos: usize, word: u16) {
        for i in 0..16 {
            let bit = (word >> (15 - i)) & 1;
            let pos = bit_pos + i;
            if bit == 1 {
                data[pos / 8] |= 1 << (7 - (pos % 8));
            }
        }
    }

    #[test]
    fn s8_protec_longtrack_is_certain() {
        let track_bits = 107_500usize;
        let mut data = vec![0u8; track_bits / 8 + 8];
        embed_word16(&mut data, 16, 0x4454);
        // fill ~70% of the analysis window with 0x33 following the sync.
        let fill_start = 16 / 8 + 2;
        for (i, b) in data.iter_mut().enumerate().skip(fill_start).take(ANALYZE_WINDOW) {
            if i % 10 < 7 {
                *b = 0x33;
            }
        }
        let result = detect(&data, track_bits, 10, 0);
        assert_eq!(result.primary.kind, LongtrackKind::Protec);
        assert_eq!(result.primary.confidence, Confidence::Certain);
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn silmarils_wins_priority_over_infogrames_when_signature_present() {
        let track_bits = 105_000usize;
        let mut data = vec![0u8; track_bits / 8 + 16];
        embed_word16(&mut data, 16, 0xA144);
        let sig_pos = 16 / 8 + 4;
        data[sig_pos..sig_pos + 4].copy_from_slice(b"ROD0");
        let result = detect(&data, track_bits, 3, 0);
        assert_eq!(result.primary.kind, LongtrackKind::Silmarils);
    }

    #[test]
    fn infogrames_matches_same_sync_without_signature() {
        let track_bits = 105_000usize;
        let mut data = vec![0u8; track_bits / 8 + 16];
        embed_word16(&mut data, 16, 0xA144);
        let result = detect(&data, track_bits, 3, 0);
        assert_eq!(result.primary.kind, LongtrackKind::Infogrames);
    }

    #[test]
    fn detect_reports_a_lower_priority_match_as_a_candidate() {
        let track_bits = 110_000usize;
        let mut data = vec![0u8; track_bits / 8 + 16];
        embed_word16(&mut data, 16, 0x4454); // Protec sync, highest priority
        for (i, b) in data.iter_mut().enumerate().skip(4).take(ANALYZE_WINDOW) {
            if i % 10 < 7 {
                *b = 0x33;
            }
        }
        embed_word16(&mut data, 40_000, 0x8945); // Prolance sync, elsewhere on the track
        let result = detect(&data, track_bits, 1, 0);
        assert!(result.detected);
        assert_eq!(result.primary.kind, LongtrackKind::Protec);
        assert!(result.candidates.iter().any(|c| c.kind == LongtrackKind::Prolance));
        assert!(result.candidates.len() <= MAX_CANDIDATES);
    }

    #[test]
    fn detect_classifies_overlength_zero_filled_track_as_zeroes() {
        let track_bits = STANDARD_TRACK_BITS + 8_000;
        let data = vec![0u8; track_bits / 8 + 8];
        let result = detect(&data, track_bits, 2, 0);
        assert!(result.detected);
        assert_eq!(result.primary.kind, LongtrackKind::Zeroes);
        assert_eq!(result.primary.confidence, Confidence::Likely);
    }

    #[test]
    fn short_track_is_not_flagged() {
        let track_bits = 90_000usize;
        let data = vec![0u8; track_bits / 8];
        let result = detect(&data, track_bits, 0, 0);
        assert_eq!(result.primary.kind, LongtrackKind::Unknown);
        assert!(!result.detected);
    }

    #[test]
    fn analyze_pattern_finds_dominant_run() {
        let mut data = vec![0u8; 200];
        for b in data.iter_mut().skip(20).take(150) {
            *b = 0xAB;
        }
        let analysis = analyze_pattern(&data, 0);
        assert_eq!(analysis.dominant_byte, 0xAB);
        assert!(analysis.region_len >= 100);
    }
}
