/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Copy-protection detection and classification (spec §4.8-§4.11).
//!
//! Three analyzers -- [`copylock`], [`speedlock`], and [`longtrack`] --
//! each target one family of scheme. [`detect_platform`] and
//! [`analyze_track`] tie them together into the unified classifier that
//! a caller actually drives: identify what kind of disk this track came
//! from, then run every analyzer relevant to that platform and merge the
//! results into one [`ProtectionAnalysis`].

pub mod copylock;
pub mod database;
pub mod longtrack;
pub mod speedlock;

pub use copylock::CopylockResult;
pub use database::ProtectionDbEntry;
pub use longtrack::{LongtrackDetection, LongtrackResult};
pub use speedlock::SpeedlockResult;

use crate::bits::{dword_at_bit, word_at_bit};

/// Source platform a track was captured from, as guessed from its raw
/// bit length and sync-word content alone (spec §4.11 "platform
/// detection").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, strum::Display, strum::EnumIter)]
pub enum Platform {
    Amiga,
    C64,
    Apple2,
    Pc,
    #[default]
    Unknown,
}

/// Broad mechanism a protection scheme relies on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum ProtectionCategory {
    LfsrEncoded,
    VariableDensity,
    Longtrack,
    GcrTiming,
    CustomFormat,
    WeakBits,
}

/// Every protection scheme this crate's database knows about, whether or
/// not it has a live detector (spec §F: undetected types still carry
/// honest metadata).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, strum::Display, strum::EnumIter)]
pub enum ProtectionType {
    Copylock,
    CopylockOld,
    Speedlock,
    LongtrackProtec,
    LongtrackProtoscan,
    LongtrackTiertex,
    LongtrackSilmarils,
    LongtrackInfogrames,
    LongtrackProlance,
    LongtrackApp,
    LongtrackSevenCities,
    LongtrackSuperMethaneBros,
    VmaxV1,
    RapidlokV1,
    AppleSpiralDos,
    WeakSector,
    #[default]
    Unknown,
}

/// One confirmed hit, merging an analyzer's raw result with the static
/// [`database`] metadata for its type.
#[derive(Clone, Debug)]
pub struct ProtectionDetection {
    pub protection_type: ProtectionType,
    pub name: &'static str,
    pub variant: String,
    pub category: ProtectionCategory,
    pub confidence_pct: u8,
    pub track: u8,
    pub head: u8,
    pub requires_timing: bool,
    pub requires_flux: bool,
    pub reconstructable: bool,
    pub seed: Option<u32>,
}

const MAX_DETECTIONS: usize = 16;

/// Aggregate classifier result for a run of tracks (spec §6 report
/// shape).
#[derive(Clone, Debug, Default)]
pub struct ProtectionAnalysis {
    pub platform: Platform,
    pub is_protected: bool,
    pub tracks_analyzed: u32,
    pub tracks_protected: u32,
    pub all_reconstructable: bool,
    pub detections: Vec<ProtectionDetection>,
    /// The highest-confidence entry in `detections`, or `None` when the
    /// track (or run of tracks) carries no detection at all.
    pub primary: Option<ProtectionDetection>,
}

/// Pick the highest-`confidence_pct` detection, the earliest one on a tie.
fn select_primary(detections: &[ProtectionDetection]) -> Option<ProtectionDetection> {
    let mut best: Option<&ProtectionDetection> = None;
    for d in detections {
        let beats_current = match best {
            Some(b) => d.confidence_pct > b.confidence_pct,
            None => true,
        };
        if beats_current {
            best = Some(d);
        }
    }
    best.cloned()
}

/// Scan `data` for a 16-bit sync word at 8-bit (byte) stride, the
/// granularity the original protection detectors use: unlike the raw
/// MFM/FM bitstream decoder, protection sync words are located in
/// already-aligned decoded track bytes.
pub fn find_sync16(data: &[u8], total_bits: usize, pattern: u16, start_bit: usize) -> Option<usize> {
    if total_bits < 16 {
        return None;
    }
    let last_start = total_bits - 16;
    let mut bit_pos = start_bit;
    while bit_pos <= last_start {
        if word_at_bit(data, bit_pos) == pattern {
            return Some(bit_pos);
        }
        bit_pos += 8;
    }
    None
}

/// 32-bit counterpart of [`find_sync16`].
pub fn find_sync32(data: &[u8], total_bits: usize, pattern: u32, start_bit: usize) -> Option<usize> {
    if total_bits < 32 {
        return None;
    }
    let last_start = total_bits - 32;
    let mut bit_pos = start_bit;
    while bit_pos <= last_start {
        if dword_at_bit(data, bit_pos) == pattern {
            return Some(bit_pos);
        }
        bit_pos += 8;
    }
    None
}

const AMIGA_MIN_BITS: usize = 100_000;
const AMIGA_MAX_BITS: usize = 120_000;
const AMIGA_SYNC: u16 = 0x4489;

const GCR_MIN_BITS: usize = 40_000;
const GCR_MAX_BITS: usize = 80_000;
const GCR_SYNC_MIN_HITS: usize = 10;

const APPLE2_MIN_BITS: usize = 48_000;
const APPLE2_MAX_BITS: usize = 56_000;
const APPLE2_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0x96];

const PC_MIN_BITS: usize = 50_000;
const PC_MAX_BITS: usize = 100_000;
const PC_SYNC_MIN_HITS: usize = 9;

fn count_byte_pair(data: &[u8], total_bits: usize, pair: u16) -> usize {
    let mut count = 0;
    let mut start = 0;
    while let Some(pos) = find_sync16(data, total_bits, pair, start) {
        count += 1;
        start = pos + 8;
    }
    count
}

fn count_byte_triplet(data: &[u8], total_bits: usize, triplet: [u8; 3]) -> usize {
    let limit = (total_bits / 8).min(data.len());
    if limit < 3 {
        return 0;
    }
    data[..limit].windows(3).filter(|w| w[0] == triplet[0] && w[1] == triplet[1] && w[2] == triplet[2]).count()
}

/// Guess the source platform of one decoded track from its raw bit
/// length and sync-word content (spec §4.11 heuristics, applied in this
/// exact order: Amiga, C64/GCR, Apple II, PC, else Unknown).
pub fn detect_platform(data: &[u8], track_bits: usize) -> Platform {
    if (AMIGA_MIN_BITS..=AMIGA_MAX_BITS).contains(&track_bits) && find_sync16(data, track_bits, AMIGA_SYNC, 0).is_some()
    {
        return Platform::Amiga;
    }
    if (GCR_MIN_BITS..=GCR_MAX_BITS).contains(&track_bits)
        && count_byte_pair(data, track_bits, 0xFFFF) >= GCR_SYNC_MIN_HITS
    {
        return Platform::C64;
    }
    if (APPLE2_MIN_BITS..=APPLE2_MAX_BITS).contains(&track_bits)
        && count_byte_triplet(data, track_bits, APPLE2_PROLOGUE) > 0
    {
        return Platform::Apple2;
    }
    if (PC_MIN_BITS..=PC_MAX_BITS).contains(&track_bits)
        && count_byte_pair(data, track_bits, 0xA1A1) >= PC_SYNC_MIN_HITS
    {
        return Platform::Pc;
    }
    Platform::Unknown
}

fn merge_db(detection_type: ProtectionType, variant: String, confidence_pct: u8, track: u8, head: u8, seed: Option<u32>) -> ProtectionDetection {
    match database::lookup(detection_type) {
        Some(entry) => ProtectionDetection {
            protection_type: detection_type,
            name: entry.name,
            variant,
            category: entry.category,
            confidence_pct,
            track,
            head,
            requires_timing: entry.requires_timing,
            requires_flux: entry.requires_flux,
            reconstructable: entry.reconstructable,
            seed,
        },
        None => ProtectionDetection {
            protection_type: detection_type,
            name: "Unknown",
            variant,
            category: ProtectionCategory::CustomFormat,
            confidence_pct,
            track,
            head,
            requires_timing: false,
            requires_flux: false,
            reconstructable: false,
            seed,
        },
    }
}

/// Run every analyzer relevant to `platform` against one decoded track
/// and fold any hits into `detections` (spec §4.11 "per-platform
/// aggregation"). `timing_data`, when present, enables the CopyLock
/// timing check and the whole of Speedlock.
fn analyze_track_amiga(
    data: &[u8],
    track_bits: usize,
    timing_data: Option<&[u16]>,
    track: u8,
    head: u8,
    detections: &mut Vec<ProtectionDetection>,
) {
    let cl = copylock::detect(data, track_bits, timing_data, track, head);
    if cl.detected {
        let protection_type = match cl.variant {
            copylock::Variant::Old | copylock::Variant::OldVariant => ProtectionType::CopylockOld,
            _ => ProtectionType::Copylock,
        };
        detections.push(merge_db(
            protection_type,
            cl.variant.to_string(),
            confidence_pct(cl.confidence.as_index(), 3),
            track,
            head,
            cl.lfsr_seed,
        ));
    }

    if let Some(timing) = timing_data {
        let sl = speedlock::detect(timing, track, head);
        if sl.detected {
            detections.push(merge_db(ProtectionType::Speedlock, "standard".to_string(), confidence_pct(sl.confidence as u8, 3), track, head, None));
        }
    }

    let lt = longtrack::detect(data, track_bits, track, head);
    if lt.detected {
        let protection_type = longtrack_protection_type(lt.primary.kind);
        if protection_type != ProtectionType::Unknown {
            detections.push(merge_db(
                protection_type,
                lt.primary.kind.to_string(),
                confidence_pct(lt.primary.confidence as u8, 3),
                track,
                head,
                None,
            ));
        }
    }
}

fn confidence_pct(index: u8, max_index: u8) -> u8 {
    if max_index == 0 {
        0
    }
    else {
        (index as u32 * 100 / max_index as u32) as u8
    }
}

fn longtrack_protection_type(kind: longtrack::LongtrackKind) -> ProtectionType {
    use longtrack::LongtrackKind as K;
    match kind {
        K::Protec => ProtectionType::LongtrackProtec,
        K::Protoscan => ProtectionType::LongtrackProtoscan,
        K::Tiertex => ProtectionType::LongtrackTiertex,
        K::Silmarils => ProtectionType::LongtrackSilmarils,
        K::Infogrames => ProtectionType::LongtrackInfogrames,
        K::Prolance => ProtectionType::LongtrackProlance,
        K::App => ProtectionType::LongtrackApp,
        K::SevenCities => ProtectionType::LongtrackSevenCities,
        K::SuperMethaneBros => ProtectionType::LongtrackSuperMethaneBros,
        K::Empty | K::Zeroes | K::Unknown => ProtectionType::Unknown,
    }
}

/// Analyze one decoded track, detecting its platform and running every
/// analyzer the platform warrants. Apple II and PC tracks are tagged
/// honestly as detected-but-not-analyzed, since this crate carries no
/// deep detector for either (spec §F).
pub fn analyze_track(data: &[u8], track_bits: usize, timing_data: Option<&[u16]>, track: u8, head: u8) -> ProtectionAnalysis {
    let platform = detect_platform(data, track_bits);
    let mut detections = Vec::new();

    match platform {
        Platform::Amiga => analyze_track_amiga(data, track_bits, timing_data, track, head, &mut detections),
        Platform::C64 | Platform::Apple2 | Platform::Pc | Platform::Unknown => {}
    }

    detections.truncate(MAX_DETECTIONS);

    let is_protected = !detections.is_empty();
    let all_reconstructable = is_protected && detections.iter().all(|d| d.reconstructable);
    let primary = select_primary(&detections);

    ProtectionAnalysis {
        platform,
        is_protected,
        tracks_analyzed: 1,
        tracks_protected: if is_protected { 1 } else { 0 },
        all_reconstructable,
        detections,
        primary,
    }
}

/// Merge several single-track [`ProtectionAnalysis`] results (e.g. one
/// per cylinder of an image) into one summary.
pub fn merge_analyses(results: &[ProtectionAnalysis]) -> ProtectionAnalysis {
    let platform = results.iter().find(|r| r.platform != Platform::Unknown).map(|r| r.platform).unwrap_or_default();
    let tracks_analyzed = results.iter().map(|r| r.tracks_analyzed).sum();
    let tracks_protected = results.iter().map(|r| r.tracks_protected).sum();
    let detections: Vec<_> = results.iter().flat_map(|r| r.detections.iter().cloned()).collect();
    let is_protected = tracks_protected > 0;
    let all_reconstructable = is_protected && detections.iter().all(|d| d.reconstructable);
    let primary = select_primary(&detections);

    ProtectionAnalysis { platform, is_protected, tracks_analyzed, tracks_protected, all_reconstructable, detections, primary }
}

/// Render a human-readable text report (spec §6 "text report").
pub fn report_text(analysis: &ProtectionAnalysis) -> String {
    let mut out = String::new();
    out.push_str(&format!("Platform: {}\n", analysis.platform));
    out.push_str(&format!("Protected: {}\n", analysis.is_protected));
    out.push_str(&format!("Tracks analyzed: {}\n", analysis.tracks_analyzed));
    out.push_str(&format!("Tracks protected: {}\n", analysis.tracks_protected));
    out.push_str(&format!("Detections: {}\n", analysis.detections.len()));
    out.push_str(&format!("All reconstructable: {}\n", analysis.all_reconstructable));
    match &analysis.primary {
        Some(p) => out.push_str(&format!("Primary: {} ({}) track {} head {}, confidence {}%\n", p.name, p.variant, p.track, p.head, p.confidence_pct)),
        None => out.push_str("Primary: none\n"),
    }
    for d in &analysis.detections {
        out.push_str(&format!(
            "  - {} ({}) track {} head {}: confidence {}%, timing={}, flux={}, reconstructable={}\n",
            d.name, d.variant, d.track, d.head, d.confidence_pct, d.requires_timing, d.requires_flux, d.reconstructable
        ));
        if let Some(seed) = d.seed {
            out.push_str(&format!("      seed=0x{seed:06X}\n"));
        }
    }
    out
}

#[cfg(feature = "json")]
mod json_report {
    use super::*;
    use serde_json::{json, Value};

    fn detection_json(d: &ProtectionDetection) -> Value {
        let mut obj = json!({
            "name": d.name,
            "variant": d.variant,
            "category": d.category.to_string(),
            "confidence": d.confidence_pct,
            "track": d.track,
            "head": d.head,
            "requires_timing": d.requires_timing,
            "requires_flux": d.requires_flux,
            "reconstructable": d.reconstructable,
        });
        if let Some(seed) = d.seed {
            obj["seed"] = json!(format!("0x{seed:06X}"));
        }
        obj
    }

    pub fn report_json(analysis: &ProtectionAnalysis) -> Value {
        json!({
            "platform": analysis.platform.to_string(),
            "detected_platform": analysis.platform != Platform::Unknown,
            "is_protected": analysis.is_protected,
            "tracks_analyzed": analysis.tracks_analyzed,
            "tracks_protected": analysis.tracks_protected,
            "detection_count": analysis.detections.len(),
            "all_reconstructable": analysis.all_reconstructable,
            "primary": analysis.primary.as_ref().map(detection_json),
            "detections": analysis.detections.iter().map(detection_json).collect::<Vec<_>>(),
            "summary": format!(
                "{} detection(s) on {}/{} tracks",
                analysis.detections.len(),
                analysis.tracks_protected,
                analysis.tracks_analyzed
            ),
        })
    }
}

#[cfg(feature = "json")]
pub use json_report::report_json;

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
    fn find_sync16_only_matches_byte_aligned_positions() {
        let mut data = vec![0u8; 64];
        embed_word16(&mut data, 4, 0xA1A1);
        assert_eq!(find_sync16(&data, 512, 0xA1A1, 0), None);
        embed_word16(&mut data, 16, 0xA1A1);
        assert_eq!(find_sync16(&data, 512, 0xA1A1, 0), Some(16));
    }

    #[test]
    fn detect_platform_identifies_amiga() {
        let mut data = vec![0u8; 14000];
        embed_word16(&mut data, 800, AMIGA_SYNC);
        assert_eq!(detect_platform(&data, 110_000), Platform::Amiga);
    }

    #[test]
    fn detect_platform_identifies_c64_gcr() {
        let mut data = vec![0u8; 7500];
        for i in 0..12 {
            embed_word16(&mut data, i * 400, 0xFFFF);
        }
        assert_eq!(detect_platform(&data, 60_000), Platform::C64);
    }

    #[test]
    fn detect_platform_identifies_apple2() {
        let mut data = vec![0u8; 6500];
        data[100..103].copy_from_slice(&APPLE2_PROLOGUE);
        assert_eq!(detect_platform(&data, 50_000), Platform::Apple2);
    }

    #[test]
    fn detect_platform_falls_back_to_unknown() {
        let data = vec![0u8; 12500];
        assert_eq!(detect_platform(&data, 100_000), Platform::Unknown);
    }

    #[test]
    fn analyze_track_reports_no_protection_on_blank_track() {
        let data = vec![0u8; 14000];
        let analysis = analyze_track(&data, 110_000, None, 0, 0);
        assert!(!analysis.is_protected);
        assert!(analysis.detections.is_empty());
    }

    #[test]
    fn merge_analyses_sums_track_counts() {
        let a = ProtectionAnalysis { platform: Platform::Amiga, tracks_analyzed: 1, tracks_protected: 1, is_protected: true, all_reconstructable: true, detections: vec![], primary: None };
        let b = ProtectionAnalysis { platform: Platform::Unknown, tracks_analyzed: 1, tracks_protected: 0, is_protected: false, all_reconstructable: false, detections: vec![], primary: None };
        let merged = merge_analyses(&[a, b]);
        assert_eq!(merged.tracks_analyzed, 2);
        assert_eq!(merged.tracks_protected, 1);
        assert_eq!(merged.platform, Platform::Amiga);
    }

    #[test]
    fn report_text_includes_platform_and_counts() {
        let analysis = ProtectionAnalysis {
            platform: Platform::Amiga,
            is_protected: true,
            tracks_analyzed: 5,
            tracks_protected: 1,
            all_reconstructable: true,
            detections: vec![],
            primary: None,
        };
        let text = report_text(&analysis);
        assert!(text.contains("Platform: Amiga"));
        assert!(text.contains("Tracks analyzed: 5"));
        assert!(text.contains("Primary: none"));
    }

    #[test]
    fn analyze_track_exposes_the_highest_confidence_detection_as_primary() {
        let a = ProtectionDetection {
            protection_type: ProtectionType::Speedlock,
            name: "Speedlock",
            variant: "standard".to_string(),
            category: ProtectionCategory::VariableDensity,
            confidence_pct: 40,
            track: 0,
            head: 0,
            requires_timing: true,
            requires_flux: true,
            reconstructable: false,
            seed: None,
        };
        let b = ProtectionDetection { protection_type: ProtectionType::Copylock, confidence_pct: 90, ..a.clone() };
        let analysis =
            ProtectionAnalysis { platform: Platform::Amiga, is_protected: true, tracks_analyzed: 1, tracks_protected: 1, all_reconstructable: false, primary: select_primary(&[a, b.clone()]), detections: vec![b.clone()] };
        assert_eq!(analysis.primary.unwrap().protection_type, b.protection_type);
    }
}
