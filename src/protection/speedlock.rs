/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Speedlock variable-density detection (spec §4.9).
//!
//! Speedlock does not change what bytes are on the track; it changes how
//! long each bit-cell takes to write, in a fixed sequence of regions:
//! a long run (~+10% over nominal), then a short run (~-10%), then back
//! to normal. Content alone can never distinguish a Speedlock track from
//! an ordinary one -- this detector requires per-bit timing data.

/// One bit-cell's measured duration, in nanoseconds.
pub type TimingSample = u16;

const LONG_THRESHOLD_PCT: f64 = 108.0;
const SHORT_THRESHOLD_PCT: f64 = 92.0;
const NORMAL_THRESHOLD_PCT: f64 = 98.0;

const BASELINE_SAMPLE_COUNT: usize = 2000;
const REGION_WINDOW: usize = 32;

const EXPECTED_LONG_POSITION: usize = 77_500;
const POSITION_TOLERANCE: usize = 5_000;

/// A region of contiguous bit-cells sharing one timing classification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Normal,
    Long,
    Short,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub start: usize,
    pub len: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, strum::Display, strum::EnumIter)]
pub enum Confidence {
    #[default]
    None,
    Possible,
    Likely,
    Certain,
}

/// Speedlock detection result for one track.
#[derive(Clone, Debug, Default)]
pub struct SpeedlockResult {
    pub detected: bool,
    pub confidence: Confidence,
    pub baseline_ns: f64,
    pub regions: Vec<Region>,
    pub valid_sequence: bool,
    pub valid_position: bool,
    pub timing_matches: u8,
    pub track: u8,
    pub head: u8,
}

/// Mean and population standard deviation of the first
/// [`BASELINE_SAMPLE_COUNT`] timing samples, used as the track's nominal
/// bit-cell duration.
pub fn calc_baseline(timing_data: &[TimingSample]) -> (f64, f64) {
    let n = timing_data.len().min(BASELINE_SAMPLE_COUNT);
    if n == 0 {
        return (0.0, 0.0);
    }
    let samples = &timing_data[..n];
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
    let variance = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance.sqrt())
}

/// Percentage of `sample` relative to `baseline_ns`.
pub fn measure_ratio(sample: f64, baseline_ns: f64) -> f64 {
    if baseline_ns <= 0.0 {
        return 100.0;
    }
    sample / baseline_ns * 100.0
}

fn classify(pct: f64) -> RegionKind {
    if pct >= LONG_THRESHOLD_PCT {
        RegionKind::Long
    }
    else if pct <= SHORT_THRESHOLD_PCT {
        RegionKind::Short
    }
    else if (NORMAL_THRESHOLD_PCT..LONG_THRESHOLD_PCT).contains(&pct) || pct <= NORMAL_THRESHOLD_PCT {
        RegionKind::Normal
    }
    else {
        RegionKind::Normal
    }
}

/// Sweep a sliding window of [`REGION_WINDOW`] samples across the track
/// and merge consecutive windows sharing a classification into regions.
pub fn find_regions(timing_data: &[TimingSample], baseline_ns: f64) -> Vec<Region> {
    if timing_data.len() < REGION_WINDOW || baseline_ns <= 0.0 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut pos = 0;
    while pos + REGION_WINDOW <= timing_data.len() {
        let window = &timing_data[pos..pos + REGION_WINDOW];
        let avg = window.iter().map(|&s| s as f64).sum::<f64>() / REGION_WINDOW as f64;
        let pct = measure_ratio(avg, baseline_ns);
        windows.push((pos, classify(pct)));
        pos += REGION_WINDOW;
    }

    let mut regions: Vec<Region> = Vec::new();
    for (start, kind) in windows {
        match regions.last_mut() {
            Some(r) if r.kind == kind => r.len += REGION_WINDOW,
            _ => regions.push(Region { kind, start, len: REGION_WINDOW }),
        }
    }
    regions
}

/// Verify the region sequence contains at least one Long region strictly
/// before a Short region (spec §4.9 "valid sequence").
pub fn verify_sequence(regions: &[Region]) -> bool {
    let long_pos = regions.iter().find(|r| r.kind == RegionKind::Long).map(|r| r.start);
    let short_pos = regions.iter().find(|r| r.kind == RegionKind::Short).map(|r| r.start);
    match (long_pos, short_pos) {
        (Some(l), Some(s)) => l < s,
        _ => false,
    }
}

fn valid_position(regions: &[Region]) -> bool {
    regions
        .iter()
        .find(|r| r.kind == RegionKind::Long)
        .map(|r| r.start.abs_diff(EXPECTED_LONG_POSITION) <= POSITION_TOLERANCE)
        .unwrap_or(false)
}

/// Run the full Speedlock pipeline: baseline, region detection, sequence
/// and position verification, confidence scoring.
pub fn detect(timing_data: &[TimingSample], track: u8, head: u8) -> SpeedlockResult {
    let (baseline_ns, _stddev) = calc_baseline(timing_data);
    if baseline_ns <= 0.0 {
        return SpeedlockResult { track, head, ..Default::default() };
    }

    let regions = find_regions(timing_data, baseline_ns);
    let non_normal = regions.iter().filter(|r| r.kind != RegionKind::Normal).count();
    let valid_sequence = verify_sequence(&regions);
    let valid_position = valid_position(&regions);
    let timing_matches = regions.iter().filter(|r| r.kind != RegionKind::Normal).count().min(u8::MAX as usize) as u8;

    let detected = non_normal >= 2;

    let confidence = if valid_sequence && valid_position && timing_matches >= 2 {
        Confidence::Certain
    }
    else if valid_sequence || timing_matches >= 1 {
        Confidence::Likely
    }
    else if detected {
        Confidence::Possible
    }
    else {
        Confidence::None
    };

    SpeedlockResult {
        detected: detected && confidence != Confidence::None,
        confidence,
        baseline_ns,
        regions,
        valid_sequence,
        valid_position,
        timing_matches,
        track,
        head,
    }
}
