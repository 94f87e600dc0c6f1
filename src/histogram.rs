/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Flux-interval histogram and threshold detector (spec §4.3).
//!
//! Buckets raw pulse-interval samples (in device ticks) into 256 linear
//! buckets, locates up to three dominant peaks, and derives the FM/MFM
//! classification plus the decode thresholds the flux decoder needs.
//!
//! This is a from-scratch linear histogram rather than the `histogram`
//! crate's log-scale buckets: spec §3 requires a fixed 256-bucket layout
//! with an explicit `ticks_per_bucket` conversion and an overflow counter,
//! which a log-bucketed histogram cannot express directly. See DESIGN.md
//! for the reasoning.

const BUCKET_COUNT: usize = 256;

/// Which encoding a [`Histogram`] analysis believes the track uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Fm,
    Mfm,
}

/// One located peak in the bucketed interval distribution.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Peak {
    pub bucket: usize,
    pub count: u32,
    pub std_dev: f64,
}

/// Decode thresholds and derived timing, once a histogram has been
/// analyzed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Thresholds {
    pub encoding: Encoding,
    pub peaks: [Peak; 1],
    pub peak1: Option<Peak>,
    pub peak2: Option<Peak>,
    /// Valley between peak0 and peak1 (bucket units). For FM this is the
    /// single decode threshold.
    pub thresh0: f64,
    /// Valley between peak1 and peak2 (MFM only).
    pub thresh1: Option<f64>,
    pub bit_rate: f64,
    pub data_clock: f64,
    pub rpm: Option<f64>,
}

/// A 256-bucket pulse-interval histogram.
#[derive(Clone, Debug)]
pub struct Histogram {
    buckets: [u32; BUCKET_COUNT],
    overflow: u32,
    ticks_per_bucket: f64,
    tick_period_s: f64,
    total_ticks: Option<u64>,
}

impl Histogram {
    /// `ticks_per_bucket` controls bucket granularity; `tick_period_s` is
    /// the duration in seconds of one device tick, used to derive bit
    /// rate and RPM.
    pub fn new(ticks_per_bucket: f64, tick_period_s: f64) -> Self {
        Histogram {
            buckets: [0; BUCKET_COUNT],
            overflow: 0,
            ticks_per_bucket,
            tick_period_s,
            total_ticks: None,
        }
    }

    /// Feed one flux-interval sample, in device ticks.
    pub fn add_sample(&mut self, ticks: u32) {
        let bucket = (ticks as f64 / self.ticks_per_bucket) as usize;
        if bucket >= BUCKET_COUNT {
            self.overflow += 1;
        }
        else {
            self.buckets[bucket] += 1;
        }
    }

    /// Total ticks observed over one index-to-index revolution, if known;
    /// used to derive an estimated RPM.
    pub fn set_revolution_ticks(&mut self, ticks: u64) {
        self.total_ticks = Some(ticks);
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflow
    }

    fn std_dev_of_bucket(&self, bucket: usize, window: usize) -> f64 {
        let lo = bucket.saturating_sub(window);
        let hi = (bucket + window).min(BUCKET_COUNT - 1);
        let counts: Vec<f64> = (lo..=hi).map(|b| self.buckets[b] as f64).collect();
        if counts.is_empty() {
            return 0.0;
        }
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        variance.sqrt()
    }

    /// Find up to three distinct local-maxima peaks, each separated from
    /// its neighbors by at least `min_distance` buckets. Two peaks
    /// classify the track as FM; three classify as MFM.
    ///
    /// Returns `None` when there are too few samples or no clear peaks to
    /// classify from; the caller may fall back to user-supplied nominal
    /// timing in that case.
    pub fn analyze(&self, min_distance: usize) -> Option<Thresholds> {
        let total: u32 = self.buckets.iter().sum();
        if total < 16 {
            log::warn!("Histogram::analyze(): insufficient samples ({total}) to classify track");
            return None;
        }

        let mut candidates: Vec<(usize, u32)> = Vec::new();
        for b in 0..BUCKET_COUNT {
            let count = self.buckets[b];
            if count == 0 {
                continue;
            }
            let is_local_max = (b == 0 || self.buckets[b - 1] <= count)
                && (b == BUCKET_COUNT - 1 || self.buckets[b + 1] <= count);
            if is_local_max {
                candidates.push((b, count));
            }
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut peaks: Vec<(usize, u32)> = Vec::new();
        for (bucket, count) in candidates {
            if peaks.iter().all(|(b, _)| bucket.abs_diff(*b) >= min_distance) {
                peaks.push((bucket, count));
            }
            if peaks.len() == 3 {
                break;
            }
        }
        peaks.sort_by_key(|(b, _)| *b);

        if peaks.len() < 2 {
            log::warn!("Histogram::analyze(): no clear peaks found ({} candidates)", peaks.len());
            return None;
        }

        let encoding = if peaks.len() >= 3 { Encoding::Mfm } else { Encoding::Fm };
        let mk_peak = |(bucket, count): (usize, u32)| Peak {
            bucket,
            count,
            std_dev: self.std_dev_of_bucket(bucket, 3),
        };

        let peak0 = mk_peak(peaks[0]);
        let peak1 = mk_peak(peaks[1]);
        let peak2 = if peaks.len() >= 3 { Some(mk_peak(peaks[2])) } else { None };

        let thresh0 = (peak0.bucket as f64 + peak1.bucket as f64) / 2.0;
        let thresh1 = peak2.map(|p2| (peak1.bucket as f64 + p2.bucket as f64) / 2.0);

        let short_peak_ticks = peak0.bucket as f64 * self.ticks_per_bucket;
        let bit_rate = 1.0 / (short_peak_ticks * self.tick_period_s);
        let data_clock = match encoding {
            Encoding::Fm => bit_rate,
            Encoding::Mfm => bit_rate / 2.0,
        };
        let rpm = self
            .total_ticks
            .map(|ticks| 60.0 / (ticks as f64 * self.tick_period_s));

        Some(Thresholds {
            encoding,
            peaks: [peak0],
            peak1: Some(peak1),
            peak2,
            thresh0,
            thresh1,
            bit_rate,
            data_clock,
            rpm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fm(h: &mut Histogram, short: u32, long: u32, n: u32) {
        for _ in 0..n {
            h.add_sample(short);
        }
        for _ in 0..n {
            h.add_sample(long);
        }
    }

    #[test]
    fn two_peaks_classify_fm() {
        let mut h = Histogram::new(1.0, 1e-6);
        sample_fm(&mut h, 20, 40, 200);
        let t = h.analyze(5).expect("should classify");
        assert_eq!(t.encoding, Encoding::Fm);
        assert!(t.peak2.is_none());
    }

    #[test]
    fn three_peaks_classify_mfm() {
        let mut h = Histogram::new(1.0, 1e-6);
        for _ in 0..200 {
            h.add_sample(20);
        }
        for _ in 0..200 {
            h.add_sample(30);
        }
        for _ in 0..200 {
            h.add_sample(40);
        }
        let t = h.analyze(5).expect("should classify");
        assert_eq!(t.encoding, Encoding::Mfm);
        assert!(t.peak2.is_some());
        assert!(t.thresh1.is_some());
    }

    #[test]
    fn insufficient_samples_returns_none() {
        let mut h = Histogram::new(1.0, 1e-6);
        h.add_sample(20);
        h.add_sample(40);
        assert!(h.analyze(5).is_none());
    }

    #[test]
    fn overflow_counted_separately() {
        let mut h = Histogram::new(1.0, 1e-6);
        h.add_sample(1000);
        assert_eq!(h.overflow_count(), 1);
    }

    #[test]
    fn thresholds_sit_at_peak_midpoints() {
        let mut h = Histogram::new(1.0, 1e-6);
        sample_fm(&mut h, 20, 40, 200);
        let t = h.analyze(5).unwrap();
        assert_eq!(t.thresh0, 30.0);
    }
}
