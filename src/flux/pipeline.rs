/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Flux-to-DMK pipeline: combines the histogram threshold detector, the
//! flux decoder, and the DMK track codec into a full-track conversion
//! (spec §4.5 "Revolution handling").

use crate::dmk::sector::Sector;
use crate::dmk::track::{extract_sectors, TrackDecodeOptions};
use crate::error::{DiskforgeError, Result};
use crate::flux::decoder::{DecoderParams, FluxDecoder};
use crate::histogram::{Histogram, Thresholds};

/// One captured revolution's raw flux intervals, in device ticks.
pub struct Revolution<'a> {
    pub intervals: &'a [u32],
}

/// Result of converting one or more captured revolutions of a track into
/// a DMK track block.
pub struct FluxTrackResult {
    pub thresholds: Thresholds,
    /// Reconstructed raw track bytes, from the revolution with the fewest
    /// CRC errors.
    pub track_bytes: Vec<u8>,
    /// Sectors from the best revolution, with any CRC-errored or missing
    /// sector replaced by a good copy from an alternate revolution where
    /// available.
    pub sectors: Vec<Sector>,
    pub revolutions_decoded: usize,
    pub best_revolution_index: usize,
}

fn count_crc_errors(sectors: &[Sector]) -> usize {
    sectors.iter().filter(|s| !s.is_valid()).count()
}

/// Convert captured flux for one track into a DMK track block.
///
/// `ticks_per_bucket`/`tick_period_s` feed the histogram; `track_length` is
/// the target DMK track-block length the reconstructed bytes are padded
/// or truncated to. If the histogram can't classify the track (too few
/// samples, no clear peaks), `fallback` thresholds are used if supplied;
/// otherwise this fails with [`DiskforgeError::InvalidImage`].
pub fn flux_to_dmk_track(
    revolutions: &[Revolution],
    ticks_per_bucket: f64,
    tick_period_s: f64,
    track_length: usize,
    opts: &TrackDecodeOptions,
    fallback: Option<Thresholds>,
) -> Result<FluxTrackResult> {
    if revolutions.is_empty() {
        return Err(DiskforgeError::InvalidInput("no revolutions captured".into()));
    }

    let mut histogram = Histogram::new(ticks_per_bucket, tick_period_s);
    for rev in revolutions {
        for &iv in rev.intervals {
            histogram.add_sample(iv);
        }
    }
    let thresholds = histogram
        .analyze(3)
        .or(fallback)
        .ok_or_else(|| DiskforgeError::InvalidImage("flux track unanalyzable: no clear peaks".into()))?;

    let nominal_cell_ticks = thresholds.peaks[0].bucket as f64 * ticks_per_bucket;
    let params = DecoderParams {
        encoding: thresholds.encoding,
        thresh0: thresholds.thresh0 * ticks_per_bucket,
        thresh1: thresholds.thresh1.map(|t| t * ticks_per_bucket),
        nominal_cell_ticks,
        post_comp: 0.5,
    };

    let mut decoded_revs: Vec<Vec<u8>> = Vec::with_capacity(revolutions.len());
    for rev in revolutions {
        let mut decoder = FluxDecoder::new(params);
        for &iv in rev.intervals {
            decoder.feed(iv as f64);
        }
        let mut bytes = decoder.finish().remove(0);
        bytes.resize(track_length, 0);
        decoded_revs.push(bytes);
    }

    let sector_sets: Vec<Vec<Sector>> = decoded_revs
        .iter()
        .map(|bytes| extract_sectors(bytes, track_length, opts))
        .collect();

    let best_revolution_index = sector_sets
        .iter()
        .enumerate()
        .min_by_key(|(_, sectors)| count_crc_errors(sectors))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut merged = sector_sets[best_revolution_index].clone();
    if decoded_revs.len() > 1 {
        for sector in merged.iter_mut() {
            if sector.is_valid() {
                continue;
            }
            for (i, alt_sectors) in sector_sets.iter().enumerate() {
                if i == best_revolution_index {
                    continue;
                }
                if let Some(good) = alt_sectors
                    .iter()
                    .find(|s| s.cylinder == sector.cylinder && s.sector == sector.sector && s.is_valid())
                {
                    *sector = good.clone();
                    break;
                }
            }
        }
    }

    Ok(FluxTrackResult {
        thresholds,
        track_bytes: decoded_revs[best_revolution_index].clone(),
        sectors: merged,
        revolutions_decoded: decoded_revs.len(),
        best_revolution_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmk::track::{write_track, SectorWriteSpec};
    use crate::histogram::Encoding;

    fn track_to_flux(bytes: &[u8], cell_ticks: u32) -> Vec<u32> {
        let mut raw_bits: Vec<bool> = Vec::new();
        let mut prev_data = false;
        for &b in bytes {
            for i in (0..8).rev() {
                let data_bit = (b >> i) & 1 == 1;
                let clock_bit = !prev_data && !data_bit;
                raw_bits.push(clock_bit);
                raw_bits.push(data_bit);
                prev_data = data_bit;
            }
        }
        let mut intervals = Vec::new();
        let mut run = 0u32;
        for bit in raw_bits {
            run += 1;
            if bit {
                intervals.push(run * cell_ticks);
                run = 0;
            }
        }
        intervals
    }

    #[test]
    fn pipeline_recovers_sectors_from_single_revolution() {
        let specs = vec![SectorWriteSpec {
            cylinder: 0,
            head: 0,
            sector: 1,
            size_code: 1,
            encoding: Encoding::Mfm,
            deleted: false,
            data: vec![0x42; 256],
        }];
        let opts = TrackDecodeOptions::default();
        let track_len = 3000;
        let track_bytes = write_track(&specs, track_len, &opts);

        let cell_ticks = 2u32;
        let intervals = track_to_flux(&track_bytes, cell_ticks);
        let revs = vec![Revolution { intervals: &intervals }];

        let result = flux_to_dmk_track(&revs, 1.0, 1e-8, track_len, &opts, None).expect("should decode");
        assert_eq!(result.thresholds.encoding, Encoding::Mfm);
        assert_eq!(result.sectors.len(), 1);
        assert!(result.sectors[0].is_valid());
        assert_eq!(result.sectors[0].data, vec![0x42; 256]);
    }

    #[test]
    fn pipeline_merges_good_sector_from_alternate_revolution() {
        let specs = vec![SectorWriteSpec {
            cylinder: 0,
            head: 0,
            sector: 1,
            size_code: 1,
            encoding: Encoding::Mfm,
            deleted: false,
            data: vec![0x77; 256],
        }];
        let opts = TrackDecodeOptions::default();
        let track_len = 3000;
        let track_bytes = write_track(&specs, track_len, &opts);
        let cell_ticks = 2u32;
        let good_intervals = track_to_flux(&track_bytes, cell_ticks);

        // A corrupted "revolution": drop every other interval, scrambling decode.
        let mut bad_intervals = good_intervals.clone();
        for iv in bad_intervals.iter_mut().step_by(7) {
            *iv = iv.saturating_add(cell_ticks * 3);
        }

        let revs = vec![
            Revolution { intervals: &bad_intervals },
            Revolution { intervals: &good_intervals },
        ];
        let result = flux_to_dmk_track(&revs, 1.0, 1e-8, track_len, &opts, None).expect("should decode");
        assert_eq!(result.revolutions_decoded, 2);
        assert!(result.sectors.iter().any(|s| s.is_valid() && s.data == vec![0x77; 256]));
    }

    #[test]
    fn unanalyzable_flux_without_fallback_is_an_error() {
        let revs = vec![Revolution { intervals: &[10, 10] }];
        let opts = TrackDecodeOptions::default();
        let result = flux_to_dmk_track(&revs, 1.0, 1e-8, 3000, &opts, None);
        assert!(result.is_err());
    }
}
