/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Raw flux transitions to DMK track reconstruction (spec §4.5, §6).

pub mod decoder;
pub mod pipeline;

pub use decoder::{DecoderParams, FluxDecoder};
pub use pipeline::{flux_to_dmk_track, FluxTrackResult, Revolution};
