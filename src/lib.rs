/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! # diskforge
//!
//! diskforge reads, validates, repairs, and writes disk images captured
//! from vintage floppy media, and classifies the copy-protection schemes
//! publishers used to stop exactly that.
//!
//! Three codecs and one analysis layer, each usable on its own:
//!
//! - [`d64`] -- Commodore 1541 D64 images: BAM allocation, directory/file
//!   chain walking, validation and repair.
//! - [`dmk`] -- TRS-80/CP/M DMK variable-length MFM/FM tracks: header and
//!   IDAM-table parsing, sector extraction, track serialization.
//! - [`flux`] and [`histogram`] -- raw flux transition capture reduced to
//!   DMK-ready track bytes, via a PLL-free shift-register decoder fed by
//!   histogram-derived thresholds (`flux` feature, enabled by default).
//! - [`protection`] -- CopyLock, Speedlock, and Longtrack detection, plus
//!   a unified classifier that picks the right analyzers for a track's
//!   guessed source platform (`protection` feature, enabled by default).
//!
//! [`bits`] and [`crc`] are the shared bit-level and checksum primitives
//! every codec above builds on.
//!
//! All buffers are caller-owned; parsed views borrow from them and do not
//! outlive the call that produced them.

pub mod bits;
pub mod crc;
pub mod d64;
pub mod dmk;
pub mod error;
pub mod histogram;

#[cfg(feature = "flux")]
pub mod flux;

#[cfg(feature = "protection")]
pub mod protection;

pub use error::{DiskforgeError, Result};
