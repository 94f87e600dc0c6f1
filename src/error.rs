/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Crate-wide error kinds.
//!
//! Per the CORE's error-handling design, CRC mismatches and BAM free-count
//! discrepancies are *not* represented here: they are recorded on the
//! relevant record ([`crate::dmk::Sector::crc_ok`],
//! [`crate::d64::bam::BamReport`]) and never abort a higher-level operation.

use thiserror::Error;

/// Error kinds returned by CORE operations.
///
/// These are taxonomy *kinds*, not a hierarchy: the CLI/GUI layer is
/// expected to translate a kind into an exit code and human message, not
/// to match on internal structure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiskforgeError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("no free space: {0}")]
    Full(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DiskforgeError>;
