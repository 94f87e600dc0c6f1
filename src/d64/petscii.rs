/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! ASCII/PETSCII conversion (spec §4.7 "Character conversion").

/// Byte used to pad filenames and the disk name to their fixed width.
pub const PAD_BYTE: u8 = 0xA0;

/// Convert one ASCII byte to its PETSCII equivalent: lowercase a-z becomes
/// uppercase 0x41-0x5A, A-Z and all other bytes pass through unchanged.
pub fn ascii_to_petscii_byte(b: u8) -> u8 {
    if b.is_ascii_lowercase() {
        b.to_ascii_uppercase()
    }
    else {
        b
    }
}

/// Convert an ASCII string to PETSCII bytes, then pad/truncate to `width`
/// with [`PAD_BYTE`].
pub fn ascii_to_petscii_padded(s: &str, width: usize) -> Vec<u8> {
    let mut out: Vec<u8> = s.bytes().map(ascii_to_petscii_byte).take(width).collect();
    while out.len() < width {
        out.push(PAD_BYTE);
    }
    out
}

/// Convert one PETSCII byte to ASCII: 0xA0 becomes space, 0x41-0x5A is
/// unchanged, the shifted-letter range 0xC1-0xDA maps back down by 0x80,
/// anything else unprintable becomes '?'.
pub fn petscii_to_ascii_byte(b: u8) -> u8 {
    match b {
        PAD_BYTE => b' ',
        0x41..=0x5A => b,
        0xC1..=0xDA => b - 0x80,
        0x20..=0x7E => b,
        _ => b'?',
    }
}

/// Convert a fixed-width PETSCII byte run to an ASCII `String`, trimming
/// trailing pad/space.
pub fn petscii_to_ascii(bytes: &[u8]) -> String {
    let s: String = bytes.iter().map(|&b| petscii_to_ascii_byte(b) as char).collect();
    s.trim_end_matches(' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_to_petscii_uppercases_lowercase_only() {
        assert_eq!(ascii_to_petscii_byte(b'a'), b'A');
        assert_eq!(ascii_to_petscii_byte(b'Z'), b'Z');
        assert_eq!(ascii_to_petscii_byte(b'3'), b'3');
    }

    #[test]
    fn padded_filename_pads_with_0xa0() {
        let out = ascii_to_petscii_padded("hello", 16);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..5], b"HELLO");
        assert!(out[5..].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn padded_filename_truncates_long_names() {
        let out = ascii_to_petscii_padded("abcdefghijklmnopqrstuvwxyz", 16);
        assert_eq!(out.len(), 16);
        assert_eq!(&out, b"ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn petscii_roundtrip_through_pad_and_shifted_letters() {
        assert_eq!(petscii_to_ascii_byte(PAD_BYTE), b' ');
        assert_eq!(petscii_to_ascii_byte(0x41), b'A');
        assert_eq!(petscii_to_ascii_byte(0xC1), b'A');
        assert_eq!(petscii_to_ascii_byte(0x01), b'?');
    }

    #[test]
    fn petscii_to_ascii_trims_trailing_padding() {
        let mut bytes = b"TEST".to_vec();
        bytes.extend(std::iter::repeat(PAD_BYTE).take(12));
        assert_eq!(petscii_to_ascii(&bytes), "TEST");
    }
}
