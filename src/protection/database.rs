/*
    diskforge
    A preservation toolkit for vintage floppy-disk images.

    SPDX-License-Identifier: MIT
*/

//! Static protection database: per-[`ProtectionType`] metadata (platform,
//! category, and the preservation flags the unified classifier attaches
//! to every detection), mirroring `protection_database` in the original
//! tool's classifier.
//!
//! Only types this crate actually detects (CopyLock, CopyLock-old,
//! Speedlock, and the Longtrack family) carry a live detector; entries
//! for other platforms' schemes are recorded so a caller asking about an
//! undetected type still gets honest metadata rather than a panic. See
//! SPEC_FULL.md §F.

use super::{Platform, ProtectionCategory, ProtectionType};

/// One static entry: everything about a protection type that does not
/// depend on a specific track's detection result.
#[derive(Copy, Clone, Debug)]
pub struct ProtectionDbEntry {
    pub protection_type: ProtectionType,
    pub name: &'static str,
    pub publisher: &'static str,
    pub description: &'static str,
    pub category: ProtectionCategory,
    pub platform: Platform,
    pub year_introduced: u16,
    pub requires_timing: bool,
    pub requires_flux: bool,
    pub reconstructable: bool,
}

const DATABASE: &[ProtectionDbEntry] = &[
    ProtectionDbEntry {
        protection_type: ProtectionType::Copylock,
        name: "CopyLock",
        publisher: "Rob Northen Computing",
        description: "LFSR-based protection with 11 sync markers and timing variations",
        category: ProtectionCategory::LfsrEncoded,
        platform: Platform::Amiga,
        year_introduced: 1988,
        requires_timing: true,
        requires_flux: false,
        reconstructable: true,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::CopylockOld,
        name: "CopyLock (Old)",
        publisher: "Rob Northen Computing",
        description: "Early CopyLock variant with 0x65xx sync patterns",
        category: ProtectionCategory::LfsrEncoded,
        platform: Platform::Amiga,
        year_introduced: 1987,
        requires_timing: true,
        requires_flux: false,
        reconstructable: true,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::Speedlock,
        name: "Speedlock",
        publisher: "Speedlock Associates",
        description: "Variable-density protection with long/short bitcell regions",
        category: ProtectionCategory::VariableDensity,
        platform: Platform::Amiga,
        year_introduced: 1989,
        requires_timing: true,
        requires_flux: true,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackProtec,
        name: "PROTEC Longtrack",
        publisher: "Various",
        description: "Extended track length with 0x4454 sync",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1989,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackProtoscan,
        name: "Protoscan",
        publisher: "Magnetic Fields",
        description: "Longtrack protection used in Lotus series",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1990,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackTiertex,
        name: "Tiertex",
        publisher: "Tiertex",
        description: "Longtrack protection used in Strider II",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1990,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackSilmarils,
        name: "Silmarils",
        publisher: "Silmarils",
        description: "French publisher longtrack with ROD0 signature",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1989,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackInfogrames,
        name: "Infogrames",
        publisher: "Infogrames",
        description: "Infogrames longtrack protection",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1988,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackProlance,
        name: "Prolance",
        publisher: "Ubisoft",
        description: "Longtrack protection used in B.A.T.",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1990,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackApp,
        name: "APP",
        publisher: "Amiga Power Pack",
        description: "Amiga Power Pack longtrack protection",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1991,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackSevenCities,
        name: "SevenCities",
        publisher: "Various",
        description: "Longtrack protection used in Seven Cities of Gold",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1987,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::LongtrackSuperMethaneBros,
        name: "SuperMethaneBros",
        publisher: "Virgin Games",
        description: "GCR-encoded longtrack protection",
        category: ProtectionCategory::Longtrack,
        platform: Platform::Amiga,
        year_introduced: 1991,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::VmaxV1,
        name: "V-MAX! v1",
        publisher: "Vorpal",
        description: "V-MAX! copy protection version 1",
        category: ProtectionCategory::GcrTiming,
        platform: Platform::C64,
        year_introduced: 1986,
        requires_timing: true,
        requires_flux: true,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::RapidlokV1,
        name: "RapidLok v1",
        publisher: "Rapidlok Systems",
        description: "RapidLok copy protection version 1",
        category: ProtectionCategory::GcrTiming,
        platform: Platform::C64,
        year_introduced: 1985,
        requires_timing: true,
        requires_flux: true,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::AppleSpiralDos,
        name: "Spiral DOS",
        publisher: "Various",
        description: "Non-standard sector interleaving",
        category: ProtectionCategory::CustomFormat,
        platform: Platform::Apple2,
        year_introduced: 1982,
        requires_timing: false,
        requires_flux: false,
        reconstructable: false,
    },
    ProtectionDbEntry {
        protection_type: ProtectionType::WeakSector,
        name: "Weak Sector",
        publisher: "Various",
        description: "Sector with intentionally unstable flux transitions",
        category: ProtectionCategory::WeakBits,
        platform: Platform::Pc,
        year_introduced: 1985,
        requires_timing: false,
        requires_flux: true,
        reconstructable: false,
    },
];

/// Look up the static entry for `protection_type`, if this crate's
/// database carries one.
pub fn lookup(protection_type: ProtectionType) -> Option<&'static ProtectionDbEntry> {
    DATABASE.iter().find(|e| e.protection_type == protection_type)
}

/// All database entries for a given platform.
pub fn for_platform(platform: Platform) -> impl Iterator<Item = &'static ProtectionDbEntry> {
    DATABASE.iter().filter(move |e| e.platform == platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copylock_is_reconstructable_and_needs_timing() {
        let entry = lookup(ProtectionType::Copylock).unwrap();
        assert!(entry.requires_timing);
        assert!(!entry.requires_flux);
        assert!(entry.reconstructable);
    }

    #[test]
    fn speedlock_needs_flux_and_is_not_reconstructable() {
        let entry = lookup(ProtectionType::Speedlock).unwrap();
        assert!(entry.requires_timing);
        assert!(entry.requires_flux);
        assert!(!entry.reconstructable);
    }

    #[test]
    fn unknown_type_has_no_entry() {
        assert!(lookup(ProtectionType::Unknown).is_none());
    }

    #[test]
    fn for_platform_filters_correctly() {
        let amiga: Vec<_> = for_platform(Platform::Amiga).collect();
        assert!(amiga.len() >= 11);
        assert!(amiga.iter().all(|e| e.platform == Platform::Amiga));
    }
}
