//! Hierarchical galaxy address: sector, optionally a system in it,
//! optionally a body in that system.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw value stored for an unset index (blob and record forms)
const UNSET: u32 = u32::MAX;

pub const SIZE_AS_BLOB: usize = 5 * 4;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid SystemPath format: {0:?}")]
pub struct PathParseError(pub String);

/// Location in the galaxy.
///
/// A body index can only exist together with a system index, which the
/// constructors enforce. Ordering is lexicographic over
/// (sector_x, sector_y, sector_z, system_index, body_index) with unset
/// indices sorting after every valid one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SystemPath {
    pub sector_x: i32,
    pub sector_y: i32,
    pub sector_z: i32,
    system_index: Option<u32>,
    body_index: Option<u32>,
}

impl SystemPath {
    pub fn sector(x: i32, y: i32, z: i32) -> Self {
        Self { sector_x: x, sector_y: y, sector_z: z, system_index: None, body_index: None }
    }

    pub fn system(x: i32, y: i32, z: i32, system_index: u32) -> Self {
        Self { system_index: Some(system_index), ..Self::sector(x, y, z) }
    }

    pub fn body(x: i32, y: i32, z: i32, system_index: u32, body_index: u32) -> Self {
        Self { body_index: Some(body_index), ..Self::system(x, y, z, system_index) }
    }

    /// Build from raw indices where `u32::MAX` means unset.
    /// Returns `None` if a body index is given without a system index.
    pub fn from_raw(x: i32, y: i32, z: i32, system_index: u32, body_index: u32) -> Option<Self> {
        match (system_index, body_index) {
            (UNSET, UNSET) => Some(Self::sector(x, y, z)),
            (UNSET, _) => None,
            (si, UNSET) => Some(Self::system(x, y, z, si)),
            (si, bi) => Some(Self::body(x, y, z, si, bi)),
        }
    }

    pub fn system_index(&self) -> Option<u32> {
        self.system_index
    }

    pub fn body_index(&self) -> Option<u32> {
        self.body_index
    }

    fn raw_system(&self) -> u32 {
        self.system_index.unwrap_or(UNSET)
    }

    fn raw_body(&self) -> u32 {
        self.body_index.unwrap_or(UNSET)
    }

    pub fn is_sector_path(&self) -> bool {
        self.system_index.is_none() && self.body_index.is_none()
    }

    pub fn is_system_path(&self) -> bool {
        self.system_index.is_some() && self.body_index.is_none()
    }

    pub fn is_body_path(&self) -> bool {
        self.system_index.is_some() && self.body_index.is_some()
    }

    pub fn has_valid_system(&self) -> bool {
        self.system_index.is_some()
    }

    pub fn has_valid_body(&self) -> bool {
        self.body_index.is_some()
    }

    pub fn is_same_sector(&self, other: &SystemPath) -> bool {
        self.cmp_sector_only(other) == Ordering::Equal
    }

    /// Both paths must carry a system for this to be true
    pub fn is_same_system(&self, other: &SystemPath) -> bool {
        self.has_valid_system() && other.has_valid_system() && self.cmp_system_only(other) == Ordering::Equal
    }

    pub fn sector_only(&self) -> SystemPath {
        Self::sector(self.sector_x, self.sector_y, self.sector_z)
    }

    pub fn system_only(&self) -> Option<SystemPath> {
        self.system_index.map(|si| Self::system(self.sector_x, self.sector_y, self.sector_z, si))
    }

    /// Ordering that only looks at the sector coordinates
    pub fn cmp_sector_only(&self, other: &SystemPath) -> Ordering {
        (self.sector_x, self.sector_y, self.sector_z).cmp(&(other.sector_x, other.sector_y, other.sector_z))
    }

    /// Ordering that looks at sector coordinates and system index
    pub fn cmp_system_only(&self, other: &SystemPath) -> Ordering {
        self.cmp_sector_only(other).then(self.raw_system().cmp(&other.raw_system()))
    }

    pub fn less_sector_only(a: &SystemPath, b: &SystemPath) -> bool {
        a.cmp_sector_only(b) == Ordering::Less
    }

    pub fn less_system_only(a: &SystemPath, b: &SystemPath) -> bool {
        a.cmp_system_only(b) == Ordering::Less
    }

    /// Five little-endian words, e.g. for hashing
    pub fn to_blob(&self) -> [u8; SIZE_AS_BLOB] {
        let mut blob = [0u8; SIZE_AS_BLOB];
        let words = [
            self.sector_x as u32,
            self.sector_y as u32,
            self.sector_z as u32,
            self.raw_system(),
            self.raw_body(),
        ];
        for (chunk, word) in blob.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        blob
    }

    pub fn from_blob(blob: &[u8; SIZE_AS_BLOB]) -> Option<Self> {
        let mut words = [0u32; 5];
        for (word, chunk) in words.iter_mut().zip(blob.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_raw(words[0] as i32, words[1] as i32, words[2] as i32, words[3], words[4])
    }

    pub fn to_record(&self) -> SystemPathRecord {
        SystemPathRecord {
            sector_x: self.sector_x,
            sector_y: self.sector_y,
            sector_z: self.sector_z,
            system_index: self.raw_system(),
            body_index: self.raw_body(),
        }
    }

    pub fn from_record(record: &SystemPathRecord) -> Option<Self> {
        Self::from_raw(record.sector_x, record.sector_y, record.sector_z, record.system_index, record.body_index)
    }

    /// Stable 64-bit seed for procedural generation
    pub fn seed(&self) -> u64 {
        // FNV-1a over the blob
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.to_blob() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

impl Ord for SystemPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_system_only(other).then(self.raw_body().cmp(&other.raw_body()))
    }
}

impl PartialOrd for SystemPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SystemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.sector_x, self.sector_y, self.sector_z)?;
        if let Some(si) = self.system_index {
            write!(f, ",{}", si)?;
        }
        if let Some(bi) = self.body_index {
            write!(f, ",{}", bi)?;
        }
        Ok(())
    }
}

impl FromStr for SystemPath {
    type Err = PathParseError;

    /// Accepts `x,y,z`, `x,y,z,system` and `x,y,z,system,body`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = || PathParseError(s.to_string());
        let parts: Vec<&str> = s.trim().trim_start_matches('(').trim_end_matches(')').split(',').map(str::trim).collect();
        if parts.len() < 3 || parts.len() > 5 {
            return Err(fail());
        }

        let coord = |i: usize| parts[i].parse::<i32>().map_err(|_| fail());
        let index = |i: usize| parts[i].parse::<u32>().ok().filter(|v| *v != UNSET).ok_or_else(fail);

        let (x, y, z) = (coord(0)?, coord(1)?, coord(2)?);
        match parts.len() {
            3 => Ok(Self::sector(x, y, z)),
            4 => Ok(Self::system(x, y, z, index(3)?)),
            _ => Ok(Self::body(x, y, z, index(3)?, index(4)?)),
        }
    }
}

/// Persisted form: all five fields are required, unset indices are `u32::MAX`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPathRecord {
    pub sector_x: i32,
    pub sector_y: i32,
    pub sector_z: i32,
    pub system_index: u32,
    pub body_index: u32,
}

/// Section wrapper: `{"system_path": {...}}`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPathSection {
    pub system_path: SystemPathRecord,
}

impl From<&SystemPath> for SystemPathSection {
    fn from(path: &SystemPath) -> Self {
        Self { system_path: path.to_record() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_paths() -> Vec<SystemPath> {
        vec![
            SystemPath::sector(0, 0, 0),
            SystemPath::sector(-1, 2, 0),
            SystemPath::system(0, 0, 0, 0),
            SystemPath::system(0, 0, 0, 3),
            SystemPath::system(-1, 2, 0, 1),
            SystemPath::body(0, 0, 0, 0, 0),
            SystemPath::body(0, 0, 0, 0, 7),
            SystemPath::body(0, 0, 0, 3, 1),
            SystemPath::body(-1, 2, 0, 1, 2),
            SystemPath::body(5, -5, 5, 0, 0),
            SystemPath::sector(i32::MIN, i32::MAX, 0),
        ]
    }

    #[test]
    fn test_hierarchy_implications() {
        for p in sample_paths() {
            // body => system => sector, carried by the validity checks
            if p.has_valid_body() {
                assert!(p.has_valid_system(), "{}", p);
            }
            if p.is_body_path() {
                assert!(p.has_valid_body() && p.has_valid_system());
                assert!(p.system_only().is_some_and(|s| s.is_system_path()));
            }
            if p.has_valid_system() {
                assert!(p.sector_only().is_sector_path());
            }
            // the kind predicates name the most specific level only
            let kinds = [p.is_sector_path(), p.is_system_path(), p.is_body_path()];
            assert_eq!(kinds.iter().filter(|k| **k).count(), 1, "{}", p);
        }
    }

    #[test]
    fn test_body_without_system_rejected() {
        assert_eq!(SystemPath::from_raw(0, 0, 0, UNSET, 4), None);
        let record = SystemPathRecord { sector_x: 0, sector_y: 0, sector_z: 0, system_index: UNSET, body_index: 2 };
        assert_eq!(SystemPath::from_record(&record), None);
    }

    #[test]
    fn test_record_roundtrip_through_json() {
        for p in sample_paths() {
            let json = serde_json::to_string(&SystemPathSection::from(&p)).unwrap();
            let section: SystemPathSection = serde_json::from_str(&json).unwrap();
            assert_eq!(SystemPath::from_record(&section.system_path), Some(p));
        }
    }

    #[test]
    fn test_record_missing_field_fails() {
        let json = r#"{"system_path": {"sector_x": 1, "sector_y": 2, "sector_z": 3, "system_index": 0}}"#;
        assert!(serde_json::from_str::<SystemPathSection>(json).is_err());
    }

    #[test]
    fn test_blob_layout() {
        let p = SystemPath::system(1, -1, 2, 5);
        let blob = p.to_blob();
        assert_eq!(&blob[0..4], &1u32.to_le_bytes());
        assert_eq!(&blob[4..8], &(-1i32 as u32).to_le_bytes());
        assert_eq!(&blob[16..20], &[0xff; 4]);
        assert_eq!(SystemPath::from_blob(&blob), Some(p));
    }

    #[test]
    fn test_ordering_unset_after_valid() {
        let sector = SystemPath::sector(0, 0, 0);
        let system = SystemPath::system(0, 0, 0, 9);
        let body = SystemPath::body(0, 0, 0, 9, 0);
        assert!(system < sector);
        assert!(body < system);
        assert!(SystemPath::sector(-1, 9, 9) < SystemPath::body(0, 0, 0, 0, 0));
    }

    #[test]
    fn test_partial_orderings_consistent_with_full() {
        let paths = sample_paths();
        for a in &paths {
            for b in &paths {
                // strict: never both ways
                assert!(!(SystemPath::less_sector_only(a, b) && SystemPath::less_sector_only(b, a)));
                assert!(!(SystemPath::less_system_only(a, b) && SystemPath::less_system_only(b, a)));

                // agree with the full order restricted to the compared fields
                let sa = a.sector_only();
                let sb = b.sector_only();
                assert_eq!(SystemPath::less_sector_only(a, b), sa < sb);

                // a sector-only "less" implies full "less"
                if SystemPath::less_sector_only(a, b) {
                    assert!(a < b);
                }
                if SystemPath::less_system_only(a, b) {
                    assert!(a < b);
                }
            }
        }
    }

    #[test]
    fn test_same_system_requires_system() {
        let a = SystemPath::sector(1, 1, 1);
        let b = SystemPath::system(1, 1, 1, 0);
        assert!(a.is_same_sector(&b));
        assert!(!a.is_same_system(&b));
        assert!(b.is_same_system(&SystemPath::body(1, 1, 1, 0, 4)));
    }

    #[test]
    fn test_parse_and_display() {
        for p in sample_paths() {
            let text = p.to_string();
            assert_eq!(text.parse::<SystemPath>(), Ok(p));
        }
        assert_eq!("(1, 2, 3, 4)".parse::<SystemPath>(), Ok(SystemPath::system(1, 2, 3, 4)));
        assert!("1,2".parse::<SystemPath>().is_err());
        assert!("1,2,x".parse::<SystemPath>().is_err());
        assert!("1,2,3,-4".parse::<SystemPath>().is_err());
    }

    #[test]
    fn test_seed_distinguishes_paths() {
        assert_ne!(SystemPath::system(0, 0, 0, 0).seed(), SystemPath::system(0, 0, 0, 1).seed());
        assert_eq!(SystemPath::body(1, 2, 3, 4, 5).seed(), SystemPath::body(1, 2, 3, 4, 5).seed());
    }
}
