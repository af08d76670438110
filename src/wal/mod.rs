//! Positions in the log and the names of the files derived from them.
//!
//! A WAL segment file is named `TTTTTTTTXXXXXXXXYYYYYYYY` (timeline, then the
//! segment number split at 4 GiB boundaries). Segments are grouped sixteen at a
//! time into delta groups; a group's delta file is named after its first
//! segment with a `_delta` suffix, and its part file adds `_part`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::WalLayout;
use crate::{Error, Result};

pub const WAL_FILES_IN_DELTA: u64 = 16;
pub const DELTA_FILENAME_SUFFIX: &str = "_delta";
pub const PART_FILENAME_SUFFIX: &str = "_part";
pub const PARTIAL_WAL_SUFFIX: &str = ".partial";

const WAL_FILENAME_LEN: usize = 24;

/// Byte position in the log, printed as `HI/LO` in hex.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (hi, lo) = s.split_once('/').ok_or_else(|| Error::InvalidLsn(s.to_string()))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| Error::InvalidLsn(s.to_string()))?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| Error::InvalidLsn(s.to_string()))?;
        Ok(Lsn((u64::from(hi) << 32) | u64::from(lo)))
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WalSegmentNo(pub u64);

impl WalSegmentNo {
    pub fn from_lsn(lsn: Lsn, layout: &WalLayout) -> Self {
        Self(lsn.0 / layout.segment_size())
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn delta_no(self) -> DeltaNo {
        DeltaNo(self.0 / WAL_FILES_IN_DELTA)
    }

    pub fn position_in_delta(self) -> usize {
        (self.0 % WAL_FILES_IN_DELTA) as usize
    }

    pub fn filename(self, timeline: u32, layout: &WalLayout) -> String {
        let per_id = layout.segments_per_xlog_id();
        format!("{:08X}{:08X}{:08X}", timeline, self.0 / per_id, self.0 % per_id)
    }
}

/// Number of a delta group: sixteen consecutive segments.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DeltaNo(pub u64);

impl DeltaNo {
    pub fn from_lsn(lsn: Lsn, layout: &WalLayout) -> Self {
        WalSegmentNo::from_lsn(lsn, layout).delta_no()
    }

    pub fn first_wal_segment_no(self) -> WalSegmentNo {
        WalSegmentNo(self.0 * WAL_FILES_IN_DELTA)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn previous(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn filename(self, timeline: u32, layout: &WalLayout) -> String {
        format!(
            "{}{DELTA_FILENAME_SUFFIX}",
            self.first_wal_segment_no().filename(timeline, layout)
        )
    }
}

impl WalLayout {
    /// Timeline and segment number of a WAL filename, with or without the
    /// `.partial` suffix.
    pub fn parse_wal_filename(&self, name: &str) -> Result<(u32, WalSegmentNo)> {
        let base = name.strip_suffix(PARTIAL_WAL_SUFFIX).unwrap_or(name);
        if base.len() != WAL_FILENAME_LEN || !base.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::NotWalFilename(name.to_string()).into());
        }
        let field = |range: std::ops::Range<usize>| {
            u32::from_str_radix(&base[range], 16)
                .map_err(|_| Error::NotWalFilename(name.to_string()))
        };
        let timeline = field(0..8)?;
        let hi = u64::from(field(8..16)?);
        let lo = u64::from(field(16..24)?);

        let per_id = self.segments_per_xlog_id();
        if lo >= per_id {
            return Err(Error::IncorrectLogSegNo(name.to_string()).into());
        }
        Ok((timeline, WalSegmentNo(hi * per_id + lo)))
    }

    pub fn next_wal_filename(&self, name: &str) -> Result<String> {
        let (timeline, segment_no) = self.parse_wal_filename(name)?;
        Ok(segment_no.next().filename(timeline, self))
    }

    pub fn delta_filename_for(&self, wal_filename: &str) -> Result<String> {
        let (timeline, segment_no) = self.parse_wal_filename(wal_filename)?;
        Ok(segment_no.delta_no().filename(timeline, self))
    }

    pub fn position_in_delta(&self, wal_filename: &str) -> Result<usize> {
        let (_, segment_no) = self.parse_wal_filename(wal_filename)?;
        Ok(segment_no.position_in_delta())
    }
}

pub fn part_filename(delta_filename: &str) -> String {
    format!("{delta_filename}{PART_FILENAME_SUFFIX}")
}

pub fn is_part_filename(name: &str) -> bool {
    name.ends_with(PART_FILENAME_SUFFIX)
}
