//! Building a delta map for a range of the log from stored delta files, with
//! stored WAL segments covering the parts no delta file describes.

use tracing::{info, warn};

use super::PagedFileDeltaMap;
use crate::config::{RelFileLayout, WalLayout};
use crate::delta::DeltaFile;
use crate::storage::StorageReader;
use crate::wal::{DeltaNo, Lsn, WalSegmentNo, PARTIAL_WAL_SUFFIX};
use crate::walparser::{extract_locations_from_wal, BlockLocation, WalParser};
use crate::{Error, Result};

/// Delta map of every block changed by WAL segments from the one holding
/// `first_used_lsn` up to, not including, the one holding `first_not_used_lsn`.
///
/// Whole delta groups are read from their delta files. The first group may
/// lack one (it is then parsed from its segments), and the trailing segments
/// of an unfinished group are always parsed, continuing from the parser state
/// saved in the preceding delta file.
pub fn build_delta_map(
    reader: &dyn StorageReader,
    wal_layout: &WalLayout,
    rel_layout: &RelFileLayout,
    timeline: u32,
    first_used_lsn: Lsn,
    first_not_used_lsn: Lsn,
) -> Result<PagedFileDeltaMap> {
    if first_not_used_lsn < first_used_lsn {
        return Err(Error::InvalidLsn(format!(
            "range end {first_not_used_lsn} precedes its start {first_used_lsn}"
        ))
        .into());
    }
    let first_used_wal = WalSegmentNo::from_lsn(first_used_lsn, wal_layout);
    let first_not_used_wal = WalSegmentNo::from_lsn(first_not_used_lsn, wal_layout);
    let first_used_delta = first_used_wal.delta_no();
    let first_not_used_delta = first_not_used_wal.delta_no();
    info!(
        timeline,
        from_lsn = %first_used_lsn,
        to_lsn = %first_not_used_lsn,
        first_delta = first_used_delta.0,
        last_delta = first_not_used_delta.0,
        "building delta map"
    );

    let sources = Sources {
        reader,
        wal_layout,
        timeline,
    };
    let mut map = PagedFileDeltaMap::new(*rel_layout);

    let mut parser = match sources.read_delta_file(first_used_delta)? {
        Some(delta_file) => {
            map.add_locations_to_delta(delta_file.locations);
            delta_file.wal_parser
        }
        None => {
            let mut parser = WalParser::new();
            let group_end = first_used_delta.next().first_wal_segment_no();
            let end = group_end.min(first_not_used_wal);
            map.add_locations_to_delta(sources.read_wal_range(first_used_wal, end, &mut parser)?);
            parser
        }
    };
    if first_used_delta == first_not_used_delta {
        return Ok(map);
    }

    let last_delta = first_not_used_delta.previous();
    let mut delta_no = first_used_delta.next();
    while delta_no <= last_delta {
        let delta_file = sources
            .read_delta_file(delta_no)?
            .ok_or_else(|| Error::ObjectNotFound(delta_no.filename(timeline, wal_layout)))?;
        map.add_locations_to_delta(delta_file.locations);
        parser = delta_file.wal_parser;
        delta_no = delta_no.next();
    }

    let tail_start = first_not_used_delta.first_wal_segment_no();
    map.add_locations_to_delta(sources.read_wal_range(tail_start, first_not_used_wal, &mut parser)?);
    Ok(map)
}

/// Like [`build_delta_map`], but a map that cannot be built is reported as
/// missing so the caller falls back to a full scan.
pub fn load_delta_map(
    reader: &dyn StorageReader,
    wal_layout: &WalLayout,
    rel_layout: &RelFileLayout,
    timeline: u32,
    first_used_lsn: Lsn,
    first_not_used_lsn: Lsn,
) -> Option<PagedFileDeltaMap> {
    match build_delta_map(
        reader,
        wal_layout,
        rel_layout,
        timeline,
        first_used_lsn,
        first_not_used_lsn,
    ) {
        Ok(map) => Some(map),
        Err(err) => {
            warn!(error = %err, "cannot load delta map, falling back to full scan");
            None
        }
    }
}

struct Sources<'a> {
    reader: &'a dyn StorageReader,
    wal_layout: &'a WalLayout,
    timeline: u32,
}

impl Sources<'_> {
    fn read_delta_file(&self, delta_no: DeltaNo) -> Result<Option<DeltaFile>> {
        let name = delta_no.filename(self.timeline, self.wal_layout);
        match self.reader.read_object(&name)? {
            Some(mut object) => Ok(Some(DeltaFile::load(&mut object)?)),
            None => Ok(None),
        }
    }

    fn read_wal_range(
        &self,
        from: WalSegmentNo,
        to: WalSegmentNo,
        parser: &mut WalParser,
    ) -> Result<Vec<BlockLocation>> {
        let mut locations = Vec::new();
        let mut segment = from;
        while segment < to {
            let name = segment.filename(self.timeline, self.wal_layout);
            let object = match self.reader.read_object(&name)? {
                Some(object) => object,
                None => self
                    .reader
                    .read_object(&format!("{name}{PARTIAL_WAL_SUFFIX}"))?
                    .ok_or_else(|| Error::ObjectNotFound(name.clone()))?,
            };
            locations.extend(extract_locations_from_wal(parser, object)?);
            segment = segment.next();
        }
        Ok(locations)
    }
}
