//! Changed-block maps for relation files.
//!
//! Block numbers in WAL are relation-wide, while relation data is stored in
//! 1 GiB segment files (`16384`, `16384.1`, ...). The map keeps one set of
//! changed blocks per relation and answers queries per segment file, in
//! file-local block numbers.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::RelFileLayout;
use crate::walparser::{BlockLocation, RelFileNode};
use crate::{Error, Result};

pub mod loader;

pub use loader::{build_delta_map, load_delta_map};

const DEFAULT_TABLESPACE_DIR: &str = "base";
const TABLESPACES_DIR: &str = "pg_tblspc";
const GLOBAL_TABLESPACE_DIR: &str = "global";

fn paged_filename_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^(\d+)(\.(\d+))?$").expect("relation file pattern is valid"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagedFileDeltaMap {
    layout: RelFileLayout,
    bitmaps: HashMap<RelFileNode, BTreeSet<u32>>,
}

impl PagedFileDeltaMap {
    pub fn new(layout: RelFileLayout) -> Self {
        Self {
            layout,
            bitmaps: HashMap::new(),
        }
    }

    pub fn add_location_to_delta(&mut self, location: BlockLocation) {
        self.bitmaps
            .entry(location.rel)
            .or_default()
            .insert(location.block_no);
    }

    pub fn add_locations_to_delta<I>(&mut self, locations: I)
    where
        I: IntoIterator<Item = BlockLocation>,
    {
        for location in locations {
            self.add_location_to_delta(location);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelFileNode> {
        self.bitmaps.keys()
    }

    /// Changed blocks of the relation segment file at `path`, numbered from
    /// the start of that file. Fails with [`Error::NoBitmapFound`] when the
    /// relation has no recorded changes.
    pub fn get_delta_bitmap_for(&self, path: &Path) -> Result<BTreeSet<u32>> {
        let node = rel_file_node_from(path, &self.layout)?;
        let bitmap = self
            .bitmaps
            .get(&node)
            .ok_or_else(|| Error::NoBitmapFound(path.display().to_string()))?;
        let rel_file_id = rel_file_id_from(path)?;
        Ok(select_rel_file_blocks(bitmap, rel_file_id, self.layout.blocks_in_rel_file))
    }
}

/// Blocks of segment file `rel_file_id`, shifted to file-local numbering.
pub fn select_rel_file_blocks(
    bitmap: &BTreeSet<u32>,
    rel_file_id: u32,
    blocks_in_rel_file: u32,
) -> BTreeSet<u32> {
    let first = u64::from(rel_file_id) * u64::from(blocks_in_rel_file);
    let end = first + u64::from(blocks_in_rel_file);
    let Ok(first) = u32::try_from(first) else {
        return BTreeSet::new();
    };
    let end = u32::try_from(end).unwrap_or(u32::MAX);
    bitmap
        .range(first..end)
        .map(|block| block - first)
        .collect()
}

fn path_filename(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidRelFilePath(path.display().to_string()).into())
}

/// Segment number of a relation file: 0 for `16384`, 2 for `16384.2`.
pub fn rel_file_id_from(path: &Path) -> Result<u32> {
    let name = path_filename(path)?;
    let captures = paged_filename_regex()
        .captures(name)
        .ok_or_else(|| Error::InvalidRelFilePath(path.display().to_string()))?;
    match captures.get(3) {
        Some(id) => id
            .as_str()
            .parse()
            .map_err(|_| Error::InvalidRelFilePath(path.display().to_string()).into()),
        None => Ok(0),
    }
}

/// Relation identity from a data-directory path:
/// `base/<db>/<rel>`, `global/<rel>` or
/// `pg_tblspc/<spc>/<version dir>/<db>/<rel>`.
pub fn rel_file_node_from(path: &Path, layout: &RelFileLayout) -> Result<RelFileNode> {
    let invalid = || Error::InvalidRelFilePath(path.display().to_string());
    let name = path_filename(path)?;
    let rel_node: u32 = paged_filename_regex()
        .captures(name)
        .and_then(|captures| captures.get(1))
        .and_then(|rel| rel.as_str().parse().ok())
        .ok_or_else(invalid)?;

    let dirs: Vec<&str> = path
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|component| match component {
                    Component::Normal(name) => name.to_str(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let parse_oid = |name: &str| name.parse::<u32>().map_err(|_| invalid());

    if dirs.contains(&TABLESPACES_DIR) {
        // .../pg_tblspc/<spc>/PG_<version>/<db>/<rel>
        if dirs.len() < 3 {
            return Err(invalid().into());
        }
        let spc_node = parse_oid(dirs[dirs.len() - 3])?;
        let db_node = parse_oid(dirs[dirs.len() - 1])?;
        return Ok(RelFileNode::new(spc_node, db_node, rel_node));
    }
    if dirs.contains(&DEFAULT_TABLESPACE_DIR) {
        let db_node = parse_oid(dirs.last().copied().ok_or_else(invalid)?)?;
        return Ok(RelFileNode::new(layout.default_spc_node, db_node, rel_node));
    }
    if dirs.last() == Some(&GLOBAL_TABLESPACE_DIR) {
        return Ok(RelFileNode::new(layout.global_spc_node, 0, rel_node));
    }
    Err(Error::UnknownTablespace(path.display().to_string()).into())
}
