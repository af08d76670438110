//! Implementation of `pgdelta bitmap` subcommand.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;

use super::OutputFormat;
use crate::config::{Config, WalLayout};
use crate::deltamap::load_delta_map;
use crate::storage::LocalStore;
use crate::wal::Lsn;
use crate::{Error, Result};

#[derive(Debug, Clone, Args)]
pub struct BitmapArgs {
    /// Relation files, relative to the data directory (e.g. base/16384/16385.1)
    pub rel_files: Vec<PathBuf>,

    /// Directory holding delta files and WAL segments
    #[arg(long = "store-dir")]
    pub store_dir: Option<PathBuf>,

    #[arg(long = "timeline", default_value_t = 1)]
    pub timeline: u32,

    /// First LSN whose changes are included (e.g. 0/3000028)
    #[arg(long = "from-lsn")]
    pub from_lsn: Option<Lsn>,

    /// LSN whose segment is no longer included
    #[arg(long = "to-lsn")]
    pub to_lsn: Option<Lsn>,

    /// WAL segment size of the server, in megabytes
    #[arg(long = "wal-segment-size-mb")]
    pub wal_segment_size_mb: Option<u64>,

    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub fn execute(args: BitmapArgs, config: &Config) -> Result<()> {
    let store_dir = args
        .store_dir
        .ok_or_else(|| Error::Cli("store_dir is required".into()))?;
    let from_lsn = args
        .from_lsn
        .ok_or_else(|| Error::Cli("from_lsn is required".into()))?;
    let to_lsn = args
        .to_lsn
        .ok_or_else(|| Error::Cli("to_lsn is required".into()))?;
    if to_lsn < from_lsn {
        return Err(Error::Cli("to_lsn precedes from_lsn".into()).into());
    }
    let wal_layout = match args.wal_segment_size_mb {
        Some(megabytes) => WalLayout::from_megabytes(megabytes)?,
        None => config.wal,
    };

    let store = LocalStore::open(store_dir)?;
    let map = load_delta_map(&store, &wal_layout, &config.rel, args.timeline, from_lsn, to_lsn)
        .ok_or_else(|| Error::Cli("no delta information for the requested range".into()))?;

    let mut bitmaps = BTreeMap::new();
    for path in &args.rel_files {
        let blocks = match map.get_delta_bitmap_for(path) {
            Ok(blocks) => blocks,
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::NoBitmapFound(_))) => {
                Default::default()
            }
            Err(err) => return Err(err),
        };
        bitmaps.insert(path.display().to_string(), blocks);
    }

    match args.format {
        OutputFormat::Text => {
            for (path, blocks) in &bitmaps {
                let blocks: Vec<String> = blocks.iter().map(u32::to_string).collect();
                println!("{path}: {}", blocks.join(","));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&bitmaps)?),
    }
    Ok(())
}
