//! Implementation of `pgdelta locations` subcommand.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Args;

use super::OutputFormat;
use crate::walparser::{extract_locations_from_wal, BlockLocation, WalParser};
use crate::Result;

#[derive(Debug, Clone, Args)]
pub struct LocationsArgs {
    /// WAL segment file to parse
    pub wal_file: PathBuf,

    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub fn execute(args: LocationsArgs) -> Result<()> {
    let file = File::open(&args.wal_file)?;
    let mut parser = WalParser::new();
    let locations = extract_locations_from_wal(&mut parser, BufReader::new(file))?;
    print_locations(&locations, args.format)
}

pub(crate) fn print_locations(locations: &[BlockLocation], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for location in locations {
                println!(
                    "{}/{}/{} blk {}",
                    location.rel.spc_node,
                    location.rel.db_node,
                    location.rel.rel_node,
                    location.block_no
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(locations)?),
    }
    Ok(())
}
