//! Implementation of `pgdelta show-delta` subcommand.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Args;
use serde_json::json;

use super::locations::print_locations;
use super::OutputFormat;
use crate::delta::{DeltaFile, WalPartFile};
use crate::wal::is_part_filename;
use crate::Result;

#[derive(Debug, Clone, Args)]
pub struct ShowDeltaArgs {
    /// Delta file (`<wal>_delta`) or part file (`<wal>_delta_part`)
    pub file: PathBuf,

    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub fn execute(args: ShowDeltaArgs) -> Result<()> {
    let mut reader = BufReader::new(File::open(&args.file)?);
    let name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if is_part_filename(&name) {
        let part_file = WalPartFile::load(&mut reader)?;
        return print_part_file(&part_file, args.format);
    }

    let delta_file = DeltaFile::load(&mut reader)?;
    match args.format {
        OutputFormat::Text => {
            println!(
                "record in progress: {} bytes",
                delta_file.wal_parser.current_record_data().len()
            );
            println!("locations: {}", delta_file.locations.len());
            print_locations(&delta_file.locations, args.format)
        }
        OutputFormat::Json => {
            let value = json!({
                "record_in_progress_len": delta_file.wal_parser.current_record_data().len(),
                "locations": delta_file.locations,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

fn slot_len(slot: &Option<Vec<u8>>) -> Option<usize> {
    slot.as_ref().map(Vec::len)
}

fn print_part_file(part_file: &WalPartFile, format: OutputFormat) -> Result<()> {
    let heads: Vec<Option<usize>> = part_file.wal_heads.iter().map(slot_len).collect();
    let tails: Vec<Option<usize>> = part_file.wal_tails.iter().map(slot_len).collect();
    match format {
        OutputFormat::Text => {
            println!("complete: {}", part_file.is_complete());
            match slot_len(&part_file.previous_wal_head) {
                Some(len) => println!("previous head: {len} bytes"),
                None => println!("previous head: missing"),
            }
            for (position, (head, tail)) in heads.iter().zip(&tails).enumerate() {
                let show = |slot: &Option<usize>| match slot {
                    Some(len) => format!("{len} bytes"),
                    None => "missing".to_string(),
                };
                println!("{position:>2}: head {}, tail {}", show(head), show(tail));
            }
        }
        OutputFormat::Json => {
            let value = json!({
                "complete": part_file.is_complete(),
                "previous_wal_head_len": slot_len(&part_file.previous_wal_head),
                "wal_head_lens": heads,
                "wal_tail_lens": tails,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}
