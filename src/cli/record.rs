//! Implementation of `pgdelta record` subcommand.
//!
//! Each WAL segment is read through a recording reader on a bounded pool of
//! worker threads; the manager is flushed once every segment is done.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Args;
use tracing::{info, warn};

use super::OutputFormat;
use crate::config::{Config, WalLayout};
use crate::delta::{DeltaFileManager, WalDeltaRecordingReader};
use crate::logging::DeltaFlushSnapshot;
use crate::storage::{DiskDataFolder, LocalStore};
use crate::walparser::BLOCK_SIZE;
use crate::{Error, Result};

#[derive(Debug, Clone, Args, Default)]
pub struct RecordArgs {
    /// WAL segment files, named as in pg_wal
    pub wal_files: Vec<PathBuf>,

    /// Directory keeping unfinished delta state between runs
    #[arg(long = "scratch-dir")]
    pub scratch_dir: Option<PathBuf>,

    /// Directory receiving finished delta files
    #[arg(long = "upload-dir")]
    pub upload_dir: Option<PathBuf>,

    /// Number of segments recorded in parallel
    #[arg(long = "concurrency", default_value_t = 4)]
    pub concurrency: usize,

    /// WAL segment size of the server, in megabytes
    #[arg(long = "wal-segment-size-mb")]
    pub wal_segment_size_mb: Option<u64>,

    /// server_version_num of the server that produced the segments
    #[arg(long = "server-version-num")]
    pub server_version_num: Option<u32>,

    /// WAL segment in which the first backup started; its group is
    /// completed from the first segment recorded for it
    #[arg(long = "backup-start-wal")]
    pub backup_start_wal: Option<String>,

    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub fn execute(args: RecordArgs, config: &Config) -> Result<()> {
    let scratch_dir = args
        .scratch_dir
        .ok_or_else(|| Error::Cli("scratch_dir is required".into()))?;
    let upload_dir = args
        .upload_dir
        .ok_or_else(|| Error::Cli("upload_dir is required".into()))?;
    if args.wal_files.is_empty() {
        return Err(Error::Cli("at least one wal file is required".into()).into());
    }
    if args.concurrency == 0 {
        return Err(Error::Cli("concurrency must be positive".into()).into());
    }

    let mut config = *config;
    if let Some(megabytes) = args.wal_segment_size_mb {
        config.wal = WalLayout::from_megabytes(megabytes)?;
    }
    if let Some(version_num) = args.server_version_num {
        config.validate_server(version_num, u32::from(BLOCK_SIZE), config.wal.segment_size())?;
    }

    let data_folder = Arc::new(DiskDataFolder::open(scratch_dir)?);
    let store = LocalStore::open(upload_dir)?;
    let manager = Arc::new(DeltaFileManager::new(data_folder, config.wal));

    let failures = record_segments(&manager, &args.wal_files, args.concurrency);
    if let Some(wal_filename) = &args.backup_start_wal {
        manager.complete_partially_filled(wal_filename)?;
    }
    let snapshot = manager.flush_files(&store);
    print_snapshot(snapshot, failures, args.format)
}

/// Records every segment, returning how many could not be recorded.
pub fn record_segments(
    manager: &Arc<DeltaFileManager>,
    wal_files: &[PathBuf],
    concurrency: usize,
) -> usize {
    let (sender, receiver) = crossbeam_channel::unbounded::<&Path>();
    for path in wal_files {
        let _ = sender.send(path.as_path());
    }
    drop(sender);

    let failures = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..concurrency.min(wal_files.len()) {
            let receiver = receiver.clone();
            let failures = &failures;
            scope.spawn(move || {
                for path in receiver {
                    if let Err(err) = record_segment(manager, path) {
                        warn!(wal_file = %path.display(), error = %err, "segment not recorded");
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    failures.into_inner()
}

fn record_segment(manager: &Arc<DeltaFileManager>, path: &Path) -> Result<()> {
    let wal_filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::NotWalFilename(path.display().to_string()))?;
    let file = BufReader::new(File::open(path)?);
    let reader = match WalDeltaRecordingReader::new(file, wal_filename, Arc::clone(manager)) {
        Ok(reader) => reader,
        Err(err) => {
            manager.cancel_recording(wal_filename);
            return Err(err);
        }
    };
    reader.finish()?;
    info!(wal_file = wal_filename, "segment recorded");
    Ok(())
}

fn print_snapshot(snapshot: DeltaFlushSnapshot, failures: usize, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("segments failed: {failures}");
            println!("delta files uploaded: {}", snapshot.delta_files_uploaded);
            println!("delta files saved: {}", snapshot.delta_files_saved);
            println!("part files saved: {}", snapshot.part_files_saved);
            println!(
                "canceled: {} delta, {} part",
                snapshot.delta_files_canceled, snapshot.part_files_canceled
            );
            println!("flush failures: {}", snapshot.failed);
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "segments_failed": failures,
                "flush": snapshot,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}
