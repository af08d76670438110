//! Shared registry of delta files and part files for concurrently recorded
//! WAL segments.
//!
//! Writers and part files are created lazily, loading any state a previous
//! run left in the data folder. Recording for a group can be canceled at any
//! time; canceled groups are never persisted nor uploaded.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use super::delta_file::{BlockLocationConsumer, DeltaFile, DeltaFileWriter};
use super::part_file::WalPartFile;
use crate::config::WalLayout;
use crate::logging::{log_delta_flush, DeltaFlushSnapshot};
use crate::storage::{DataFolder, Uploader};
use crate::wal::part_filename;
use crate::walparser::{extract_block_locations, WalParser};
use crate::Result;

pub struct DeltaFileManager {
    data_folder: Arc<dyn DataFolder>,
    layout: WalLayout,
    part_files: DashMap<String, WalPartFile>,
    delta_file_writers: DashMap<String, Arc<DeltaFileWriter>>,
    canceled_delta_files: DashSet<String>,
    completed_part_files: DashSet<String>,
}

impl DeltaFileManager {
    pub fn new(data_folder: Arc<dyn DataFolder>, layout: WalLayout) -> Self {
        Self {
            data_folder,
            layout,
            part_files: DashMap::new(),
            delta_file_writers: DashMap::new(),
            canceled_delta_files: DashSet::new(),
            completed_part_files: DashSet::new(),
        }
    }

    pub fn layout(&self) -> &WalLayout {
        &self.layout
    }

    /// Sink for the block locations of `wal_filename`, shared by every
    /// segment of its delta group.
    pub fn get_block_location_consumer(&self, wal_filename: &str) -> Result<BlockLocationConsumer> {
        let delta_filename = self.layout.delta_filename_for(wal_filename)?;
        Ok(self.get_delta_file_writer(&delta_filename)?.consumer())
    }

    fn get_delta_file_writer(&self, delta_filename: &str) -> Result<Arc<DeltaFileWriter>> {
        let writer = self
            .delta_file_writers
            .entry(delta_filename.to_string())
            .or_try_insert_with(|| self.load_delta_file_writer(delta_filename))?;
        Ok(Arc::clone(writer.value()))
    }

    fn load_delta_file_writer(&self, delta_filename: &str) -> Result<Arc<DeltaFileWriter>> {
        let delta_file = match self.data_folder.open_file(delta_filename)? {
            Some(mut reader) => {
                debug!(delta_file = delta_filename, "resuming delta file from data folder");
                DeltaFile::load(&mut reader)?
            }
            None => DeltaFile::new(WalParser::new()),
        };
        Ok(Arc::new(DeltaFileWriter::spawn(delta_filename, delta_file)?))
    }

    /// Marks the delta file of `wal_filename`, and of the segment after it,
    /// as canceled. Never fails: a name that cannot be parsed is only logged.
    pub fn cancel_recording(&self, wal_filename: &str) {
        let delta_filenames = self.layout.delta_filename_for(wal_filename).and_then(|own| {
            let next = self.layout.next_wal_filename(wal_filename)?;
            Ok([own, self.layout.delta_filename_for(&next)?])
        });
        match delta_filenames {
            Ok(delta_filenames) => {
                for delta_filename in delta_filenames {
                    warn!(wal_file = wal_filename, delta_file = %delta_filename, "delta recording canceled");
                    self.canceled_delta_files.insert(delta_filename);
                }
            }
            Err(err) => {
                warn!(wal_file = wal_filename, error = %err, "cannot cancel delta recording");
            }
        }
    }

    pub fn is_canceled(&self, delta_filename: &str) -> bool {
        self.canceled_delta_files.contains(delta_filename)
    }

    /// Current state of a group's part file, loading it if needed.
    pub fn get_part_file(&self, delta_filename: &str) -> Result<WalPartFile> {
        let part_file = self
            .part_files
            .entry(delta_filename.to_string())
            .or_try_insert_with(|| self.load_part_file(delta_filename))?;
        Ok(part_file.value().clone())
    }

    fn load_part_file(&self, delta_filename: &str) -> Result<WalPartFile> {
        match self.data_folder.open_file(&part_filename(delta_filename))? {
            Some(mut reader) => WalPartFile::load(&mut reader),
            None => Ok(WalPartFile::new()),
        }
    }

    /// Applies `update` to a group's part file. A part file completed by the
    /// update is combined into the delta file right away.
    pub fn update_part_file<F>(&self, delta_filename: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut WalPartFile),
    {
        let complete = {
            let mut part_file = self
                .part_files
                .entry(delta_filename.to_string())
                .or_try_insert_with(|| self.load_part_file(delta_filename))?;
            update(part_file.value_mut());
            part_file.is_complete()
        };
        if !complete {
            return Ok(());
        }
        if let Some((_, part_file)) = self.part_files.remove(delta_filename) {
            self.complete_part_file(delta_filename, &part_file);
        }
        Ok(())
    }

    /// Completes the part file of a group whose recording started at a
    /// segment other than its first, such as the group holding the start of
    /// the first backup. Returns whether the part file was completed.
    pub fn complete_partially_filled(&self, wal_filename: &str) -> Result<bool> {
        let delta_filename = self.layout.delta_filename_for(wal_filename)?;
        let mut index = Ok(None);
        self.update_part_file(&delta_filename, |part| {
            index = part.partially_filled_index();
            if let Ok(Some(position)) = &index {
                part.complete_up_to(*position);
            }
        })?;
        let completed = index?.is_some();
        if completed {
            debug!(delta_file = %delta_filename, "partially filled part file completed");
        }
        Ok(completed)
    }

    fn complete_part_file(&self, delta_filename: &str, part_file: &WalPartFile) {
        if self.is_canceled(delta_filename) {
            return;
        }
        match self.combine_part_file(delta_filename, part_file) {
            Ok(()) => {
                self.completed_part_files.insert(delta_filename.to_string());
            }
            Err(err) => {
                warn!(delta_file = delta_filename, error = %err, "failed to combine part file");
                self.canceled_delta_files.insert(delta_filename.to_string());
            }
        }
    }

    /// Sends the locations of the records reassembled from `part_file` to
    /// the group's delta file and stores the parser state that continues into
    /// the next group.
    pub fn combine_part_file(&self, delta_filename: &str, part_file: &WalPartFile) -> Result<()> {
        let writer = self.get_delta_file_writer(delta_filename)?;
        writer.set_wal_parser(WalParser::from_current_record_head(part_file.last_wal_head()));
        let records = part_file.combine_records()?;
        writer.consumer().send(extract_block_locations(&records))
    }

    /// Combines complete part files and persists the rest to the data folder.
    /// Returns the delta filenames whose part files are complete.
    pub fn flush_part_files(&self, snapshot: &mut DeltaFlushSnapshot) -> HashSet<String> {
        let delta_filenames: Vec<String> =
            self.part_files.iter().map(|entry| entry.key().clone()).collect();
        for delta_filename in delta_filenames {
            let Some((_, part_file)) = self.part_files.remove(&delta_filename) else {
                continue;
            };
            if self.is_canceled(&delta_filename) {
                snapshot.part_files_canceled += 1;
                continue;
            }
            if part_file.is_complete() {
                self.complete_part_file(&delta_filename, &part_file);
                continue;
            }
            let saved = part_file.to_bytes().and_then(|data| {
                self.data_folder
                    .write_file(&part_filename(&delta_filename), &data)
            });
            match saved {
                Ok(()) => snapshot.part_files_saved += 1,
                Err(err) => {
                    warn!(delta_file = %delta_filename, error = %err, "failed to save part file");
                    snapshot.failed += 1;
                    self.canceled_delta_files.insert(delta_filename);
                }
            }
        }
        self.completed_part_files.iter().map(|name| name.key().clone()).collect()
    }

    /// Closes every writer. Delta files whose part file completed are
    /// uploaded; the others are persisted to the data folder.
    pub fn flush_delta_files(
        &self,
        uploader: &dyn Uploader,
        completed_part_files: &HashSet<String>,
        snapshot: &mut DeltaFlushSnapshot,
    ) {
        let delta_filenames: Vec<String> = self
            .delta_file_writers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for delta_filename in delta_filenames {
            let Some((_, writer)) = self.delta_file_writers.remove(&delta_filename) else {
                continue;
            };
            writer.close();
            if self.is_canceled(&delta_filename) {
                snapshot.delta_files_canceled += 1;
                continue;
            }
            let data = match writer.snapshot().to_bytes() {
                Ok(data) => data,
                Err(err) => {
                    warn!(delta_file = %delta_filename, error = %err, "cannot serialize delta file");
                    snapshot.failed += 1;
                    continue;
                }
            };
            if completed_part_files.contains(&delta_filename) {
                match uploader.upload(&delta_filename, &data) {
                    Ok(()) => snapshot.delta_files_uploaded += 1,
                    Err(err) => {
                        warn!(delta_file = %delta_filename, error = %err, "delta upload failed");
                        snapshot.failed += 1;
                    }
                }
            } else {
                match self.data_folder.write_file(&delta_filename, &data) {
                    Ok(()) => snapshot.delta_files_saved += 1,
                    Err(err) => {
                        warn!(delta_file = %delta_filename, error = %err, "delta save failed");
                        snapshot.failed += 1;
                    }
                }
            }
        }
    }

    /// Persists everything recorded so far: the data folder is cleaned and
    /// rewritten from memory, and finished delta files are uploaded.
    pub fn flush_files(&self, uploader: &dyn Uploader) -> DeltaFlushSnapshot {
        let mut snapshot = DeltaFlushSnapshot::default();
        if let Err(err) = self.data_folder.clean_folder() {
            warn!(error = %err, "failed to clean delta data folder");
        }
        let completed = self.flush_part_files(&mut snapshot);
        self.flush_delta_files(uploader, &completed, &mut snapshot);
        self.completed_part_files.clear();
        log_delta_flush(snapshot);
        snapshot
    }
}
