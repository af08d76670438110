#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{filler_record, finalize, heap_record, rel, WalStream, TEST_SEGMENT_SIZE};
use pgdelta::cli::record::record_segments;
use pgdelta::config::{RelFileLayout, WalLayout};
use pgdelta::delta::{DeltaFile, DeltaFileManager, WalDeltaRecordingReader, WalPartFile};
use pgdelta::deltamap::{build_delta_map, load_delta_map};
use pgdelta::storage::{DiskDataFolder, LocalStore};
use pgdelta::wal::{Lsn, WalSegmentNo};
use pgdelta::walparser::{BlockLocation, XLogRecord, WAL_PAGE_SIZE};
use tempfile::TempDir;

const FIRST_SEGMENT: u64 = 15;
const LAST_SEGMENT: u64 = 32;
const GROUP_ONE_DELTA: &str = "000000010000000000000010_delta";

fn layout() -> WalLayout {
    WalLayout::from_megabytes(1).expect("1MB layout")
}

fn segment_name(segment_no: u64) -> String {
    WalSegmentNo(segment_no).filename(1, &layout())
}

fn lsn_of_segment(segment_no: u64) -> Lsn {
    Lsn(segment_no * TEST_SEGMENT_SIZE as u64)
}

/// A heap record long enough to cross a segment boundary from wherever
/// `WalStream::fill_until` leaves off.
fn crossing_record(blocks: &[u32]) -> XLogRecord {
    let mut record = heap_record(rel(16386), blocks);
    record.main_data = vec![0x42; 400];
    record.main_data_len = 400;
    finalize(record)
}

/// Segments 15 to 32. Each segment opens with a record touching block
/// `10 * segment` of relation 16385. Records touching relation 16386 cross
/// the boundaries after segments 15, 16 and 31; the other segments end with
/// an XLOG_SWITCH.
fn build_segments() -> Vec<Vec<u8>> {
    let mut stream = WalStream::new(TEST_SEGMENT_SIZE, FIRST_SEGMENT);
    for segment_no in FIRST_SEGMENT..=LAST_SEGMENT {
        let block = segment_no as u32 * 10;
        stream.push(&heap_record(rel(16385), &[block]));
        if segment_no == LAST_SEGMENT {
            break;
        }
        if matches!(segment_no, 15 | 16 | 31) {
            stream.fill_until(TEST_SEGMENT_SIZE);
            stream.push(&crossing_record(&[block + 1, block + 2]));
        } else {
            stream.switch_segment();
        }
    }
    let segments = stream.into_segments();
    assert_eq!(segments.len() as u64, LAST_SEGMENT - FIRST_SEGMENT + 1);
    segments
}

struct Archive {
    wal_dir: TempDir,
    scratch: TempDir,
    upload: TempDir,
    segments: Vec<Vec<u8>>,
}

impl Archive {
    fn new() -> Self {
        let archive = Self {
            wal_dir: tempfile::tempdir().expect("wal dir"),
            scratch: tempfile::tempdir().expect("scratch dir"),
            upload: tempfile::tempdir().expect("upload dir"),
            segments: build_segments(),
        };
        for (index, segment) in archive.segments.iter().enumerate() {
            let name = segment_name(FIRST_SEGMENT + index as u64);
            fs::write(archive.wal_dir.path().join(name), segment).expect("write segment");
        }
        archive
    }

    fn segment(&self, segment_no: u64) -> &[u8] {
        &self.segments[(segment_no - FIRST_SEGMENT) as usize]
    }

    fn wal_paths(&self, segments: impl Iterator<Item = u64>) -> Vec<PathBuf> {
        segments
            .map(|segment_no| self.wal_dir.path().join(segment_name(segment_no)))
            .collect()
    }

    fn manager(&self) -> Arc<DeltaFileManager> {
        let folder = DiskDataFolder::open(self.scratch.path()).expect("data folder");
        Arc::new(DeltaFileManager::new(Arc::new(folder), layout()))
    }

    fn store(&self) -> LocalStore {
        LocalStore::open(self.upload.path()).expect("store")
    }

    /// Copies a WAL segment into the store next to the delta files.
    fn archive_segment(&self, segment_no: u64) {
        fs::write(
            self.upload.path().join(segment_name(segment_no)),
            self.segment(segment_no),
        )
        .expect("archive segment");
    }
}

fn set(blocks: &[u32]) -> BTreeSet<u32> {
    blocks.iter().copied().collect()
}

fn group_one_blocks() -> BTreeSet<u32> {
    (16..=31).map(|segment| segment * 10).collect()
}

#[test]
fn recording_reader_passes_bytes_through() -> pgdelta::Result<()> {
    let archive = Archive::new();
    let manager = archive.manager();
    let name = segment_name(16);

    let mut reader =
        WalDeltaRecordingReader::new(archive.segment(16), &name, Arc::clone(&manager))?;
    let mut copied = Vec::new();
    let mut chunk = [0u8; 1000];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        copied.extend_from_slice(&chunk[..n]);
    }
    assert!(reader.is_recording());
    reader.finish()?;

    assert_eq!(copied, archive.segment(16));
    let part_file = manager.get_part_file(GROUP_ONE_DELTA)?;
    let crossing_from_15 = crossing_record(&[151, 152]).encode();
    let crossing_from_16 = crossing_record(&[161, 162]).encode();
    let tail = part_file.wal_tails[0].clone().expect("tail saved");
    let head = part_file.wal_heads[0].clone().expect("head saved");
    assert!(!tail.is_empty());
    assert!(crossing_from_15.ends_with(&tail));
    assert!(crossing_from_16.starts_with(&head));
    assert_eq!(
        head.len() + tail_len_in_next(&archive, 17),
        crossing_from_16.len()
    );
    Ok(())
}

/// Length of the record tail that opens `segment_no`, from its page header.
fn tail_len_in_next(archive: &Archive, segment_no: u64) -> usize {
    let page = &archive.segment(segment_no)[..WAL_PAGE_SIZE];
    u32::from_le_bytes([page[16], page[17], page[18], page[19]]) as usize
}

#[test]
fn archived_group_builds_the_delta_map() -> pgdelta::Result<()> {
    let archive = Archive::new();
    let manager = archive.manager();
    let store = archive.store();

    let failures = record_segments(&manager, &archive.wal_paths(FIRST_SEGMENT..=31), 4);
    assert_eq!(failures, 0);
    let snapshot = manager.flush_files(&store);
    assert_eq!(snapshot.delta_files_uploaded, 1);
    assert_eq!(snapshot.delta_files_saved, 1);
    assert_eq!(snapshot.part_files_saved, 2);
    assert_eq!(snapshot.failed, 0);

    // Group 0 only saw its last segment; group 2 only the head handed over
    // by segment 31.
    assert!(archive
        .scratch
        .path()
        .join("000000010000000000000000_delta")
        .is_file());
    let next_part = fs::read(
        archive
            .scratch
            .path()
            .join("000000010000000000000020_delta_part"),
    )
    .expect("next group part file");
    let next_part = WalPartFile::load(&mut &next_part[..])?;
    let crossing_from_31 = crossing_record(&[311, 312]).encode();
    let handed_over = next_part.previous_wal_head.clone().expect("previous head");
    assert!(!handed_over.is_empty());
    assert!(crossing_from_31.starts_with(&handed_over));

    let uploaded = fs::read(archive.upload.path().join(GROUP_ONE_DELTA)).expect("uploaded");
    let delta_file = DeltaFile::load(&mut &uploaded[..])?;
    assert_eq!(delta_file.wal_parser.current_record_data(), &handed_over[..]);

    let rel_layout = RelFileLayout::default();
    let map = build_delta_map(
        &store,
        &layout(),
        &rel_layout,
        1,
        lsn_of_segment(16),
        lsn_of_segment(32),
    )?;
    assert_eq!(
        map.get_delta_bitmap_for(Path::new("base/16384/16385"))?,
        group_one_blocks()
    );
    assert_eq!(
        map.get_delta_bitmap_for(Path::new("base/16384/16386"))?,
        set(&[151, 152, 161, 162])
    );

    // Segment 32 is read from the archive, continuing the record left open
    // by the delta file.
    archive.archive_segment(32);
    let map = build_delta_map(
        &store,
        &layout(),
        &rel_layout,
        1,
        lsn_of_segment(16),
        lsn_of_segment(33),
    )?;
    let mut expected = group_one_blocks();
    expected.insert(320);
    assert_eq!(
        map.get_delta_bitmap_for(Path::new("base/16384/16385"))?,
        expected
    );
    assert_eq!(
        map.get_delta_bitmap_for(Path::new("base/16384/16386"))?,
        set(&[151, 152, 161, 162, 311, 312])
    );
    Ok(())
}

#[test]
fn missing_sources_fall_back_to_full_scan() {
    let archive = Archive::new();
    let manager = archive.manager();
    let store = archive.store();
    record_segments(&manager, &archive.wal_paths(FIRST_SEGMENT..=31), 2);
    manager.flush_files(&store);
    let rel_layout = RelFileLayout::default();

    // No delta file and no segments for group 0.
    assert!(load_delta_map(
        &store,
        &layout(),
        &rel_layout,
        1,
        lsn_of_segment(0),
        lsn_of_segment(20),
    )
    .is_none());

    // Segment 32 is not archived.
    assert!(load_delta_map(
        &store,
        &layout(),
        &rel_layout,
        1,
        lsn_of_segment(16),
        lsn_of_segment(33),
    )
    .is_none());

    // Group 0 is described, but the middle group's delta file is gone.
    fs::write(
        archive.upload.path().join("000000010000000000000000_delta"),
        DeltaFile::default().to_bytes().expect("empty delta"),
    )
    .expect("write delta");
    fs::remove_file(archive.upload.path().join(GROUP_ONE_DELTA)).expect("remove delta");
    assert!(load_delta_map(
        &store,
        &layout(),
        &rel_layout,
        1,
        lsn_of_segment(0),
        lsn_of_segment(32),
    )
    .is_none());
}

#[test]
fn first_group_without_delta_file_is_read_from_segments() -> pgdelta::Result<()> {
    let archive = Archive::new();
    for segment_no in 16..=19 {
        archive.archive_segment(segment_no);
    }
    let store = archive.store();

    let map = build_delta_map(
        &store,
        &layout(),
        &RelFileLayout::default(),
        1,
        lsn_of_segment(16),
        lsn_of_segment(20),
    )?;
    assert_eq!(
        map.get_delta_bitmap_for(Path::new("base/16384/16385"))?,
        set(&[160, 170, 180, 190])
    );
    // The tail of the record begun in segment 15 has no beginning here.
    assert_eq!(
        map.get_delta_bitmap_for(Path::new("base/16384/16386"))?,
        set(&[161, 162])
    );
    Ok(())
}

#[test]
fn corrupt_segment_cancels_its_groups() -> pgdelta::Result<()> {
    let archive = Archive::new();
    let manager = archive.manager();
    let store = archive.store();

    // Resource manager id of the first record on the first page.
    let mut corrupt = archive.segment(20).to_vec();
    corrupt[40 + 17] = 0xee;
    let name = segment_name(20);

    let mut reader = WalDeltaRecordingReader::new(&corrupt[..], &name, Arc::clone(&manager))?;
    let mut copied = Vec::new();
    reader.read_to_end(&mut copied)?;
    assert_eq!(copied, corrupt);
    assert!(!reader.is_recording());
    reader.finish()?;

    assert!(manager.is_canceled(GROUP_ONE_DELTA));
    let snapshot = manager.flush_files(&store);
    assert_eq!(snapshot.delta_files_canceled, 1);
    assert_eq!(snapshot.part_files_saved, 0);
    assert!(!archive.upload.path().join(GROUP_ONE_DELTA).exists());
    Ok(())
}

#[test]
fn truncated_segment_stops_recording_but_not_reading() -> pgdelta::Result<()> {
    let archive = Archive::new();
    let manager = archive.manager();
    let truncated = &archive.segment(18)[..WAL_PAGE_SIZE + 100];
    let name = segment_name(18);

    let mut reader = WalDeltaRecordingReader::new(truncated, &name, Arc::clone(&manager))?;
    let mut copied = Vec::new();
    reader.read_to_end(&mut copied)?;
    assert_eq!(copied, truncated);
    assert!(!reader.is_recording());
    reader.finish()?;
    assert!(manager.is_canceled(GROUP_ONE_DELTA));
    Ok(())
}

/// A segment whose first page ends in zeros, followed by a page left over
/// from an earlier use of the file.
fn segment_with_stale_page() -> Vec<u8> {
    let mut fresh = WalStream::new(TEST_SEGMENT_SIZE, 16);
    fresh.push(&heap_record(rel(1), &[1]));
    let fresh_pages = fresh.into_pages();

    let mut stale = WalStream::new(TEST_SEGMENT_SIZE, 16);
    stale.push(&heap_record(rel(1), &[1]));
    stale.push(&filler_record(8088));
    stale.push(&heap_record(rel(2), &[99]));
    let stale_pages = stale.into_pages();

    let mut segment = fresh_pages[0].clone();
    segment.extend_from_slice(&stale_pages[1]);
    segment.resize(TEST_SEGMENT_SIZE, 0);
    segment
}

#[test]
fn partial_page_ends_recording_without_canceling() -> pgdelta::Result<()> {
    let archive = Archive::new();
    let manager = archive.manager();
    let segment = segment_with_stale_page();
    let name = format!("{}.partial", segment_name(16));

    let mut reader = WalDeltaRecordingReader::new(&segment[..], &name, Arc::clone(&manager))?;
    let mut copied = Vec::new();
    reader.read_to_end(&mut copied)?;
    assert_eq!(copied, segment);
    assert!(reader.is_recording());
    reader.finish()?;

    assert!(!manager.is_canceled(GROUP_ONE_DELTA));
    let part_file = manager.get_part_file(GROUP_ONE_DELTA)?;
    assert_eq!(part_file.wal_tails[0], Some(Vec::new()));
    assert_eq!(part_file.wal_heads[0], Some(Vec::new()));

    let snapshot = manager.flush_files(&archive.store());
    assert_eq!(snapshot.delta_files_saved, 1);
    let bytes = fs::read(archive.scratch.path().join(GROUP_ONE_DELTA))?;
    let delta_file = DeltaFile::load(&mut &bytes[..])?;
    assert_eq!(
        delta_file.locations,
        vec![BlockLocation::new(1663, 16384, 1, 1)]
    );
    Ok(())
}

#[test]
fn reversed_range_is_rejected() {
    let archive = Archive::new();
    let err = build_delta_map(
        &archive.store(),
        &layout(),
        &RelFileLayout::default(),
        1,
        lsn_of_segment(20),
        lsn_of_segment(16),
    )
    .expect_err("reversed range");
    assert!(matches!(
        err.downcast_ref::<pgdelta::Error>(),
        Some(pgdelta::Error::InvalidLsn(_))
    ));
}
