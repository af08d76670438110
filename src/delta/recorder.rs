//! Recording block locations while a WAL segment is read for archiving.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::{debug, warn};

use super::delta_file::BlockLocationConsumer;
use super::manager::DeltaFileManager;
use crate::wal::WAL_FILES_IN_DELTA;
use crate::walparser::{
    extract_block_locations, PageStatus, WalPageReader, WalParser, XLogRecord, WAL_PAGE_SIZE,
};
use crate::{Error, Result};

/// Forwards the block locations of decoded records to a delta file.
pub struct WalDeltaRecorder {
    consumer: BlockLocationConsumer,
}

impl WalDeltaRecorder {
    pub fn new(consumer: BlockLocationConsumer) -> Self {
        Self { consumer }
    }

    pub fn record_wal_delta(&self, records: &[XLogRecord]) -> Result<()> {
        self.consumer.send(extract_block_locations(records))
    }
}

/// Stores the record fragments found at the edges of one segment in its
/// group's part file.
pub struct WalPartRecorder {
    wal_filename: String,
    delta_filename: String,
    position: usize,
    manager: Arc<DeltaFileManager>,
}

impl WalPartRecorder {
    pub fn new(wal_filename: &str, manager: Arc<DeltaFileManager>) -> Result<Self> {
        let layout = manager.layout();
        let delta_filename = layout.delta_filename_for(wal_filename)?;
        let position = layout.position_in_delta(wal_filename)?;
        Ok(Self {
            wal_filename: wal_filename.to_string(),
            delta_filename,
            position,
            manager,
        })
    }

    /// Tail of the record that began in the previous segment.
    pub fn save_previous_wal_tail(&self, tail: Vec<u8>) -> Result<()> {
        let position = self.position;
        self.manager
            .update_part_file(&self.delta_filename, |part| part.wal_tails[position] = Some(tail))
    }

    /// Head of the record that continues into the next segment. The last
    /// segment of a group also hands its head to the next group.
    pub fn save_next_wal_head(&self, head: Vec<u8>) -> Result<()> {
        let position = self.position;
        let last = position + 1 == WAL_FILES_IN_DELTA as usize;
        let next_head = last.then(|| head.clone());
        self.manager
            .update_part_file(&self.delta_filename, |part| part.wal_heads[position] = Some(head))?;

        if let Some(head) = next_head {
            let layout = self.manager.layout();
            let next_wal = layout.next_wal_filename(&self.wal_filename)?;
            let next_delta = layout.delta_filename_for(&next_wal)?;
            self.manager
                .update_part_file(&next_delta, |part| part.previous_wal_head = Some(head))?;
        }
        Ok(())
    }

    pub fn cancel_recording(&self, err: &anyhow::Error) {
        warn!(wal_file = %self.wal_filename, error = %err, "wal delta recording failed");
        self.manager.cancel_recording(&self.wal_filename);
    }
}

/// Pass-through reader over a WAL segment. Bytes come out unchanged while
/// every page is parsed and its block locations recorded. Recording problems
/// never surface as read errors: recording is canceled for the segment and
/// reading goes on.
pub struct WalDeltaRecordingReader<R: Read> {
    pages: WalPageReader<R>,
    parser: WalParser,
    page: Vec<u8>,
    offset: usize,
    tail_saved: bool,
    reached_end_of_data: bool,
    recorder: Option<WalDeltaRecorder>,
    part_recorder: WalPartRecorder,
}

impl<R: Read> WalDeltaRecordingReader<R> {
    pub fn new(reader: R, wal_filename: &str, manager: Arc<DeltaFileManager>) -> Result<Self> {
        let consumer = manager.get_block_location_consumer(wal_filename)?;
        let part_recorder = WalPartRecorder::new(wal_filename, manager)?;
        Ok(Self {
            pages: WalPageReader::new(reader),
            parser: WalParser::new(),
            page: Vec::new(),
            offset: 0,
            tail_saved: false,
            reached_end_of_data: false,
            recorder: Some(WalDeltaRecorder::new(consumer)),
            part_recorder,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Reads whatever is left of the segment, then stores the head of the
    /// record running into the next segment.
    pub fn finish(mut self) -> Result<()> {
        io::copy(&mut self, &mut io::sink())?;
        if self.recorder.is_none() {
            return Ok(());
        }
        if !self.parser.has_current_record_beginning()
            && !self.parser.current_record_data().is_empty()
        {
            self.stop_recording(Error::CantSavePartialParser.into());
            return Ok(());
        }
        let head = self.parser.current_record_data().to_vec();
        if let Err(err) = self.part_recorder.save_next_wal_head(head) {
            self.stop_recording(err);
        }
        Ok(())
    }

    fn record_page(&mut self) {
        // Past a partial page the segment holds stale bytes from its previous
        // use; they are passed through but not decoded.
        if self.recorder.is_none() || self.reached_end_of_data {
            return;
        }
        if self.page.len() < WAL_PAGE_SIZE {
            let err = Error::FieldRead {
                field: "wal_page",
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("wal page of {} bytes", self.page.len()),
                ),
            };
            self.stop_recording(err.into());
            return;
        }

        let parsed = match self.parser.parse_records_from_page(&self.page[..]) {
            Ok(parsed) => parsed,
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::ZeroPage)) => {
                debug!(wal_file = %self.part_recorder.wal_filename, "skipping zero page");
                return;
            }
            Err(err) => {
                self.stop_recording(err);
                return;
            }
        };

        // Until the tail of the record begun in the previous segment is
        // complete, the parser accumulates it without a beginning.
        let tail_pending = !self.parser.has_current_record_beginning()
            && !self.parser.current_record_data().is_empty();
        let result = if !self.tail_saved {
            if tail_pending {
                Ok(())
            } else {
                self.tail_saved = true;
                self.part_recorder.save_previous_wal_tail(parsed.prev_record_tail)
            }
        } else if !parsed.prev_record_tail.is_empty() {
            Err(Error::CantDiscardWalData(self.part_recorder.wal_filename.clone()).into())
        } else {
            Ok(())
        }
        .and_then(|()| match &self.recorder {
            Some(recorder) => recorder.record_wal_delta(&parsed.records),
            None => Ok(()),
        });

        if let Err(err) = result {
            self.stop_recording(err);
            return;
        }
        if parsed.status == PageStatus::Partial {
            debug!(wal_file = %self.part_recorder.wal_filename, "end of valid wal data");
            self.reached_end_of_data = true;
        }
    }

    fn stop_recording(&mut self, err: anyhow::Error) {
        self.part_recorder.cancel_recording(&err);
        self.parser.invalidate();
        self.recorder = None;
    }
}

impl<R: Read> Read for WalDeltaRecordingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset == self.page.len() {
            match self.pages.read_page_data() {
                Ok(Some(page)) => {
                    self.page = page;
                    self.offset = 0;
                    self.record_page();
                }
                Ok(None) => return Ok(0),
                Err(err) => {
                    return Err(match err.downcast::<io::Error>() {
                        Ok(io_err) => io_err,
                        Err(other) => io::Error::new(io::ErrorKind::Other, other.to_string()),
                    })
                }
            }
        }
        let n = buf.len().min(self.page.len() - self.offset);
        buf[..n].copy_from_slice(&self.page[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
