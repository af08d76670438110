//! A delta file: the block locations touched by one group of WAL segments,
//! prefixed by the parser state needed to continue into the next group.
//!
//! Locations reach a delta file through a channel owned by its writer; a
//! background thread appends them until the writer is closed.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::warn;

use crate::walparser::{read_locations_from, write_locations_to, BlockLocation, WalParser};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaFile {
    pub locations: Vec<BlockLocation>,
    pub wal_parser: WalParser,
}

impl DeltaFile {
    pub fn new(wal_parser: WalParser) -> Self {
        Self {
            locations: Vec::new(),
            wal_parser,
        }
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.wal_parser.save(writer)?;
        write_locations_to(writer, &self.locations)
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let wal_parser = WalParser::load(reader)?;
        let locations = read_locations_from(reader)?;
        Ok(Self {
            locations,
            wal_parser,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.save(&mut out)?;
        Ok(out)
    }
}

enum WriterMessage {
    Locations(Vec<BlockLocation>),
    Close,
}

/// Sending half handed to recorders. Cheap to clone.
#[derive(Clone, Debug)]
pub struct BlockLocationConsumer {
    delta_filename: Arc<str>,
    sender: Sender<WriterMessage>,
}

impl BlockLocationConsumer {
    pub fn send(&self, locations: Vec<BlockLocation>) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }
        self.sender
            .send(WriterMessage::Locations(locations))
            .map_err(|_| Error::DeltaFileWriterClosed(self.delta_filename.to_string()).into())
    }

    pub fn delta_filename(&self) -> &str {
        &self.delta_filename
    }
}

/// Owns a delta file and the thread appending incoming locations to it.
pub struct DeltaFileWriter {
    delta_filename: Arc<str>,
    delta_file: Arc<Mutex<DeltaFile>>,
    sender: Sender<WriterMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeltaFileWriter {
    pub fn spawn(delta_filename: &str, delta_file: DeltaFile) -> Result<Self> {
        let delta_filename: Arc<str> = Arc::from(delta_filename);
        let delta_file = Arc::new(Mutex::new(delta_file));
        let (sender, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name(format!("delta-writer-{delta_filename}"))
            .spawn({
                let delta_file = Arc::clone(&delta_file);
                move || consume_locations(receiver, delta_file)
            })?;
        Ok(Self {
            delta_filename,
            delta_file,
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn consumer(&self) -> BlockLocationConsumer {
        BlockLocationConsumer {
            delta_filename: Arc::clone(&self.delta_filename),
            sender: self.sender.clone(),
        }
    }

    pub fn set_wal_parser(&self, wal_parser: WalParser) {
        self.delta_file.lock().wal_parser = wal_parser;
    }

    /// Stops accepting locations and waits until every location sent before
    /// the close has been appended. Idempotent.
    pub fn close(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.sender.send(WriterMessage::Close);
        if handle.join().is_err() {
            warn!(delta_file = %self.delta_filename, "delta file writer thread panicked");
        }
    }

    /// Current contents of the delta file.
    pub fn snapshot(&self) -> DeltaFile {
        self.delta_file.lock().clone()
    }
}

impl Drop for DeltaFileWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn consume_locations(receiver: Receiver<WriterMessage>, delta_file: Arc<Mutex<DeltaFile>>) {
    for message in receiver {
        match message {
            WriterMessage::Locations(locations) => {
                delta_file.lock().locations.extend(locations);
            }
            WriterMessage::Close => break,
        }
    }
}
