//! Block locations and their on-disk form: four little-endian `u32`s
//! (tablespace, database, relation, block number) per location.

use std::io::{self, Read, Write};

use super::parsing::{read_up_to, LeField};
use super::{BlockLocation, RelFileNode, XLogRecord};
use crate::{Error, Result};

const LOCATION_SIZE: usize = 16;

/// Every block referenced by `records`, in record order. Records with a zero
/// header are skipped.
pub fn extract_block_locations(records: &[XLogRecord]) -> Vec<BlockLocation> {
    records
        .iter()
        .filter(|record| !record.header.is_zero())
        .flat_map(|record| record.blocks.iter().map(|block| block.header.location))
        .collect()
}

pub struct BlockLocationWriter<W: Write> {
    writer: W,
}

impl<W: Write> BlockLocationWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_location(&mut self, location: &BlockLocation) -> Result<()> {
        let mut buf = Vec::with_capacity(LOCATION_SIZE);
        location.rel.spc_node.write_le(&mut buf);
        location.rel.db_node.write_le(&mut buf);
        location.rel.rel_node.write_le(&mut buf);
        location.block_no.write_le(&mut buf);
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

pub struct BlockLocationReader<R: Read> {
    reader: R,
}

impl<R: Read> BlockLocationReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Next location, or `None` at end of input or at an all-zero entry.
    pub fn read_next(&mut self) -> Result<Option<BlockLocation>> {
        let mut buf = [0u8; LOCATION_SIZE];
        let read = read_up_to(&mut self.reader, &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if read < LOCATION_SIZE {
            return Err(Error::FieldRead {
                field: "block_location",
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated block location: {read} of {LOCATION_SIZE} bytes"),
                ),
            }
            .into());
        }
        let location = BlockLocation {
            rel: RelFileNode {
                spc_node: u32::from_le_slice(&buf[0..4]),
                db_node: u32::from_le_slice(&buf[4..8]),
                rel_node: u32::from_le_slice(&buf[8..12]),
            },
            block_no: u32::from_le_slice(&buf[12..16]),
        };
        if location == BlockLocation::default() {
            return Ok(None);
        }
        Ok(Some(location))
    }
}

pub fn write_locations_to<W: Write>(writer: W, locations: &[BlockLocation]) -> Result<()> {
    let mut writer = BlockLocationWriter::new(writer);
    for location in locations {
        writer.write_location(location)?;
    }
    Ok(())
}

pub fn read_locations_from<R: Read>(reader: R) -> Result<Vec<BlockLocation>> {
    let mut reader = BlockLocationReader::new(reader);
    let mut locations = Vec::new();
    while let Some(location) = reader.read_next()? {
        locations.push(location);
    }
    Ok(locations)
}
