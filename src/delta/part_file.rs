//! Reassembly of records that straddle WAL segment boundaries.
//!
//! Each segment of a delta group is recorded independently, so a record that
//! starts at the end of segment `i` and finishes at the start of segment
//! `i + 1` is seen by two different workers. The first keeps the record's head
//! in `wal_heads[i]`, the second the tail in `wal_tails[i + 1]`; the head that
//! crosses into the group from the previous one is `previous_wal_head`.

use std::io::{Read, Write};

use crate::walparser::parsing::{read_up_to, FieldReader, LeField};
use crate::walparser::{decode_record, XLogRecord};
use crate::wal::WAL_FILES_IN_DELTA;
use crate::{Error, Result};

const GROUP_LEN: usize = WAL_FILES_IN_DELTA as usize;

const PREVIOUS_WAL_HEAD: u8 = 0;
const WAL_HEAD: u8 = 1;
const WAL_TAIL: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalPartFile {
    pub wal_tails: Vec<Option<Vec<u8>>>,
    pub previous_wal_head: Option<Vec<u8>>,
    pub wal_heads: Vec<Option<Vec<u8>>>,
}

impl Default for WalPartFile {
    fn default() -> Self {
        Self::new()
    }
}

impl WalPartFile {
    pub fn new() -> Self {
        Self {
            wal_tails: vec![None; GROUP_LEN],
            previous_wal_head: None,
            wal_heads: vec![None; GROUP_LEN],
        }
    }

    /// Every head and tail of the group is known.
    pub fn is_complete(&self) -> bool {
        self.previous_wal_head.is_some()
            && self.wal_heads.iter().all(Option::is_some)
            && self.wal_tails.iter().all(Option::is_some)
    }

    /// Decodes the records formed by joining each head with the matching
    /// tail. Pairs where both sides are empty hold no record.
    pub fn combine_records(&self) -> Result<Vec<XLogRecord>> {
        let heads = std::iter::once(&self.previous_wal_head).chain(self.wal_heads.iter());
        let mut records = Vec::new();
        for (head, tail) in heads.zip(self.wal_tails.iter()) {
            let mut data = head.clone().unwrap_or_default();
            data.extend_from_slice(tail.as_deref().unwrap_or_default());
            if data.is_empty() {
                continue;
            }
            records.push(decode_record(&data)?);
        }
        Ok(records)
    }

    /// Position of the first recorded segment of a group whose recording
    /// began midway, or `None` when the group was entered from the previous
    /// one or nothing is recorded yet. A segment with only one of its head
    /// and tail known is an error.
    pub fn partially_filled_index(&self) -> Result<Option<usize>> {
        if self.previous_wal_head.is_some() {
            return Ok(None);
        }
        for (index, (head, tail)) in self.wal_heads.iter().zip(&self.wal_tails).enumerate() {
            match (head.is_some(), tail.is_some()) {
                (true, true) => return Ok(Some(index)),
                (false, false) => {}
                _ => {
                    return Err(Error::InvalidWalPart(format!(
                        "head and tail disagree at position {index}"
                    ))
                    .into())
                }
            }
        }
        Ok(None)
    }

    /// Marks the segments before `index` as holding no crossing records. The
    /// tail at `index` ends a record whose head was never recorded, so it is
    /// dropped as well.
    pub fn complete_up_to(&mut self, index: usize) {
        self.previous_wal_head = Some(Vec::new());
        for position in 0..index.min(GROUP_LEN) {
            self.wal_heads[position] = Some(Vec::new());
            self.wal_tails[position] = Some(Vec::new());
        }
        if let Some(tail) = self.wal_tails.get_mut(index) {
            *tail = Some(Vec::new());
        }
    }

    /// Head of the record left in progress at the end of the group.
    pub fn last_wal_head(&self) -> Vec<u8> {
        self.wal_heads
            .last()
            .cloned()
            .flatten()
            .unwrap_or_default()
    }

    /// Writes the known parts as tagged entries: kind `u8`, position `u8`,
    /// length `u32`, bytes. Unknown parts are omitted.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut out = Vec::new();
        if let Some(head) = &self.previous_wal_head {
            write_part(&mut out, PREVIOUS_WAL_HEAD, 0, head);
        }
        for (position, head) in self.wal_heads.iter().enumerate() {
            if let Some(head) = head {
                write_part(&mut out, WAL_HEAD, position as u8, head);
            }
        }
        for (position, tail) in self.wal_tails.iter().enumerate() {
            if let Some(tail) = tail {
                write_part(&mut out, WAL_TAIL, position as u8, tail);
            }
        }
        writer.write_all(&out)?;
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let mut part_file = Self::new();
        loop {
            let mut kind = [0u8; 1];
            if read_up_to(reader, &mut kind)? == 0 {
                return Ok(part_file);
            }
            let position: u8 = reader.read_field("wal_part_position")?;
            let len: u32 = reader.read_field("wal_part_len")?;
            let data = reader.read_bytes_field(len as usize, "wal_part_data")?;

            let index = position as usize;
            if index >= GROUP_LEN {
                return Err(Error::InvalidWalPart(format!("position {position} out of range")).into());
            }
            match kind[0] {
                PREVIOUS_WAL_HEAD => part_file.previous_wal_head = Some(data),
                WAL_HEAD => part_file.wal_heads[index] = Some(data),
                WAL_TAIL => part_file.wal_tails[index] = Some(data),
                other => {
                    return Err(Error::InvalidWalPart(format!("unknown part kind {other}")).into())
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.save(&mut out)?;
        Ok(out)
    }
}

fn write_part(out: &mut Vec<u8>, kind: u8, position: u8, data: &[u8]) {
    kind.write_le(out);
    position.write_le(out);
    (data.len() as u32).write_le(out);
    out.extend_from_slice(data);
}
