//! Stateful page-by-page parsing. Records may span pages (and segments), so
//! the parser carries the bytes of the record in progress between calls.

use std::io::{Read, Write};

use super::page::{decode_page, PageStatus};
use super::parsing::{FieldReader, LeField};
use super::record::{decode_record, read_record_header};
use super::XLogRecord;
use crate::{Error, Result};

/// Records produced by one page, plus the bytes that completed a record whose
/// beginning this parser never saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub prev_record_tail: Vec<u8>,
    pub records: Vec<XLogRecord>,
    pub status: PageStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalParser {
    current_record_data: Vec<u8>,
    has_current_record_beginning: bool,
}

impl WalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parser positioned inside a record whose first bytes are `head`.
    pub fn from_current_record_head(head: Vec<u8>) -> Self {
        let mut parser = Self::new();
        parser.set_current_record_data(head);
        parser
    }

    pub fn current_record_data(&self) -> &[u8] {
        &self.current_record_data
    }

    pub fn has_current_record_beginning(&self) -> bool {
        self.has_current_record_beginning
    }

    /// Forgets the record in progress; the next page's leading fragment will
    /// be reported as a discarded tail.
    pub fn invalidate(&mut self) {
        self.current_record_data.clear();
        self.has_current_record_beginning = false;
    }

    fn set_current_record_data(&mut self, data: Vec<u8>) {
        self.has_current_record_beginning = !data.is_empty();
        self.current_record_data = data;
    }

    /// Parses one page. A page of zero bytes fails with [`Error::ZeroPage`] and
    /// leaves the parser untouched.
    pub fn parse_records_from_page<R: Read>(&mut self, reader: R) -> Result<ParsedPage> {
        let in_progress: &[u8] = if self.has_current_record_beginning {
            &self.current_record_data
        } else {
            &[]
        };
        let page = decode_page(reader, in_progress)?;

        if page.prev_record_trailing_data.len() < page.header.remaining_data_len as usize {
            // The whole page belongs to the record in progress.
            self.current_record_data
                .extend_from_slice(&page.prev_record_trailing_data);
            return Ok(ParsedPage {
                status: page.status,
                ..ParsedPage::default()
            });
        }

        let mut combined = std::mem::take(&mut self.current_record_data);
        combined.extend_from_slice(&page.prev_record_trailing_data);

        if !self.has_current_record_beginning {
            self.set_current_record_data(page.next_record_heading_data);
            return Ok(ParsedPage {
                prev_record_tail: combined,
                records: page.records,
                status: page.status,
            });
        }

        let header = read_record_header(&mut &combined[..])?;
        if header.total_record_length as usize != combined.len() {
            return Err(Error::ContinuationNotFound.into());
        }
        let record = decode_record(&combined)?;

        let mut records = Vec::with_capacity(page.records.len() + 1);
        records.push(record);
        records.extend(page.records);
        self.set_current_record_data(page.next_record_heading_data);
        Ok(ParsedPage {
            prev_record_tail: Vec::new(),
            records,
            status: page.status,
        })
    }

    /// Writes the record in progress as a `u32` length followed by its bytes.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        if !self.current_record_data.is_empty() && !self.has_current_record_beginning {
            return Err(Error::CantSavePartialParser.into());
        }
        let mut out = Vec::with_capacity(4 + self.current_record_data.len());
        (self.current_record_data.len() as u32).write_le(&mut out);
        out.extend_from_slice(&self.current_record_data);
        writer.write_all(&out)?;
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let len: u32 = reader.read_field("current_record_data_len")?;
        let data = reader.read_bytes_field(len as usize, "current_record_data")?;
        Ok(Self::from_current_record_head(data))
    }
}
