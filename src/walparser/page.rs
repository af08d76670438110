//! Page-level framing. Every 8 KiB WAL page starts with a header that tells
//! how many bytes of the previous page's last record continue on this page;
//! whole records follow at 8-byte alignment, and the last one may run off the
//! end of the page.

use std::io::Read;

use super::parsing::{is_zero, read_up_to, rest_is_zero, AlignedReader, FieldReader};
use super::record::{decode_record, read_record_header};
use super::{
    XLogRecord, WAL_PAGE_SIZE, XLOG_RECORD_ALIGNMENT, XLOG_RECORD_HEADER_SIZE, XLP_ALL_FLAGS,
    XLP_LONG_HEADER,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XLogLongPageHeader {
    pub system_id: u64,
    pub segment_size: u32,
    pub block_size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XLogPageHeader {
    pub magic: u16,
    pub info: u16,
    pub timeline: u32,
    pub page_address: u64,
    pub remaining_data_len: u32,
    pub long_header: Option<XLogLongPageHeader>,
}

/// Whether decoding reached the end of the page or stopped at a zero tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageStatus {
    #[default]
    Complete,
    /// The page ends in zero bytes where a record was expected: the end of
    /// valid data in a partially written segment.
    Partial,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XLogPage {
    pub header: XLogPageHeader,
    pub prev_record_trailing_data: Vec<u8>,
    pub records: Vec<XLogRecord>,
    pub next_record_heading_data: Vec<u8>,
    pub status: PageStatus,
}

impl XLogPage {
    fn with_trailing_data(header: XLogPageHeader, trailing: Vec<u8>) -> Self {
        Self {
            header,
            prev_record_trailing_data: trailing,
            ..Self::default()
        }
    }
}

/// Reads a page header and skips the padding after it.
pub fn read_page_header<R: Read>(reader: &mut AlignedReader<R>) -> Result<XLogPageHeader> {
    let mut header = XLogPageHeader {
        magic: reader.read_field("xlp_magic")?,
        info: reader.read_field("xlp_info")?,
        timeline: reader.read_field("xlp_tli")?,
        page_address: reader.read_field("xlp_pageaddr")?,
        remaining_data_len: reader.read_field("xlp_rem_len")?,
        long_header: None,
    };
    if header == XLogPageHeader::default() {
        return Err(Error::ZeroPageHeader.into());
    }
    if header.info & !XLP_ALL_FLAGS != 0 {
        return Err(
            Error::InvalidPageHeader(format!("unknown info flags {:#06x}", header.info)).into(),
        );
    }

    if header.info & XLP_LONG_HEADER != 0 {
        reader.read_to_alignment()?;
        let long_header = XLogLongPageHeader {
            system_id: reader.read_field("xlp_sysid")?,
            segment_size: reader.read_field("xlp_seg_size")?,
            block_size: reader.read_field("xlp_xlog_blcksz")?,
        };
        if long_header.block_size as usize != WAL_PAGE_SIZE {
            return Err(Error::InvalidPageHeader(format!(
                "page size {} is not supported",
                long_header.block_size
            ))
            .into());
        }
        header.long_header = Some(long_header);
    }
    reader.read_to_alignment()?;
    Ok(header)
}

/// Decodes one page. `in_progress` holds the bytes of a record started on the
/// previous page, if known; it is consulted only to spot an XLOG_SWITCH record
/// finishing on this page, after which the rest of the page is padding.
///
/// A page made only of zero bytes fails with [`Error::ZeroPage`].
pub fn decode_page<R: Read>(reader: R, in_progress: &[u8]) -> Result<XLogPage> {
    let mut reader = AlignedReader::new(reader, XLOG_RECORD_ALIGNMENT);
    let header = match read_page_header(&mut reader) {
        Ok(header) => header,
        Err(err) => {
            if matches!(err.downcast_ref::<Error>(), Some(Error::ZeroPageHeader))
                && rest_is_zero(&mut reader)?
            {
                return Err(Error::ZeroPage.into());
            }
            return Err(err);
        }
    };

    let declared = header.remaining_data_len as usize;
    let mut trailing = vec![0u8; declared.min(WAL_PAGE_SIZE)];
    let read = read_up_to(&mut reader, &mut trailing)?;
    trailing.truncate(read);
    if read != declared {
        // The previous record continues past this page.
        return Ok(XLogPage::with_trailing_data(header, trailing));
    }

    if ends_with_wal_switch(in_progress, &trailing)? {
        return Ok(XLogPage::with_trailing_data(header, trailing));
    }

    let mut page = XLogPage::with_trailing_data(header, trailing);
    loop {
        match try_read_record_data(&mut reader) {
            Ok(RecordData::Whole(data)) => {
                let record = decode_record(&data)?;
                let is_switch = record.is_wal_switch();
                page.records.push(record);
                if is_switch {
                    return Ok(page);
                }
            }
            Ok(RecordData::Heading(data)) => {
                page.next_record_heading_data = data;
                return Ok(page);
            }
            Err(err) => {
                if matches!(err.downcast_ref::<Error>(), Some(Error::ZeroRecordHeader))
                    && rest_is_zero(&mut reader)?
                {
                    page.status = PageStatus::Partial;
                    return Ok(page);
                }
                return Err(err);
            }
        }
    }
}

fn ends_with_wal_switch(in_progress: &[u8], trailing: &[u8]) -> Result<bool> {
    if in_progress.is_empty() {
        return Ok(false);
    }
    let mut combined = Vec::with_capacity(in_progress.len() + trailing.len());
    combined.extend_from_slice(in_progress);
    combined.extend_from_slice(trailing);
    if combined.len() < XLOG_RECORD_HEADER_SIZE {
        return Ok(false);
    }
    let header = read_record_header(&mut &combined[..])?;
    if (header.total_record_length as usize) > combined.len() {
        return Ok(false);
    }
    Ok(decode_record(&combined)?.is_wal_switch())
}

enum RecordData {
    Whole(Vec<u8>),
    /// Start of a record that continues on the next page.
    Heading(Vec<u8>),
}

fn try_read_record_data<R: Read>(reader: &mut AlignedReader<R>) -> Result<RecordData> {
    reader.read_to_alignment()?;

    let mut data = vec![0u8; XLOG_RECORD_HEADER_SIZE];
    let read = read_up_to(reader, &mut data)?;
    if read < XLOG_RECORD_HEADER_SIZE {
        data.truncate(read);
        if read > 0 && is_zero(&data) {
            return Err(Error::ZeroRecordHeader.into());
        }
        return Ok(RecordData::Heading(data));
    }

    let header = read_record_header(&mut &data[..])?;
    let body_len = header.total_record_length as usize - XLOG_RECORD_HEADER_SIZE;
    let read = (&mut *reader).take(body_len as u64).read_to_end(&mut data)?;
    if read < body_len {
        return Ok(RecordData::Heading(data));
    }
    Ok(RecordData::Whole(data))
}
