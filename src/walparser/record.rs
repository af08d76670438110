//! Record decoding and encoding.
//!
//! A record is a fixed 24-byte header, a header section of tagged block
//! references and main-data descriptors, then the payloads those descriptors
//! announce, in order: each block's image and data, then the main data.

use std::io::Read;

use super::parsing::{is_zero, FieldReader, LeField, ShrinkableReader};
use super::{
    BlockLocation, RelFileNode, XLogRecord, XLogRecordBlock, XLogRecordBlockHeader,
    XLogRecordBlockImageHeader, XLogRecordHeader, BLOCK_SIZE, RM_NEXT_FREE_ID,
    XLOG_RECORD_HEADER_SIZE, XLR_BLOCK_ID_DATA_LONG, XLR_BLOCK_ID_DATA_SHORT,
    XLR_BLOCK_ID_ORIGIN, XLR_BLOCK_ID_TOPLEVEL_XID, XLR_MAX_BLOCK_ID,
};
use crate::{Error, Result};

/// Decodes a whole record from its bytes.
pub fn decode_record(data: &[u8]) -> Result<XLogRecord> {
    let mut reader = data;
    let header = read_record_header(&mut reader)?;
    read_record_body(header, &mut reader)
}

/// Reads and validates a record header. A header made only of zero bytes is
/// reported as [`Error::ZeroRecordHeader`].
pub fn read_record_header<R: Read + ?Sized>(reader: &mut R) -> Result<XLogRecordHeader> {
    let raw = reader.read_bytes_field(XLOG_RECORD_HEADER_SIZE, "xlog_record_header")?;
    if is_zero(&raw) {
        return Err(Error::ZeroRecordHeader.into());
    }

    let mut raw = &raw[..];
    let total_record_length = raw.read_field("xl_tot_len")?;
    let xact_id = raw.read_field("xl_xid")?;
    let prev_record_ptr = raw.read_field("xl_prev")?;
    let info = raw.read_field("xl_info")?;
    let resource_manager_id = raw.read_field("xl_rmid")?;
    raw.read_bytes_field(2, "xl_padding")?;
    let crc32_hash = raw.read_field("xl_crc")?;

    let header = XLogRecordHeader {
        total_record_length,
        xact_id,
        prev_record_ptr,
        info,
        resource_manager_id,
        crc32_hash,
    };
    check_header(&header)?;
    Ok(header)
}

fn check_header(header: &XLogRecordHeader) -> Result<()> {
    if (header.total_record_length as usize) < XLOG_RECORD_HEADER_SIZE {
        return Err(Error::InvalidRecordHeader(format!(
            "total length {} is shorter than the record header",
            header.total_record_length
        ))
        .into());
    }
    if header.resource_manager_id >= RM_NEXT_FREE_ID {
        return Err(Error::InvalidResourceManagerId(header.resource_manager_id).into());
    }
    Ok(())
}

fn read_record_body<R: Read + ?Sized>(
    header: XLogRecordHeader,
    reader: &mut R,
) -> Result<XLogRecord> {
    let mut record = XLogRecord {
        header,
        ..XLogRecord::default()
    };

    let mut block_headers = Vec::new();
    {
        let section_len = header.total_record_length as usize - XLOG_RECORD_HEADER_SIZE;
        let mut section = ShrinkableReader::new(&mut *reader, section_len);
        let mut max_block_id: i32 = -1;
        let mut prev_rel: Option<RelFileNode> = None;

        while section.remaining() > 0 {
            let block_id: u8 = section.read_field("block_id")?;
            match block_id {
                XLR_BLOCK_ID_DATA_SHORT => {
                    let len: u8 = section.read_field("main_data_len")?;
                    record.main_data_len = u32::from(len);
                    section.shrink(len as usize)?;
                }
                XLR_BLOCK_ID_DATA_LONG => {
                    let len: u32 = section.read_field("main_data_len")?;
                    record.main_data_len = len;
                    section.shrink(len as usize)?;
                }
                XLR_BLOCK_ID_ORIGIN => {
                    record.origin = Some(section.read_field("origin")?);
                }
                XLR_BLOCK_ID_TOPLEVEL_XID => {
                    record.toplevel_xid = Some(section.read_field("toplevel_xid")?);
                }
                id if id <= XLR_MAX_BLOCK_ID => {
                    if i32::from(id) <= max_block_id {
                        return Err(Error::OutOfOrderBlockId {
                            id,
                            previous: max_block_id,
                        }
                        .into());
                    }
                    max_block_id = i32::from(id);
                    let block_header = read_block_header(&mut section, id, &mut prev_rel)?;
                    block_headers.push(block_header);
                }
                id => return Err(Error::InvalidRecordBlockId(id).into()),
            }
        }
    }

    for header in block_headers {
        let image = match header.image_header {
            Some(image_header) => {
                reader.read_bytes_field(image_header.image_length as usize, "block_image")?
            }
            None => Vec::new(),
        };
        let data = if header.has_data() {
            reader.read_bytes_field(header.data_length as usize, "block_data")?
        } else {
            Vec::new()
        };
        record.blocks.push(XLogRecordBlock {
            header,
            image,
            data,
        });
    }
    record.main_data = reader.read_bytes_field(record.main_data_len as usize, "main_data")?;
    Ok(record)
}

fn read_block_header<R: Read + ?Sized>(
    section: &mut ShrinkableReader<'_, R>,
    block_id: u8,
    prev_rel: &mut Option<RelFileNode>,
) -> Result<XLogRecordBlockHeader> {
    let mut header = XLogRecordBlockHeader {
        block_id,
        fork_flags: section.read_field("fork_flags")?,
        data_length: section.read_field("data_length")?,
        ..XLogRecordBlockHeader::default()
    };
    check_block_data_state(&header)?;

    if header.has_image() {
        let image_header = read_image_header(section)?;
        section.shrink(image_header.image_length as usize)?;
        header.image_header = Some(image_header);
    }
    section.shrink(header.data_length as usize)?;

    let rel = if header.has_same_rel() {
        prev_rel.ok_or(Error::NoPrevRelFileNode(block_id))?
    } else {
        RelFileNode {
            spc_node: section.read_field("spc_node")?,
            db_node: section.read_field("db_node")?,
            rel_node: section.read_field("rel_node")?,
        }
    };
    *prev_rel = Some(rel);
    header.location = BlockLocation {
        rel,
        block_no: section.read_field("block_no")?,
    };
    Ok(header)
}

fn check_block_data_state(header: &XLogRecordBlockHeader) -> Result<()> {
    if header.has_data() && header.data_length == 0 {
        return Err(Error::InconsistentBlockData(format!(
            "block {} announces data but its data length is zero",
            header.block_id
        ))
        .into());
    }
    if !header.has_data() && header.data_length != 0 {
        return Err(Error::InconsistentBlockData(format!(
            "block {} has no data but its data length is {}",
            header.block_id, header.data_length
        ))
        .into());
    }
    Ok(())
}

fn read_image_header<R: Read + ?Sized>(reader: &mut R) -> Result<XLogRecordBlockImageHeader> {
    let mut header = XLogRecordBlockImageHeader {
        image_length: reader.read_field("image_length")?,
        hole_offset: reader.read_field("hole_offset")?,
        info: reader.read_field("image_info")?,
        hole_length: 0,
    };

    if header.is_compressed() {
        if header.has_hole() {
            header.hole_length = reader.read_field("hole_length")?;
        }
    } else {
        header.hole_length = BLOCK_SIZE.checked_sub(header.image_length).ok_or(
            Error::InconsistentImageLength {
                image_length: header.image_length,
                compressed: false,
                has_hole: header.has_hole(),
            },
        )?;
    }

    check_image_hole(&header)?;
    check_image_length(&header)?;
    Ok(header)
}

fn check_image_hole(header: &XLogRecordBlockImageHeader) -> Result<()> {
    let consistent = if header.has_hole() {
        header.hole_offset != 0 && header.hole_length != 0 && header.image_length != BLOCK_SIZE
    } else {
        header.hole_offset == 0 && header.hole_length == 0
    };
    if !consistent {
        return Err(Error::InconsistentImageHole {
            offset: header.hole_offset,
            length: header.hole_length,
            image_length: header.image_length,
        }
        .into());
    }
    Ok(())
}

fn check_image_length(header: &XLogRecordBlockImageHeader) -> Result<()> {
    let compressed = header.is_compressed();
    let has_hole = header.has_hole();
    let consistent = if compressed {
        header.image_length != BLOCK_SIZE
    } else {
        has_hole || header.image_length == BLOCK_SIZE
    };
    if !consistent {
        return Err(Error::InconsistentImageLength {
            image_length: header.image_length,
            compressed,
            has_hole,
        }
        .into());
    }
    Ok(())
}

impl XLogRecord {
    /// Encodes the record in WAL layout. The total length written is computed
    /// from the contents, not taken from `header.total_record_length`.
    pub fn encode(&self) -> Vec<u8> {
        let mut section = Vec::new();
        for block in &self.blocks {
            let header = &block.header;
            header.block_id.write_le(&mut section);
            header.fork_flags.write_le(&mut section);
            header.data_length.write_le(&mut section);
            if let Some(image) = header.image_header {
                image.image_length.write_le(&mut section);
                image.hole_offset.write_le(&mut section);
                image.info.write_le(&mut section);
                if image.is_compressed() && image.has_hole() {
                    image.hole_length.write_le(&mut section);
                }
            }
            if !header.has_same_rel() {
                header.location.rel.spc_node.write_le(&mut section);
                header.location.rel.db_node.write_le(&mut section);
                header.location.rel.rel_node.write_le(&mut section);
            }
            header.location.block_no.write_le(&mut section);
        }
        if let Some(origin) = self.origin {
            XLR_BLOCK_ID_ORIGIN.write_le(&mut section);
            origin.write_le(&mut section);
        }
        if let Some(xid) = self.toplevel_xid {
            XLR_BLOCK_ID_TOPLEVEL_XID.write_le(&mut section);
            xid.write_le(&mut section);
        }
        match u8::try_from(self.main_data.len()) {
            Ok(0) => {}
            Ok(len) => {
                XLR_BLOCK_ID_DATA_SHORT.write_le(&mut section);
                len.write_le(&mut section);
            }
            Err(_) => {
                XLR_BLOCK_ID_DATA_LONG.write_le(&mut section);
                (self.main_data.len() as u32).write_le(&mut section);
            }
        }
        for block in &self.blocks {
            section.extend_from_slice(&block.image);
            section.extend_from_slice(&block.data);
        }
        section.extend_from_slice(&self.main_data);

        let mut out = Vec::with_capacity(XLOG_RECORD_HEADER_SIZE + section.len());
        ((XLOG_RECORD_HEADER_SIZE + section.len()) as u32).write_le(&mut out);
        self.header.xact_id.write_le(&mut out);
        self.header.prev_record_ptr.write_le(&mut out);
        self.header.info.write_le(&mut out);
        self.header.resource_manager_id.write_le(&mut out);
        out.extend_from_slice(&[0, 0]);
        self.header.crc32_hash.write_le(&mut out);
        out.extend_from_slice(&section);
        out
    }
}
