//! Builders for synthetic WAL: records and page-framed segment streams.
#![allow(dead_code)]

use pgdelta::walparser::{
    BlockLocation, RelFileNode, XLogRecord, XLogRecordBlock, XLogRecordBlockHeader,
    XLogRecordHeader, BKPBLOCK_HAS_DATA, BKPBLOCK_SAME_REL, WAL_PAGE_SIZE, XLOG_RECORD_ALIGNMENT,
    XLOG_SWITCH, XLP_FIRST_IS_CONTRECORD, XLP_LONG_HEADER,
};

pub const TEST_SEGMENT_SIZE: usize = 1024 * 1024;
pub const HEAP_RMGR: u8 = 10;

pub fn rel(rel_node: u32) -> RelFileNode {
    RelFileNode::new(1663, 16384, rel_node)
}

/// A record touching `blocks` of `rel`, each block carrying four data bytes.
pub fn heap_record(rel: RelFileNode, blocks: &[u32]) -> XLogRecord {
    let mut record = XLogRecord {
        header: XLogRecordHeader {
            xact_id: 0x243,
            prev_record_ptr: 0x2aff_edc8,
            resource_manager_id: HEAP_RMGR,
            crc32_hash: 0xecf5_203c,
            ..XLogRecordHeader::default()
        },
        ..XLogRecord::default()
    };
    for (id, block_no) in blocks.iter().enumerate() {
        let fork_flags = if id == 0 {
            BKPBLOCK_HAS_DATA
        } else {
            BKPBLOCK_HAS_DATA | BKPBLOCK_SAME_REL
        };
        record.blocks.push(XLogRecordBlock {
            header: XLogRecordBlockHeader {
                block_id: id as u8,
                fork_flags,
                data_length: 4,
                image_header: None,
                location: BlockLocation { rel, block_no: *block_no },
            },
            image: Vec::new(),
            data: block_no.to_le_bytes().to_vec(),
        });
    }
    record.main_data = vec![0x5a; 12];
    record.main_data_len = 12;
    finalize(record)
}

/// A record without block references whose encoding is exactly `total_len`
/// bytes long.
pub fn filler_record(total_len: usize) -> XLogRecord {
    let short_main_len = total_len - 24 - 2;
    let main_len = if short_main_len <= 255 {
        short_main_len
    } else {
        total_len - 24 - 5
    };
    let record = XLogRecord {
        header: XLogRecordHeader {
            resource_manager_id: HEAP_RMGR,
            ..XLogRecordHeader::default()
        },
        main_data: vec![0x11; main_len],
        main_data_len: main_len as u32,
        ..XLogRecord::default()
    };
    let record = finalize(record);
    assert_eq!(record.header.total_record_length as usize, total_len);
    record
}

pub fn wal_switch_record() -> XLogRecord {
    finalize(XLogRecord {
        header: XLogRecordHeader {
            resource_manager_id: 0,
            info: XLOG_SWITCH,
            ..XLogRecordHeader::default()
        },
        ..XLogRecord::default()
    })
}

/// Sets the header's total length to the encoded length.
pub fn finalize(mut record: XLogRecord) -> XLogRecord {
    record.header.total_record_length = record.encode().len() as u32;
    record
}

/// Lays records out in WAL pages the way the server writes them.
pub struct WalStream {
    out: Vec<u8>,
    segment_size: usize,
    start_lsn: u64,
}

impl WalStream {
    pub fn new(segment_size: usize, first_segment_no: u64) -> Self {
        Self {
            out: Vec::new(),
            segment_size,
            start_lsn: first_segment_no * segment_size as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    /// Offset of the next record inside the current segment.
    pub fn segment_offset(&self) -> usize {
        self.out.len() % self.segment_size
    }

    fn start_page(&mut self, rem_len: usize) {
        let segment_start = self.out.len() % self.segment_size == 0;
        let mut info = 0u16;
        if rem_len > 0 {
            info |= XLP_FIRST_IS_CONTRECORD;
        }
        if segment_start {
            info |= XLP_LONG_HEADER;
        }
        let page_address = self.start_lsn + self.out.len() as u64;
        self.out.extend_from_slice(&0xD10Du16.to_le_bytes());
        self.out.extend_from_slice(&info.to_le_bytes());
        self.out.extend_from_slice(&1u32.to_le_bytes());
        self.out.extend_from_slice(&page_address.to_le_bytes());
        self.out.extend_from_slice(&(rem_len as u32).to_le_bytes());
        self.out.extend_from_slice(&[0u8; 4]);
        if segment_start {
            self.out.extend_from_slice(&0x6f1e_2a3b_4c5d_6e7fu64.to_le_bytes());
            self.out
                .extend_from_slice(&(self.segment_size as u32).to_le_bytes());
            self.out
                .extend_from_slice(&(WAL_PAGE_SIZE as u32).to_le_bytes());
        }
    }

    fn align(&mut self) {
        while self.out.len() % XLOG_RECORD_ALIGNMENT != 0 {
            self.out.push(0);
        }
    }

    pub fn push_bytes(&mut self, record: &[u8]) {
        self.align();
        let mut rest = record;
        let mut first = true;
        while !rest.is_empty() {
            if self.out.len() % WAL_PAGE_SIZE == 0 {
                self.start_page(if first { 0 } else { rest.len() });
            }
            let space = WAL_PAGE_SIZE - self.out.len() % WAL_PAGE_SIZE;
            let n = space.min(rest.len());
            self.out.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            first = false;
        }
    }

    pub fn push(&mut self, record: &XLogRecord) {
        self.push_bytes(&record.encode());
    }

    /// Pushes filler records until the next record would start within a few
    /// hundred bytes before `segment_offset` of the current segment.
    pub fn fill_until(&mut self, segment_offset: usize) {
        let segment_base = self.out.len() - self.segment_offset();
        let target = segment_base + segment_offset;
        while self.out.len() + 9000 < target {
            self.push(&filler_record(7000));
        }
        while self.out.len() + 300 < target {
            self.push(&filler_record(64));
        }
    }

    /// Ends the segment with an XLOG_SWITCH record followed by zeros.
    pub fn switch_segment(&mut self) {
        self.push(&wal_switch_record());
        self.pad_to_segment_end();
    }

    pub fn pad_to_segment_end(&mut self) {
        let rest = self.segment_size - self.segment_offset();
        if rest != self.segment_size {
            self.out.resize(self.out.len() + rest, 0);
        }
    }

    /// The stream cut into segments, the last one zero padded.
    pub fn into_segments(mut self) -> Vec<Vec<u8>> {
        self.pad_to_segment_end();
        self.out
            .chunks(self.segment_size)
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// The stream cut into pages, the last one zero padded.
    pub fn into_pages(mut self) -> Vec<Vec<u8>> {
        let rest = self.out.len() % WAL_PAGE_SIZE;
        if rest != 0 {
            self.out.resize(self.out.len() + WAL_PAGE_SIZE - rest, 0);
        }
        self.out
            .chunks(WAL_PAGE_SIZE)
            .map(<[u8]>::to_vec)
            .collect()
    }
}
