use serde::{Deserialize, Serialize};

use super::{
    BKPBLOCK_FORK_MASK, BKPBLOCK_HAS_DATA, BKPBLOCK_HAS_IMAGE, BKPBLOCK_SAME_REL,
    BKPBLOCK_WILL_INIT, BKPIMAGE_APPLY, BKPIMAGE_HAS_HOLE, BKPIMAGE_IS_COMPRESSED, RM_XLOG_ID,
    XLOG_SWITCH, XLR_INFO_MASK,
};

pub type Oid = u32;

/// Physical identity of a relation: tablespace, database and relation file.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RelFileNode {
    pub spc_node: Oid,
    pub db_node: Oid,
    pub rel_node: Oid,
}

impl RelFileNode {
    pub fn new(spc_node: Oid, db_node: Oid, rel_node: Oid) -> Self {
        Self {
            spc_node,
            db_node,
            rel_node,
        }
    }
}

/// A block of a relation touched by some record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockLocation {
    pub rel: RelFileNode,
    pub block_no: u32,
}

impl BlockLocation {
    pub fn new(spc_node: Oid, db_node: Oid, rel_node: Oid, block_no: u32) -> Self {
        Self {
            rel: RelFileNode::new(spc_node, db_node, rel_node),
            block_no,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XLogRecordHeader {
    pub total_record_length: u32,
    pub xact_id: u32,
    pub prev_record_ptr: u64,
    pub info: u8,
    pub resource_manager_id: u8,
    pub crc32_hash: u32,
}

impl XLogRecordHeader {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XLogRecordBlockImageHeader {
    pub image_length: u16,
    pub hole_offset: u16,
    pub hole_length: u16,
    pub info: u8,
}

impl XLogRecordBlockImageHeader {
    pub fn has_hole(&self) -> bool {
        self.info & BKPIMAGE_HAS_HOLE != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.info & BKPIMAGE_IS_COMPRESSED != 0
    }

    pub fn apply(&self) -> bool {
        self.info & BKPIMAGE_APPLY != 0
    }
}

/// Header of one block reference. `image_header` is present exactly when the
/// fork flags carry `BKPBLOCK_HAS_IMAGE`; the decoder and encoder keep the two
/// in step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XLogRecordBlockHeader {
    pub block_id: u8,
    pub fork_flags: u8,
    pub data_length: u16,
    pub image_header: Option<XLogRecordBlockImageHeader>,
    pub location: BlockLocation,
}

impl XLogRecordBlockHeader {
    pub fn fork_num(&self) -> u8 {
        self.fork_flags & BKPBLOCK_FORK_MASK
    }

    pub fn has_image(&self) -> bool {
        self.fork_flags & BKPBLOCK_HAS_IMAGE != 0
    }

    pub fn has_data(&self) -> bool {
        self.fork_flags & BKPBLOCK_HAS_DATA != 0
    }

    pub fn will_init(&self) -> bool {
        self.fork_flags & BKPBLOCK_WILL_INIT != 0
    }

    pub fn has_same_rel(&self) -> bool {
        self.fork_flags & BKPBLOCK_SAME_REL != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XLogRecordBlock {
    pub header: XLogRecordBlockHeader,
    pub image: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XLogRecord {
    pub header: XLogRecordHeader,
    pub origin: Option<u16>,
    pub toplevel_xid: Option<u32>,
    pub main_data_len: u32,
    pub blocks: Vec<XLogRecordBlock>,
    pub main_data: Vec<u8>,
}

impl XLogRecord {
    /// An XLOG_SWITCH record ends the segment; the rest of it is padding.
    pub fn is_wal_switch(&self) -> bool {
        self.header.resource_manager_id == RM_XLOG_ID
            && self.header.info & !XLR_INFO_MASK == XLOG_SWITCH
    }
}
