//! Decoding of PostgreSQL write-ahead log pages and records.
//!
//! Only the structural parts of the log are interpreted: record headers, the
//! block references every record carries and the framing of records across
//! pages. Record payloads stay opaque byte strings.

pub mod block_location;
pub mod page;
pub mod page_reader;
pub mod parser;
pub mod parsing;
pub mod record;
pub mod types;

pub use block_location::{
    extract_block_locations, read_locations_from, write_locations_to, BlockLocationReader,
    BlockLocationWriter,
};
pub use page::{decode_page, read_page_header, PageStatus, XLogPage};
pub use page_reader::{extract_locations_from_wal, WalPageReader};
pub use parser::{ParsedPage, WalParser};
pub use record::{decode_record, read_record_header};
pub use types::*;

pub const WAL_PAGE_SIZE: usize = 8192;
pub const BLOCK_SIZE: u16 = 8192;
pub const XLOG_RECORD_ALIGNMENT: usize = 8;
pub const XLOG_RECORD_HEADER_SIZE: usize = 24;

pub const XLR_MAX_BLOCK_ID: u8 = 32;
pub const XLR_BLOCK_ID_DATA_SHORT: u8 = 255;
pub const XLR_BLOCK_ID_DATA_LONG: u8 = 254;
pub const XLR_BLOCK_ID_ORIGIN: u8 = 253;
pub const XLR_BLOCK_ID_TOPLEVEL_XID: u8 = 252;

pub const RM_XLOG_ID: u8 = 0;
pub const RM_NEXT_FREE_ID: u8 = 22;
pub const XLR_INFO_MASK: u8 = 0x0F;
pub const XLOG_SWITCH: u8 = 0x40;

pub const BKPBLOCK_FORK_MASK: u8 = 0x0F;
pub const BKPBLOCK_HAS_IMAGE: u8 = 0x10;
pub const BKPBLOCK_HAS_DATA: u8 = 0x20;
pub const BKPBLOCK_WILL_INIT: u8 = 0x40;
pub const BKPBLOCK_SAME_REL: u8 = 0x80;

pub const BKPIMAGE_HAS_HOLE: u8 = 0x01;
pub const BKPIMAGE_IS_COMPRESSED: u8 = 0x02;
pub const BKPIMAGE_APPLY: u8 = 0x04;

pub const XLP_FIRST_IS_CONTRECORD: u16 = 0x0001;
pub const XLP_LONG_HEADER: u16 = 0x0002;
pub const XLP_BKP_REMOVABLE: u16 = 0x0004;
pub const XLP_FIRST_IS_OVERWRITE_CONTRECORD: u16 = 0x0008;
pub const XLP_ALL_FLAGS: u16 = 0x000F;
