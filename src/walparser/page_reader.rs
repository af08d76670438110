use std::io::Read;

use tracing::debug;

use super::block_location::extract_block_locations;
use super::page::PageStatus;
use super::parser::WalParser;
use super::parsing::read_up_to;
use super::{BlockLocation, WAL_PAGE_SIZE};
use crate::{Error, Result};

/// Splits a WAL segment stream into page-sized chunks.
pub struct WalPageReader<R: Read> {
    reader: R,
}

impl<R: Read> WalPageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// The next page, or `None` once the stream is exhausted. A short final
    /// chunk is returned as is.
    pub fn read_page_data(&mut self) -> Result<Option<Vec<u8>>> {
        let mut page = vec![0u8; WAL_PAGE_SIZE];
        let read = read_up_to(&mut self.reader, &mut page)?;
        if read == 0 {
            return Ok(None);
        }
        page.truncate(read);
        Ok(Some(page))
    }
}

/// Runs `parser` over a whole segment and collects the block locations of
/// every record it completes. Zero pages are skipped; parsing stops after a
/// partial page.
pub fn extract_locations_from_wal<R: Read>(
    parser: &mut WalParser,
    reader: R,
) -> Result<Vec<BlockLocation>> {
    let mut pages = WalPageReader::new(reader);
    let mut locations = Vec::new();
    while let Some(page) = pages.read_page_data()? {
        let parsed = match parser.parse_records_from_page(&page[..]) {
            Ok(parsed) => parsed,
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::ZeroPage)) => continue,
            Err(err) => return Err(err),
        };
        locations.extend(extract_block_locations(&parsed.records));
        if parsed.status == PageStatus::Partial {
            debug!(locations = locations.len(), "stopping at partial wal page");
            break;
        }
    }
    Ok(locations)
}
