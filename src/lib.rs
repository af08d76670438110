use thiserror::Error;

pub mod cli;
pub mod config;
pub mod delta;
pub mod deltamap;
pub mod logging;
pub mod storage;
pub mod wal;
pub mod walparser;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read field '{field}'")]
    FieldRead {
        field: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("the whole page consists only of zero bytes")]
    ZeroPage,
    #[error("page header consists only of zero bytes")]
    ZeroPageHeader,
    #[error("record header consists only of zero bytes")]
    ZeroRecordHeader,
    #[error("invalid page header: {0}")]
    InvalidPageHeader(String),
    #[error("invalid record header: {0}")]
    InvalidRecordHeader(String),
    #[error("invalid resource manager id: {0}")]
    InvalidResourceManagerId(u8),
    #[error("invalid block id: {0}")]
    InvalidRecordBlockId(u8),
    #[error("out of order block id {id}, previous block id {previous}")]
    OutOfOrderBlockId { id: u8, previous: i32 },
    #[error("block {0} refers to the previous relation, but no relation was read before")]
    NoPrevRelFileNode(u8),
    #[error("inconsistent block data: {0}")]
    InconsistentBlockData(String),
    #[error("inconsistent image hole: offset {offset}, length {length}, image length {image_length}")]
    InconsistentImageHole {
        offset: u16,
        length: u16,
        image_length: u16,
    },
    #[error("inconsistent image length {image_length} (compressed: {compressed}, has hole: {has_hole})")]
    InconsistentImageLength {
        image_length: u16,
        compressed: bool,
        has_hole: bool,
    },
    #[error("record payload of {requested} bytes exceeds the {remaining} bytes left in the record")]
    RecordLengthOverrun { requested: usize, remaining: usize },
    #[error("continuation of the previous record was not found on the page")]
    ContinuationNotFound,
    #[error("wal parser holds part of a record without its beginning and cannot be saved")]
    CantSavePartialParser,
    #[error("wal data would be discarded while recording {0}")]
    CantDiscardWalData(String),
    #[error("delta file writer for {0} is closed")]
    DeltaFileWriterClosed(String),
    #[error("object not found in storage: {0}")]
    ObjectNotFound(String),
    #[error("invalid wal part entry: {0}")]
    InvalidWalPart(String),
    #[error("not a wal segment filename: {0}")]
    NotWalFilename(String),
    #[error("incorrect segment number in wal filename: {0}")]
    IncorrectLogSegNo(String),
    #[error("invalid lsn: {0}")]
    InvalidLsn(String),
    #[error("no bitmap found for {0}")]
    NoBitmapFound(String),
    #[error("unknown tablespace in path: {0}")]
    UnknownTablespace(String),
    #[error("invalid relation file path: {0}")]
    InvalidRelFilePath(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unsupported postgres server version: {0}")]
    UnsupportedServerVersion(u32),
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let config = config::Config::from_env()?;
    logging::init_logging(config.log_format)?;

    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    cli::dispatch(cli_args, &config)
}
