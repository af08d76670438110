//! Runtime configuration: WAL segment geometry, relation-file layout and the
//! log format, with environment overrides.

use std::env;

use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::walparser::{Oid, BLOCK_SIZE};
use crate::{Error, Result};

pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;
pub const MIN_WAL_SEGMENT_SIZE: u64 = 1024 * 1024;
pub const MAX_WAL_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

pub const REL_FILE_SIZE_BOUND: u64 = 1 << 30;
pub const DEFAULT_SPC_NODE: Oid = 1663;
pub const GLOBAL_SPC_NODE: Oid = 1664;

/// Oldest and newest server versions whose block-image headers are decoded.
pub const MIN_SERVER_VERSION: u32 = 90600;
pub const MAX_SERVER_VERSION: u32 = 149999;

pub const WAL_SEGMENT_SIZE_ENV: &str = "PGDELTA_WAL_SEGMENT_SIZE_MB";
pub const LOG_FORMAT_ENV: &str = "PGDELTA_LOG_FORMAT";

/// Size of a WAL segment; fixes how LSNs map to segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalLayout {
    segment_size: u64,
}

impl Default for WalLayout {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_WAL_SEGMENT_SIZE,
        }
    }
}

impl WalLayout {
    pub fn new(segment_size: u64) -> Result<Self> {
        if !segment_size.is_power_of_two()
            || !(MIN_WAL_SEGMENT_SIZE..=MAX_WAL_SEGMENT_SIZE).contains(&segment_size)
        {
            return Err(Error::Config(format!(
                "wal segment size must be a power of two between 1MB and 1GB, got {segment_size}"
            ))
            .into());
        }
        Ok(Self { segment_size })
    }

    pub fn from_megabytes(megabytes: u64) -> Result<Self> {
        Self::new(megabytes.saturating_mul(1024 * 1024))
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Segments per 4 GiB "xlog id" unit, the middle part of a WAL filename.
    pub fn segments_per_xlog_id(&self) -> u64 {
        0x1_0000_0000 / self.segment_size
    }
}

/// How relation data is split into files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelFileLayout {
    pub blocks_in_rel_file: u32,
    pub default_spc_node: Oid,
    pub global_spc_node: Oid,
}

impl Default for RelFileLayout {
    fn default() -> Self {
        Self {
            blocks_in_rel_file: (REL_FILE_SIZE_BOUND / u64::from(BLOCK_SIZE)) as u32,
            default_spc_node: DEFAULT_SPC_NODE,
            global_spc_node: GLOBAL_SPC_NODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub wal: WalLayout,
    pub rel: RelFileLayout,
    pub log_format: LogFormat,
}

impl Config {
    /// Defaults overridden by `PGDELTA_WAL_SEGMENT_SIZE_MB` and
    /// `PGDELTA_LOG_FORMAT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = env::var(WAL_SEGMENT_SIZE_ENV) {
            let megabytes: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{WAL_SEGMENT_SIZE_ENV} is not a number: {raw}"))
            })?;
            config.wal = WalLayout::from_megabytes(megabytes)?;
        }
        if let Ok(raw) = env::var(LOG_FORMAT_ENV) {
            config.log_format = match raw.trim().to_ascii_lowercase().as_str() {
                "human" | "text" => LogFormat::Human,
                "json" => LogFormat::Json,
                other => {
                    return Err(
                        Error::Config(format!("{LOG_FORMAT_ENV} must be human or json, got {other}"))
                            .into(),
                    )
                }
            };
        }
        Ok(config)
    }

    /// Checks that a server's settings can be handled with this configuration.
    pub fn validate_server(
        &self,
        version_num: u32,
        block_size: u32,
        wal_segment_size: u64,
    ) -> Result<()> {
        if !(MIN_SERVER_VERSION..=MAX_SERVER_VERSION).contains(&version_num) {
            return Err(Error::UnsupportedServerVersion(version_num).into());
        }
        if block_size != u32::from(BLOCK_SIZE) {
            return Err(Error::Config(format!(
                "server block size {block_size} differs from {BLOCK_SIZE}"
            ))
            .into());
        }
        if wal_segment_size != self.wal.segment_size() {
            return Err(Error::Config(format!(
                "server wal segment size {wal_segment_size} differs from configured {}",
                self.wal.segment_size()
            ))
            .into());
        }
        Ok(())
    }
}
