//! Logging initialization using `tracing` and `tracing-subscriber`.

use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Outcome of one flush of the delta file manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeltaFlushSnapshot {
    pub part_files_saved: u64,
    pub part_files_canceled: u64,
    pub delta_files_uploaded: u64,
    pub delta_files_saved: u64,
    pub delta_files_canceled: u64,
    pub failed: u64,
}

/// Initialize global tracing subscriber. Safe to call multiple times; subsequent
/// calls will no-op.
pub fn init_logging(format: LogFormat) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Human => {
            let _ = builder.finish().try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().try_init();
        }
    };

    Ok(())
}

/// Emit the result of a delta flush; escalated to a warning when anything
/// failed to persist.
pub fn log_delta_flush(snapshot: DeltaFlushSnapshot) {
    if snapshot.failed > 0 {
        warn!(
            target = "pgdelta::delta",
            part_files_saved = snapshot.part_files_saved,
            part_files_canceled = snapshot.part_files_canceled,
            delta_files_uploaded = snapshot.delta_files_uploaded,
            delta_files_saved = snapshot.delta_files_saved,
            delta_files_canceled = snapshot.delta_files_canceled,
            failed = snapshot.failed,
            "delta_flush_incomplete"
        );
    } else {
        info!(
            target = "pgdelta::delta",
            part_files_saved = snapshot.part_files_saved,
            part_files_canceled = snapshot.part_files_canceled,
            delta_files_uploaded = snapshot.delta_files_uploaded,
            delta_files_saved = snapshot.delta_files_saved,
            delta_files_canceled = snapshot.delta_files_canceled,
            "delta_flush"
        );
    }
}
