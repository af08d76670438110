//! Delta recording: turning archived WAL segments into per-group delta files.

pub mod delta_file;
pub mod manager;
pub mod part_file;
pub mod recorder;

pub use delta_file::{BlockLocationConsumer, DeltaFile, DeltaFileWriter};
pub use manager::DeltaFileManager;
pub use part_file::WalPartFile;
pub use recorder::{WalDeltaRecorder, WalDeltaRecordingReader, WalPartRecorder};
