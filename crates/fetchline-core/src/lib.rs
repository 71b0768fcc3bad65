//! Fetchline Core - Download Engine
//!
//! This crate provides the resumable single-file download engine for
//! Fetchline: probing, throttled streaming, pause/resume/stop, bounded
//! retry and progress telemetry.
//!
//! ```no_run
//! use fetchline_core::{DownloadJob, JobConfig, Phase};
//!
//! # async fn run() -> Result<(), fetchline_core::FetchError> {
//! let job = DownloadJob::new(JobConfig::new("https://example.com/file.zip", "file.zip"))?;
//! job.events().subscribe_all(|event| println!("{:?}", event));
//! if job.start().await == Phase::Failed {
//!     eprintln!("{:?}", job.state().last_error);
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod events;
mod storage;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use storage::*;

pub use fetchline_types::{
    ErrorKind, EventKind, JobConfig, JobEvent, Phase, ProbeInfo, ProgressSnapshot, Settings,
    TransferState,
};
