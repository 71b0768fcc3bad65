//! Download Engine - The heart of Fetchline
//!
//! This module implements a single-stream resumable download engine with:
//! - HEAD probing for size and range support
//! - Resume from the length of the partial file on disk
//! - Pacing rate limiter with a live-adjustable cap
//! - Cooperative pause/stop at chunk boundaries
//! - Bounded retry with a fixed backoff
//! - Periodic speed/ETA telemetry

mod estimator;
mod job;
mod probe;
mod publisher;
mod rate_limiter;
mod stopwatch;
mod transfer;

pub use estimator::*;
pub use job::{build_client, DownloadJob};
pub use probe::{probe, DEFAULT_PROBE_TIMEOUT};
pub use rate_limiter::*;
pub use stopwatch::*;
