//! Periodic progress reporting
//!
//! Runs on its own timer, independent of the transfer loop's chunk cadence.
//! Each tick feeds the byte counter to the speed estimator and emits a
//! progress snapshot. The transfer state itself is only read.

use super::job::JobShared;
use fetchline_types::JobEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest accepted refresh interval
const MIN_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct ProgressPublisher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressPublisher {
    /// Start ticking every `interval`, first tick one interval from now
    pub(crate) fn spawn(shared: Arc<JobShared>, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        shared
            .estimator
            .lock()
            .reset(shared.downloaded.load(Ordering::Acquire), Instant::now());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => publish(&shared),
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop ticking and wait for the timer task to exit
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

fn publish(shared: &JobShared) {
    let downloaded = shared.downloaded.load(Ordering::Acquire);
    shared.estimator.lock().sample(downloaded, Instant::now());

    shared.events.emit(JobEvent::Progress {
        snapshot: shared.transfer_state().snapshot(),
    });
}
