//! Download job - the state machine around one resumable transfer
//!
//! `start()` probes the resource, derives the resume offset from the length
//! of the partial file on disk, runs the streaming transfer with a progress
//! publisher alongside, and retries transient failures with a fixed delay.
//! Failures are reported through state and the `Error` event, never returned.

use super::estimator::SpeedEstimator;
use super::probe::probe;
use super::publisher::ProgressPublisher;
use super::stopwatch::Stopwatch;
use super::transfer::{Transfer, TransferOutcome};
use crate::error::FetchError;
use crate::events::EventBus;
use chrono::Utc;
use fetchline_types::{JobConfig, JobEvent, Phase, ProbeInfo, TransferState};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Build the HTTP client used by a job
pub fn build_client(config: &JobConfig) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(Duration::from_millis(config.timeout_ms))
        .build()?)
}

/// State shared between the job handle, the transfer loop and the publisher
pub(crate) struct JobShared {
    pub(crate) id: Uuid,
    pub(crate) config: RwLock<JobConfig>,
    pub(crate) client: RwLock<Client>,
    /// Live bandwidth cap, read at every chunk boundary
    pub(crate) max_speed: AtomicU64,
    pub(crate) events: EventBus,
    pub(crate) state: RwLock<TransferState>,
    pub(crate) downloaded: AtomicU64,
    pub(crate) paused: AtomicBool,
    pub(crate) stopped: AtomicBool,
    pub(crate) running: AtomicBool,
    pub(crate) stopwatch: Mutex<Stopwatch>,
    pub(crate) estimator: Mutex<SpeedEstimator>,
}

impl JobShared {
    /// Snapshot with the live counters and the latest speed sample merged in
    pub(crate) fn transfer_state(&self) -> TransferState {
        let mut state = self.state.read().clone();
        state.downloaded = self.downloaded.load(Ordering::Acquire);
        state.elapsed_ms = self.stopwatch.lock().elapsed().as_millis() as u64;

        let estimator = self.estimator.lock();
        let sample = estimator.latest();
        state.current_speed = sample.current;
        state.smoothed_speed = sample.smoothed;
        state.eta = estimator.time_left(state.total_size, state.downloaded);
        state
    }

    /// Clear the speed history so idle jobs report zero speed
    fn clear_speed(&self) {
        self.estimator
            .lock()
            .reset(self.downloaded.load(Ordering::Acquire), Instant::now());
    }

    /// Pending pause/stop request, stop taking precedence
    pub(crate) fn interrupt(&self) -> Option<TransferOutcome> {
        if self.stopped.load(Ordering::Acquire) {
            Some(TransferOutcome::Stopped)
        } else if self.paused.load(Ordering::Acquire) {
            Some(TransferOutcome::Paused)
        } else {
            None
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.state.write().phase = phase;
        self.events.emit(JobEvent::PhaseChanged { id: self.id, phase });
    }
}

/// A single resumable download. Cloning yields another handle to the same job.
#[derive(Clone)]
pub struct DownloadJob {
    shared: Arc<JobShared>,
}

impl DownloadJob {
    /// Create a new job in the `Idle` phase
    pub fn new(config: JobConfig) -> Result<Self, FetchError> {
        let client = build_client(&config)?;
        let id = Uuid::new_v4();

        Ok(Self {
            shared: Arc::new(JobShared {
                id,
                max_speed: AtomicU64::new(config.max_bytes_per_second),
                config: RwLock::new(config),
                client: RwLock::new(client),
                events: EventBus::new(),
                state: RwLock::new(TransferState::new(id)),
                downloaded: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                running: AtomicBool::new(false),
                stopwatch: Mutex::new(Stopwatch::new()),
                estimator: Mutex::new(SpeedEstimator::default()),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Event registration for this job
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn config(&self) -> JobConfig {
        self.shared.config.read().clone()
    }

    /// Replace the job configuration. Rejected while a transfer is running or
    /// paused, since a resume must target the same resource and file.
    pub fn update_config(&self, config: JobConfig) -> Result<(), FetchError> {
        if self.is_running() {
            return Err(FetchError::InvalidJob(
                "cannot reconfigure a running download".to_string(),
            ));
        }
        if self.phase() == Phase::Paused {
            return Err(FetchError::InvalidJob(
                "cannot reconfigure a paused download, stop it first".to_string(),
            ));
        }

        let client = build_client(&config)?;
        self.shared
            .max_speed
            .store(config.max_bytes_per_second, Ordering::Release);
        *self.shared.client.write() = client;
        *self.shared.config.write() = config;
        Ok(())
    }

    /// Change the bandwidth cap (0 = unlimited). Applies to the next chunk.
    pub fn set_max_speed(&self, bytes_per_second: u64) {
        self.shared
            .max_speed
            .store(bytes_per_second, Ordering::Release);
        self.shared.config.write().max_bytes_per_second = bytes_per_second;
        info!(
            "Speed limit for download {} set to {} bytes/sec",
            self.shared.id, bytes_per_second
        );
    }

    pub fn max_speed(&self) -> u64 {
        self.shared.max_speed.load(Ordering::Acquire)
    }

    /// Snapshot of the runtime state
    pub fn state(&self) -> TransferState {
        self.shared.transfer_state()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.read().phase
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ask the transfer to pause at the next chunk boundary. The partial file
    /// stays on disk and the next `start()` resumes from it.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        info!("Signaled pause for download {}", self.shared.id);
    }

    /// Ask the transfer to stop at the next chunk boundary. The job settles
    /// in `Idle`; a later `start()` counts as a fresh start.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        info!("Signaled stop for download {}", self.shared.id);

        // Nothing will observe the flag, settle a paused job here
        if !self.is_running() && self.phase() == Phase::Paused {
            self.shared.set_phase(Phase::Idle);
        }
    }

    /// Probe the configured URL without starting a transfer
    pub async fn probe(&self) -> Result<ProbeInfo, FetchError> {
        let config = self.config();
        let client = self.shared.client.read().clone();
        probe(
            &client,
            &config.url,
            Duration::from_millis(config.probe_timeout_ms),
        )
        .await
    }

    /// Start or resume the download and drive it until it completes, fails,
    /// pauses or stops. Returns the phase the job settled in.
    pub async fn start(&self) -> Phase {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            warn!("Download {} is already running", self.shared.id);
            return self.phase();
        }

        let phase = self.run().await;
        self.shared.running.store(false, Ordering::Release);
        phase
    }

    async fn run(&self) -> Phase {
        let config = self.config();
        let previous = self.phase();
        let resuming = previous == Phase::Paused;

        self.shared.paused.store(false, Ordering::Release);
        self.shared.stopped.store(false, Ordering::Release);
        {
            let mut state = self.shared.state.write();
            state.has_error = false;
            state.last_error = None;
            state.retry_count = 0;
            if !resuming {
                state.started_at = Some(Utc::now());
                state.completed_at = None;
            }
        }
        if !resuming {
            self.shared.stopwatch.lock().reset();
        }

        if let Err(message) = config.validate() {
            return self.fail(FetchError::InvalidJob(message));
        }

        if config.replace_existing && !resuming {
            match tokio::fs::remove_file(&config.destination).await {
                Ok(()) => info!("Removed existing file {:?}", config.destination),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return self.fail(e.into()),
            }
        }

        loop {
            let error = match self.attempt(&config).await {
                Ok(TransferOutcome::Completed) => return self.complete(),
                Ok(TransferOutcome::Paused) => return self.settle_interrupted(Phase::Paused),
                Ok(TransferOutcome::Stopped) => return self.settle_interrupted(Phase::Idle),
                Err(e) if e.is_retryable() => e,
                Err(e) => return self.fail(e),
            };

            let attempt = {
                let mut state = self.shared.state.write();
                if state.retry_count >= config.retry_limit {
                    None
                } else {
                    state.retry_count += 1;
                    Some(state.retry_count)
                }
            };

            let Some(attempt) = attempt else {
                return self.fail(FetchError::RetryExhausted {
                    attempts: config.retry_limit,
                    last: error.to_string(),
                });
            };

            warn!(
                "Download {} failed (retry {}/{}): {}",
                self.shared.id, attempt, config.retry_limit, error
            );
            self.shared.set_phase(Phase::Retrying);
            self.shared.events.emit(JobEvent::Retrying {
                id: self.shared.id,
                attempt,
                limit: config.retry_limit,
                reason: error.to_string(),
            });

            tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;

            match self.shared.interrupt() {
                Some(TransferOutcome::Paused) => return self.settle_interrupted(Phase::Paused),
                Some(_) => return self.settle_interrupted(Phase::Idle),
                None => {}
            }
        }
    }

    /// One probe + transfer pass
    async fn attempt(&self, config: &JobConfig) -> Result<TransferOutcome, FetchError> {
        let shared = &self.shared;

        shared.set_phase(Phase::Probing);
        let client = shared.client.read().clone();
        let info = probe(
            &client,
            &config.url,
            Duration::from_millis(config.probe_timeout_ms),
        )
        .await?;

        {
            let mut state = shared.state.write();
            state.total_size = Some(info.size);
            state.supports_resume = info.supports_resume;
        }

        if let Some(outcome) = shared.interrupt() {
            return Ok(outcome);
        }

        let existing = match tokio::fs::metadata(&config.destination).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let mut start_byte = if info.supports_resume { existing } else { 0 };
        if start_byte > info.size {
            warn!(
                "Partial file {:?} is larger than the remote resource ({} > {}), starting over",
                config.destination, start_byte, info.size
            );
            start_byte = 0;
        }
        shared.downloaded.store(start_byte, Ordering::Release);

        if start_byte > 0 {
            info!(
                "Resuming download {} from byte {} of {}",
                shared.id, start_byte, info.size
            );
        }

        shared.stopwatch.lock().start();
        shared.set_phase(Phase::Downloading);
        shared.events.emit(JobEvent::Started {
            id: shared.id,
            start_byte,
            total: info.size,
            supports_resume: info.supports_resume,
        });

        if start_byte == info.size {
            info!("Download {} is already complete on disk", shared.id);
            shared.stopwatch.lock().stop();
            return Ok(TransferOutcome::Completed);
        }

        let publisher = ProgressPublisher::spawn(
            shared.clone(),
            Duration::from_millis(config.refresh_interval_ms),
        );

        let url = info.final_url.unwrap_or_else(|| config.url.clone());
        let result = Transfer::new(
            shared.clone(),
            client,
            url,
            config.destination.clone(),
            start_byte,
            info.size,
            Duration::from_millis(config.timeout_ms),
        )
        .run()
        .await;

        publisher.shutdown().await;
        shared.stopwatch.lock().stop();
        result
    }

    fn complete(&self) -> Phase {
        let shared = &self.shared;
        let downloaded = shared.downloaded.load(Ordering::Acquire);

        shared.clear_speed();
        let has_error = {
            let mut state = shared.state.write();
            state.retry_count = 0;
            state.completed_at = Some(Utc::now());
            state.has_error
        };

        info!("Download {} completed ({} bytes)", shared.id, downloaded);
        shared.set_phase(Phase::Completed);
        shared.events.emit(JobEvent::Progress {
            snapshot: shared.transfer_state().snapshot(),
        });

        if !has_error {
            shared.events.emit(JobEvent::Finished {
                id: shared.id,
                downloaded,
            });
        }
        Phase::Completed
    }

    fn settle_interrupted(&self, phase: Phase) -> Phase {
        self.shared.clear_speed();
        info!(
            "Download {} interrupted at byte {} ({:?})",
            self.shared.id,
            self.shared.downloaded.load(Ordering::Acquire),
            phase
        );
        self.shared.set_phase(phase);
        phase
    }

    fn fail(&self, error: FetchError) -> Phase {
        error!("Download {} failed: {}", self.shared.id, error);
        self.shared.clear_speed();
        {
            let mut state = self.shared.state.write();
            state.has_error = true;
            state.last_error = Some(error.to_string());
        }
        self.shared.set_phase(Phase::Failed);
        self.shared.events.emit(JobEvent::Error {
            id: self.shared.id,
            kind: error.kind(),
            message: error.to_string(),
        });
        Phase::Failed
    }
}
