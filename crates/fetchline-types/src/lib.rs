//! Shared types for Fetchline
//!
//! This crate contains the plain data structures used by the download
//! engine and the CLI: job descriptors, runtime state snapshots, settings
//! and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Size of a single read from the remote stream
pub const CHUNK_SIZE: usize = 4096;

/// Maximum number of speed samples kept for the smoothed rate
pub const SPEED_HISTORY_LEN: usize = 10;

// ============================================================================
// Job Types
// ============================================================================

/// Describes a single download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub url: String,
    pub destination: PathBuf,
    /// Bandwidth cap in bytes per second (0 = unlimited)
    #[serde(default)]
    pub max_bytes_per_second: u64,
    /// Number of retries allowed after a transient failure
    pub retry_limit: u32,
    /// Connect timeout and per-chunk read timeout
    pub timeout_ms: u64,
    /// Timeout of the metadata request
    pub probe_timeout_ms: u64,
    /// Interval between progress snapshots
    pub refresh_interval_ms: u64,
    /// Delay before each retry attempt
    pub retry_delay_ms: u64,
    /// Delete an existing destination file when a fresh start is requested
    pub replace_existing: bool,
    pub user_agent: String,
}

impl JobConfig {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self::from_settings(url, destination, &Settings::default())
    }

    /// Build a job descriptor using stored settings as defaults
    pub fn from_settings(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        settings: &Settings,
    ) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            max_bytes_per_second: settings.max_bytes_per_second,
            retry_limit: settings.retry_limit,
            timeout_ms: settings.timeout_ms,
            probe_timeout_ms: settings.probe_timeout_ms,
            refresh_interval_ms: settings.refresh_interval_ms,
            retry_delay_ms: settings.retry_delay_ms,
            replace_existing: settings.replace_existing,
            user_agent: settings.user_agent.clone(),
        }
    }

    /// Check that the job can be started and return the parsed URL
    pub fn validate(&self) -> Result<url::Url, String> {
        if self.url.trim().is_empty() {
            return Err("URL is empty".to_string());
        }
        if self.destination.as_os_str().is_empty() {
            return Err("Destination path is empty".to_string());
        }

        let parsed = url::Url::parse(self.url.trim())
            .map_err(|e| format!("Invalid URL {}: {}", self.url, e))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(format!("Unsupported scheme: {}", other)),
        }
    }

    /// Best-effort file name taken from the last URL path segment
    pub fn filename_from_url(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|s| s.last().map(|s| s.to_string()))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "download".to_string())
    }
}

/// Lifecycle phase of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Probing,
    Downloading,
    Paused,
    Retrying,
    Failed,
    Completed,
}

impl Phase {
    /// Whether the job is doing work right now
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Probing | Phase::Downloading | Phase::Retrying)
    }
}

/// Read-only view of a job's runtime state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferState {
    pub id: Uuid,
    pub phase: Phase,
    /// Remote size, unknown until the probe succeeds
    pub total_size: Option<u64>,
    pub supports_resume: bool,
    pub has_error: bool,
    pub last_error: Option<String>,
    pub downloaded: u64,
    /// Instantaneous speed of the last sample (bytes/sec)
    pub current_speed: u64,
    /// Mean of the recent samples (bytes/sec)
    pub smoothed_speed: u64,
    /// Seconds remaining, `None` while unknown
    pub eta: Option<u64>,
    /// Time spent actively transferring
    pub elapsed_ms: u64,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferState {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            phase: Phase::Idle,
            total_size: None,
            supports_resume: false,
            has_error: false,
            last_error: None,
            downloaded: 0,
            current_speed: 0,
            smoothed_speed: 0,
            eta: None,
            elapsed_ms: 0,
            retry_count: 0,
            started_at: None,
            completed_at: None,
        }
    }

    /// Percent complete, `None` until the total size is known
    pub fn progress(&self) -> Option<f64> {
        percent(self.downloaded, self.total_size)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            id: self.id,
            downloaded: self.downloaded,
            total: self.total_size,
            speed: self.current_speed,
            smoothed_speed: self.smoothed_speed,
            percent: self.progress(),
            eta: self.eta,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Percentage of `total` covered by `downloaded`, clamped to [0, 100]
pub fn percent(downloaded: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => {
            Some(((downloaded as f64 / total as f64) * 100.0).clamp(0.0, 100.0))
        }
        _ => None,
    }
}

/// Immutable progress sample delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub id: Uuid,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub speed: u64,
    pub smoothed_speed: u64,
    pub percent: Option<f64>,
    pub eta: Option<u64>, // seconds
    pub elapsed_ms: u64,
}

/// Result of a metadata request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub url: String,
    pub final_url: Option<String>,
    pub size: u64,
    pub supports_resume: bool,
    pub content_type: Option<String>,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Stored defaults applied to new jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub max_bytes_per_second: u64,
    pub retry_limit: u32,
    pub timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub refresh_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub replace_existing: bool,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            max_bytes_per_second: 0,
            retry_limit: 5,
            timeout_ms: 20_000,
            probe_timeout_ms: 5_000,
            refresh_interval_ms: 1_000,
            retry_delay_ms: 2_000,
            replace_existing: true,
            user_agent: concat!("Fetchline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    /// Keys accepted by [`Settings::get`] and [`Settings::set`]
    pub const KEYS: &'static [&'static str] = &[
        "download_dir",
        "max_bytes_per_second",
        "retry_limit",
        "timeout_ms",
        "probe_timeout_ms",
        "refresh_interval_ms",
        "retry_delay_ms",
        "replace_existing",
        "user_agent",
    ];

    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "download_dir" => self.download_dir.display().to_string(),
            "max_bytes_per_second" => self.max_bytes_per_second.to_string(),
            "retry_limit" => self.retry_limit.to_string(),
            "timeout_ms" => self.timeout_ms.to_string(),
            "probe_timeout_ms" => self.probe_timeout_ms.to_string(),
            "refresh_interval_ms" => self.refresh_interval_ms.to_string(),
            "retry_delay_ms" => self.retry_delay_ms.to_string(),
            "replace_existing" => self.replace_existing.to_string(),
            "user_agent" => self.user_agent.clone(),
            _ => return None,
        };
        Some(value)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("Invalid value for {}: {}", key, value))
        }

        match key {
            "download_dir" => self.download_dir = PathBuf::from(value),
            "max_bytes_per_second" => self.max_bytes_per_second = parse(key, value)?,
            "retry_limit" => self.retry_limit = parse(key, value)?,
            "timeout_ms" => self.timeout_ms = parse(key, value)?,
            "probe_timeout_ms" => self.probe_timeout_ms = parse(key, value)?,
            "refresh_interval_ms" => self.refresh_interval_ms = parse(key, value)?,
            "retry_delay_ms" => self.retry_delay_ms = parse(key, value)?,
            "replace_existing" => self.replace_existing = parse(key, value)?,
            "user_agent" => self.user_agent = value.to_string(),
            other => return Err(format!("Unknown setting: {}", other)),
        }
        Ok(())
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Classification of terminal failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Probe,
    NotFound,
    Transfer,
    RetryExhausted,
    InvalidJob,
}

/// Events emitted by a job to its subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum JobEvent {
    Started {
        id: Uuid,
        start_byte: u64,
        total: u64,
        supports_resume: bool,
    },
    Progress {
        snapshot: ProgressSnapshot,
    },
    BytesWritten {
        id: Uuid,
        delta: u64,
    },
    PhaseChanged {
        id: Uuid,
        phase: Phase,
    },
    Retrying {
        id: Uuid,
        attempt: u32,
        limit: u32,
        reason: String,
    },
    Error {
        id: Uuid,
        kind: ErrorKind,
        message: String,
    },
    Finished {
        id: Uuid,
        downloaded: u64,
    },
}

/// Discriminant of [`JobEvent`], used to register for one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Started,
    Progress,
    BytesWritten,
    PhaseChanged,
    Retrying,
    Error,
    Finished,
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::Started { .. } => EventKind::Started,
            JobEvent::Progress { .. } => EventKind::Progress,
            JobEvent::BytesWritten { .. } => EventKind::BytesWritten,
            JobEvent::PhaseChanged { .. } => EventKind::PhaseChanged,
            JobEvent::Retrying { .. } => EventKind::Retrying,
            JobEvent::Error { .. } => EventKind::Error,
            JobEvent::Finished { .. } => EventKind::Finished,
        }
    }
}
