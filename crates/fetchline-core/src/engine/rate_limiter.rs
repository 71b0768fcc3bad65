//! Bandwidth throttling for the transfer loop
//!
//! `RateLimiter` paces callers so that the bytes handed out within each
//! one-second window never get ahead of the configured rate. `Throttled`
//! wraps an async byte source and charges every chunk it reads to a limiter
//! before returning it.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

/// Length of one accounting window
const WINDOW: Duration = Duration::from_secs(1);

/// Pacing rate limiter. A limit of zero means unlimited.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
}

struct RateLimiterState {
    /// Bytes per second (0 = unlimited)
    limit: u64,
    /// Bytes charged since `window_start`
    window_bytes: u64,
    window_start: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter with a given bytes-per-second limit
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimiterState {
                limit: bytes_per_second,
                window_bytes: 0,
                window_start: Instant::now(),
            })),
        }
    }

    /// Create an unlimited rate limiter (no throttling)
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Current limit in bytes per second (0 = unlimited)
    pub fn limit(&self) -> u64 {
        self.state.lock().limit
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit() == 0
    }

    /// Update the speed limit. The new value governs a fresh window.
    pub fn set_limit(&self, bytes_per_second: u64) {
        let mut state = self.state.lock();
        if state.limit == bytes_per_second {
            return;
        }
        state.limit = bytes_per_second;
        state.window_bytes = 0;
        state.window_start = Instant::now();
    }

    /// Charge `bytes` against the current window, sleeping until the window's
    /// projected rate is back under the limit
    pub async fn acquire(&self, bytes: u64) {
        let wait = {
            let mut state = self.state.lock();

            if state.limit == 0 {
                return;
            }

            let now = Instant::now();
            if now.duration_since(state.window_start) >= WINDOW {
                state.window_start = now;
                state.window_bytes = 0;
            }

            state.window_bytes += bytes;
            let due = Duration::from_secs_f64(state.window_bytes as f64 / state.limit as f64);
            due.saturating_sub(now.duration_since(state.window_start))
        };

        // Sleep outside the lock so `set_limit` is never blocked
        if wait > Duration::ZERO {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Byte source whose reads are paced by a [`RateLimiter`]
pub struct Throttled<R> {
    inner: R,
    limiter: RateLimiter,
    read_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> Throttled<R> {
    pub fn new(inner: R, limiter: RateLimiter) -> Self {
        Self {
            inner,
            limiter,
            read_timeout: None,
        }
    }

    /// Bound each read of the underlying source. Time spent pacing is not
    /// counted against it.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Read up to `buf.len()` bytes. Returns 0 once the source is exhausted.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inner.read(buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??,
            None => self.inner.read(buf).await?,
        };
        if n > 0 {
            self.limiter.acquire(n as u64).await;
        }
        Ok(n)
    }
}
