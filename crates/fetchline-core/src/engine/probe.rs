//! Resource probe - learns size and range support before transferring
//!
//! Uses HEAD first, then falls back to a one-byte ranged GET for servers
//! that omit Content-Length on HEAD.

use crate::error::FetchError;
use fetchline_types::ProbeInfo;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout of the metadata request
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe `url` for its size and whether byte ranges are accepted
pub async fn probe(client: &Client, url: &str, timeout: Duration) -> Result<ProbeInfo, FetchError> {
    info!("Probing URL: {}", url);

    let response = client
        .head(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FetchError::Probe(e.to_string()))?;

    check_status(response.status(), url)?;

    let headers = response.headers();
    let mut supports_resume = advertises_ranges(headers);
    let mut size = header_u64(headers, CONTENT_LENGTH).filter(|&len| len > 0);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let final_url = response.url().to_string();

    if size.is_none() {
        debug!("HEAD didn't return Content-Length, trying partial GET on {}", final_url);
        match client
            .get(&final_url)
            .header(RANGE, "bytes=0-0")
            .timeout(timeout)
            .send()
            .await
        {
            Ok(range_response) => {
                check_status(range_response.status(), url)?;
                if range_response.status() == StatusCode::PARTIAL_CONTENT {
                    // Content-Range: "bytes 0-0/12345", "*" means unknown
                    size = range_response
                        .headers()
                        .get(CONTENT_RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.rsplit('/').next())
                        .and_then(|total| total.parse().ok());
                    supports_resume = true;
                } else {
                    size = header_u64(range_response.headers(), CONTENT_LENGTH);
                    supports_resume = false;
                }
            }
            Err(e) => warn!("Partial GET probe failed: {}", e),
        }
    }

    let size = match size {
        Some(size) if size > 0 => size,
        _ => return Err(FetchError::Probe(format!("size of {} is unknown", url))),
    };

    info!("Probed {}: {} bytes, resumable: {}", url, size, supports_resume);

    Ok(ProbeInfo {
        url: url.to_string(),
        final_url: (final_url != url).then_some(final_url),
        size,
        supports_resume,
        content_type,
    })
}

fn check_status(status: StatusCode, url: &str) -> Result<(), FetchError> {
    if is_not_found(status) {
        return Err(FetchError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(FetchError::Probe(format!("{} returned HTTP {}", url, status.as_u16())));
    }
    Ok(())
}

/// Statuses that mean the resource is definitively absent
pub(crate) fn is_not_found(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

fn advertises_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().eq_ignore_ascii_case("none"))
        .unwrap_or(false)
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
