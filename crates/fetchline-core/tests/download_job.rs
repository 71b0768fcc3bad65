//! Integration tests for DownloadJob against a mock HTTP server.
//!
//! Covers full transfers, resume offsets, pause/stop, retry bounds and the
//! not-found short circuit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchline_core::{DownloadJob, ErrorKind, EventKind, JobConfig, JobEvent, Phase};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::{
    count, get_ranges, head_response, job_config, payload, record, serve, stalling_server,
    FILE_PATH,
};

fn is_error(e: &JobEvent) -> bool {
    matches!(e, JobEvent::Error { .. })
}

fn is_finished(e: &JobEvent) -> bool {
    matches!(e, JobEvent::Finished { .. })
}

fn is_retrying(e: &JobEvent) -> bool {
    matches!(e, JobEvent::Retrying { .. })
}

/// Pause (or stop) the job once, after at least `after` bytes have been written
fn interrupt_after(job: &DownloadJob, after: u64, stop: bool) {
    let seen = Arc::new(AtomicU64::new(0));
    let fired = Arc::new(AtomicBool::new(false));
    let handle = job.clone();
    job.events().subscribe(EventKind::BytesWritten, move |event| {
        if let JobEvent::BytesWritten { delta, .. } = event {
            let total = seen.fetch_add(*delta, Ordering::SeqCst) + delta;
            if total >= after && !fired.swap(true, Ordering::SeqCst) {
                if stop {
                    handle.stop();
                } else {
                    handle.pause();
                }
            }
        }
    });
}

// ==================== Full Transfers ====================

#[tokio::test]
async fn test_one_megabyte_download_completes_once() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(1_000_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);

    let state = job.state();
    assert_eq!(state.downloaded, 1_000_000);
    assert_eq!(state.total_size, Some(1_000_000));
    assert_eq!(state.progress(), Some(100.0));
    assert!(!state.has_error);
    assert!(state.completed_at.is_some());
    assert_eq!(tokio::fs::read(&dest).await?, *body);

    let events = events.lock();
    assert_eq!(count(&events, is_finished), 1);
    assert_eq!(count(&events, is_error), 0);

    // Byte deltas add up exactly and never exceed a chunk
    let deltas: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::BytesWritten { delta, .. } => Some(*delta),
            _ => None,
        })
        .collect();
    assert!(deltas.iter().all(|&d| d > 0 && d <= 4096));
    assert_eq!(deltas.iter().sum::<u64>(), 1_000_000);

    assert!(matches!(
        events.first(),
        Some(JobEvent::PhaseChanged {
            phase: Phase::Probing,
            ..
        })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::Started {
            start_byte: 0,
            total: 1_000_000,
            supports_resume: true,
            ..
        }
    )));
    assert!(matches!(events.last(), Some(JobEvent::Finished { downloaded: 1_000_000, .. })));

    assert_eq!(get_ranges(&server).await, vec![None]);
    Ok(())
}

#[tokio::test]
async fn test_progress_snapshots_are_published_on_a_timer() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(600_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let mut config = job_config(&server, &dir.path().join("file.bin"));
    config.max_bytes_per_second = 400_000;
    config.refresh_interval_ms = 100;
    let job = DownloadJob::new(config)?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);

    let events = events.lock();
    let snapshots: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress { snapshot } => Some(snapshot.clone()),
            _ => None,
        })
        .collect();

    // ~1.5s of transfer at 100ms ticks, plus the final snapshot
    assert!(snapshots.len() >= 5, "only {} snapshots", snapshots.len());
    for snapshot in &snapshots {
        let percent = snapshot.percent.expect("size is known after probing");
        assert!((0.0..=100.0).contains(&percent));
        assert_eq!(snapshot.total, Some(600_000));
    }
    assert!(snapshots.iter().any(|s| s.speed > 0));

    let last = snapshots.last().unwrap();
    assert_eq!(last.downloaded, 600_000);
    assert_eq!(last.speed, 0);
    assert_eq!(last.eta, None);

    let elapsed = job.state().elapsed_ms;
    assert!(elapsed >= 1_000, "elapsed {}ms", elapsed);
    Ok(())
}

// ==================== Resume ====================

#[tokio::test]
async fn test_partial_file_resumes_with_range_header() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(1_000_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    tokio::fs::write(&dest, &body[..500_000]).await?;

    let mut config = job_config(&server, &dest);
    config.replace_existing = false;
    let job = DownloadJob::new(config)?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(get_ranges(&server).await, vec![Some("bytes=500000-".to_string())]);
    assert_eq!(tokio::fs::read(&dest).await?, *body);
    assert_eq!(job.state().downloaded, 1_000_000);

    let events = events.lock();
    assert!(events
        .iter()
        .any(|e| matches!(e, JobEvent::Started { start_byte: 500_000, .. })));
    Ok(())
}

#[tokio::test]
async fn test_pause_then_start_continues_from_written_offset() -> Result<(), Box<dyn std::error::Error>>
{
    let server = MockServer::start().await;
    let body = Arc::new(payload(1_000_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    interrupt_after(&job, 500_000, false);

    assert_eq!(job.start().await, Phase::Paused);

    let paused = job.state();
    let on_disk = tokio::fs::metadata(&dest).await?.len();
    assert_eq!(on_disk, paused.downloaded);
    assert!(on_disk >= 500_000 && on_disk < 1_000_000);
    assert_eq!(tokio::fs::read(&dest).await?, body[..on_disk as usize].to_vec());

    // Replace is on, but a paused job keeps its partial file
    let events = record(&job);
    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(tokio::fs::read(&dest).await?, *body);

    let ranges = get_ranges(&server).await;
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[1], Some(format!("bytes={}-", on_disk)));

    let events = events.lock();
    assert_eq!(count(&events, is_finished), 1);
    Ok(())
}

#[tokio::test]
async fn test_without_range_support_restarts_from_zero() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(200_000));
    serve(&server, body.clone(), false).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    tokio::fs::write(&dest, vec![0xAA; 50_000]).await?;

    let mut config = job_config(&server, &dest);
    config.replace_existing = false;
    let job = DownloadJob::new(config)?;

    assert_eq!(job.start().await, Phase::Completed);
    assert!(!job.state().supports_resume);
    assert_eq!(get_ranges(&server).await, vec![None]);
    assert_eq!(tokio::fs::read(&dest).await?, *body);
    Ok(())
}

#[tokio::test]
async fn test_complete_file_on_disk_skips_transfer() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(10_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    tokio::fs::write(&dest, body.as_slice()).await?;

    let mut config = job_config(&server, &dest);
    config.replace_existing = false;
    let job = DownloadJob::new(config)?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);
    assert!(get_ranges(&server).await.is_empty());
    assert_eq!(count(&events.lock(), is_finished), 1);
    Ok(())
}

#[tokio::test]
async fn test_ignored_range_rewrites_file_from_start() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(100_000));

    // Advertises ranges on HEAD but always answers GET with the full body
    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(head_response(body.len(), true))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_slice().to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    tokio::fs::write(&dest, &body[..30_000]).await?;

    let mut config = job_config(&server, &dest);
    config.replace_existing = false;
    let job = DownloadJob::new(config)?;

    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(get_ranges(&server).await, vec![Some("bytes=30000-".to_string())]);
    assert_eq!(tokio::fs::read(&dest).await?, *body);
    assert_eq!(job.state().downloaded, 100_000);
    Ok(())
}

#[tokio::test]
async fn test_truncated_stream_resumes_from_partial_length() -> Result<(), Box<dyn std::error::Error>>
{
    let server = MockServer::start().await;
    let body = Arc::new(payload(100_000));

    // First GET ends cleanly after 40,000 of the advertised 100,000 bytes
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body[..40_000].to_vec()))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(
        get_ranges(&server).await,
        vec![None, Some("bytes=40000-".to_string())]
    );
    assert_eq!(tokio::fs::read(&dest).await?, *body);

    let events = events.lock();
    assert_eq!(count(&events, is_retrying), 1);
    assert_eq!(count(&events, is_error), 0);
    assert!(events
        .iter()
        .any(|e| matches!(e, JobEvent::Started { start_byte: 40_000, .. })));
    Ok(())
}

#[tokio::test]
async fn test_stalled_read_times_out_and_resumes() -> Result<(), Box<dyn std::error::Error>> {
    let body = Arc::new(payload(200_000));
    let (url, ranges) = stalling_server(body.clone(), 60_000).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let mut config = JobConfig::new(url, &dest);
    config.retry_delay_ms = 10;
    config.refresh_interval_ms = 50;
    config.timeout_ms = 500;
    let job = DownloadJob::new(config)?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(
        *ranges.lock(),
        vec![None, Some("bytes=60000-".to_string())]
    );
    assert_eq!(tokio::fs::read(&dest).await?, *body);
    assert_eq!(count(&events.lock(), is_retrying), 1);
    Ok(())
}

// ==================== Stop ====================

#[tokio::test]
async fn test_stop_settles_idle_and_keeps_partial_file() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(500_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    interrupt_after(&job, 100_000, true);
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Idle);
    let on_disk = tokio::fs::metadata(&dest).await?.len();
    assert_eq!(on_disk, job.state().downloaded);
    assert!(on_disk < 500_000);

    let events = events.lock();
    assert_eq!(count(&events, is_finished), 0);
    assert_eq!(count(&events, is_error), 0);
    Ok(())
}

#[tokio::test]
async fn test_paused_job_rejects_reconfiguration() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(300_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    interrupt_after(&job, 100_000, false);

    assert_eq!(job.start().await, Phase::Paused);

    let mut other = job.config();
    other.url = format!("{}/other.bin", server.uri());
    assert!(job.update_config(other.clone()).is_err());
    assert_eq!(job.config().url, format!("{}{}", server.uri(), FILE_PATH));
    assert_eq!(job.phase(), Phase::Paused);

    // Once stopped, the next start is fresh and may target another resource
    job.stop();
    assert!(job.update_config(other).is_ok());
    Ok(())
}

#[tokio::test]
async fn test_stop_while_paused_makes_next_start_fresh() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(300_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    interrupt_after(&job, 100_000, false);

    assert_eq!(job.start().await, Phase::Paused);
    job.stop();
    assert_eq!(job.phase(), Phase::Idle);

    let events = record(&job);
    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(get_ranges(&server).await, vec![None, None]);
    assert_eq!(tokio::fs::read(&dest).await?, *body);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, JobEvent::Started { start_byte: 0, .. })));
    Ok(())
}

#[tokio::test]
async fn test_second_start_while_running_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(300_000));
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let mut config = job_config(&server, &dir.path().join("file.bin"));
    config.max_bytes_per_second = 100_000;
    let job = DownloadJob::new(config)?;

    let runner = job.clone();
    let first = tokio::spawn(async move { runner.start().await });

    while !job.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = tokio::time::timeout(Duration::from_secs(1), job.start()).await?;
    assert_ne!(second, Phase::Completed);
    assert!(job.update_config(job.config()).is_err());

    job.stop();
    assert_eq!(first.await?, Phase::Idle);
    Ok(())
}

// ==================== Failures ====================

#[tokio::test]
async fn test_not_found_on_probe_fails_without_retry() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let job = DownloadJob::new(job_config(&server, &dir.path().join("file.bin")))?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Failed);

    let state = job.state();
    assert!(state.has_error);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.total_size, None);
    assert_eq!(state.progress(), None);

    let events = events.lock();
    assert_eq!(count(&events, is_error), 1);
    assert_eq!(count(&events, is_retrying), 0);
    assert_eq!(count(&events, is_finished), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::Error {
            kind: ErrorKind::NotFound,
            ..
        }
    )));
    Ok(())
}

#[tokio::test]
async fn test_not_found_on_transfer_short_circuits() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(head_response(1000, true))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let job = DownloadJob::new(job_config(&server, &dir.path().join("file.bin")))?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Failed);
    assert_eq!(get_ranges(&server).await.len(), 1);

    let events = events.lock();
    assert_eq!(count(&events, is_error), 1);
    assert_eq!(count(&events, is_retrying), 0);
    Ok(())
}

#[tokio::test]
async fn test_probe_failure_is_terminal() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let job = DownloadJob::new(job_config(&server, &dir.path().join("file.bin")))?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Failed);
    assert!(get_ranges(&server).await.is_empty());

    let events = events.lock();
    assert_eq!(count(&events, is_retrying), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::Error {
            kind: ErrorKind::Probe,
            ..
        }
    )));
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_exhaust_retry_budget() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(head_response(1000, true))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let mut config = job_config(&server, &dir.path().join("file.bin"));
    config.retry_limit = 3;
    let job = DownloadJob::new(config)?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Failed);

    let state = job.state();
    assert_eq!(state.retry_count, 3);
    assert!(state.has_error);
    assert_eq!(get_ranges(&server).await.len(), 4);

    let events = events.lock();
    assert_eq!(count(&events, is_retrying), 3);
    assert_eq!(count(&events, is_error), 1);
    assert_eq!(count(&events, is_finished), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        JobEvent::Error {
            kind: ErrorKind::RetryExhausted,
            ..
        }
    )));
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    let body = Arc::new(payload(50_000));

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve(&server, body.clone(), true).await;

    let dir = TempDir::new()?;
    let dest = dir.path().join("file.bin");
    let job = DownloadJob::new(job_config(&server, &dest))?;
    let events = record(&job);

    assert_eq!(job.start().await, Phase::Completed);
    assert_eq!(tokio::fs::read(&dest).await?, *body);
    assert_eq!(job.state().retry_count, 0);

    let events = events.lock();
    assert_eq!(count(&events, is_retrying), 1);
    assert_eq!(count(&events, is_error), 0);
    assert_eq!(count(&events, is_finished), 1);
    Ok(())
}

#[tokio::test]
async fn test_job_probe_reports_size_and_ranges() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    serve(&server, Arc::new(payload(4321)), true).await;

    let dir = TempDir::new()?;
    let job = DownloadJob::new(job_config(&server, &dir.path().join("file.bin")))?;
    let info = job.probe().await?;

    assert_eq!(info.size, 4321);
    assert!(info.supports_resume);
    assert_eq!(job.phase(), Phase::Idle);
    Ok(())
}
