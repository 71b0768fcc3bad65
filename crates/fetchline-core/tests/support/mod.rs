//! Shared helpers for the engine integration tests

#![allow(dead_code)]

use fetchline_core::{DownloadJob, JobConfig, JobEvent};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const FILE_PATH: &str = "/file.bin";

/// Deterministic payload so byte offsets can be checked
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves `body`, honouring `Range: bytes=N-` when ranges are enabled
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    accept_ranges: bool,
}

impl RangeResponder {
    pub fn new(body: Arc<Vec<u8>>, accept_ranges: bool) -> Self {
        Self {
            body,
            accept_ranges,
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let start = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_start);

        match start {
            Some(start) if self.accept_ranges && start < self.body.len() => {
                let len = self.body.len();
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, len - 1, len).as_str(),
                    )
                    .set_body_bytes(self.body[start..].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.as_slice().to_vec()),
        }
    }
}

fn parse_range_start(value: &str) -> Option<usize> {
    value
        .strip_prefix("bytes=")?
        .split('-')
        .next()?
        .parse()
        .ok()
}

/// HEAD response advertising `len` bytes
pub fn head_response(len: usize, accept_ranges: bool) -> ResponseTemplate {
    let template = ResponseTemplate::new(200).insert_header("content-length", len.to_string().as_str());
    if accept_ranges {
        template.insert_header("accept-ranges", "bytes")
    } else {
        template
    }
}

/// Mount HEAD and GET handlers serving `body` at [`FILE_PATH`]
pub async fn serve(server: &MockServer, body: Arc<Vec<u8>>, accept_ranges: bool) {
    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(head_response(body.len(), accept_ranges))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(RangeResponder::new(body, accept_ranges))
        .mount(server)
        .await;
}

/// Job config pointed at the mock server with fast retries
pub fn job_config(server: &MockServer, destination: &Path) -> JobConfig {
    let mut config = JobConfig::new(format!("{}{}", server.uri(), FILE_PATH), destination);
    config.retry_delay_ms = 10;
    config.refresh_interval_ms = 50;
    config.timeout_ms = 5_000;
    config
}

/// Record every event the job emits
pub fn record(job: &DownloadJob) -> Arc<Mutex<Vec<JobEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    job.events()
        .subscribe_all(move |event| sink.lock().push(event.clone()));
    events
}

/// Range headers of the GET requests the server received, in order
pub async fn get_ranges(server: &MockServer) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .map(|r| {
            r.headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .collect()
}

pub fn count<F: Fn(&JobEvent) -> bool>(events: &[JobEvent], predicate: F) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}

/// Minimal HTTP server whose first GET sends `stall_after` bytes of `body`
/// and then holds the connection open without sending more. Later requests
/// are served normally, honouring `Range: bytes=N-`.
///
/// Returns the file URL and the Range headers of every GET received.
pub async fn stalling_server(
    body: Arc<Vec<u8>>,
    stall_after: usize,
) -> (String, Arc<Mutex<Vec<Option<String>>>>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let seen = ranges.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let text = String::from_utf8_lossy(&request).to_string();
                let is_head = text.starts_with("HEAD");
                let range = text
                    .lines()
                    .find(|l| l.to_ascii_lowercase().starts_with("range:"))
                    .map(|l| l["range:".len()..].trim().to_string());

                let len = body.len();
                if is_head {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                        len
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    return;
                }

                let first = {
                    let mut seen = seen.lock();
                    seen.push(range.clone());
                    seen.len() == 1
                };

                if first {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        len
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body[..stall_after]).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    return;
                }

                let start = range.as_deref().and_then(parse_range_start).unwrap_or(0);
                let head = if start > 0 {
                    format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                        len - start,
                        start,
                        len - 1,
                        len
                    )
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        len
                    )
                };
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body[start..]).await;
                let _ = socket.flush().await;
            });
        }
    });

    (format!("http://{}{}", addr, FILE_PATH), ranges)
}
