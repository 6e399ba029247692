//! Minimal HTTP fixture for exercising the engine end to end: serves a
//! fixed payload from memory, with optional range support, per-offset
//! failure injection, and throttled streaming for cancellation tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct ServerConfig {
    pub payload: Vec<u8>,
    /// Advertise `Accept-Ranges: bytes` and honor Range requests.
    pub accept_ranges: bool,
    /// Omit Content-Length from HEAD responses.
    pub hide_size_in_head: bool,
    /// Range requests starting at this offset are answered with `fail_status`.
    pub fail_range_start: Option<u64>,
    pub fail_status: u16,
    /// Serve this range with correct headers but a truncated body.
    pub truncate_range_start: Option<u64>,
    /// Sleep between body chunks to simulate a slow link.
    pub throttle: Option<Duration>,
}

impl ServerConfig {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            accept_ranges: true,
            hide_size_in_head: false,
            fail_range_start: None,
            fail_status: 500,
            truncate_range_start: None,
            throttle: None,
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl TestServer {
    pub async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(config);
        let accept_task = tokio::spawn(async move {
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    let config = config.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, config).await;
                    });
                }
            }
        });
        Self { addr, accept_task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

struct Request {
    method: String,
    path: String,
    range: Option<(u64, u64)>,
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut range = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("range:") {
            if let Some(spec) = value.trim().strip_prefix("bytes=") {
                if let Some((start, end)) = spec.split_once('-') {
                    if let (Ok(start), Ok(end)) = (start.parse(), end.parse()) {
                        range = Some((start, end));
                    }
                }
            }
        }
    }

    Some(Request {
        method,
        path,
        range,
    })
}

async fn write_response(
    stream: &mut TcpStream,
    status_line: &str,
    headers: &[String],
    body: Option<&[u8]>,
    throttle: Option<Duration>,
) {
    let mut head = format!("HTTP/1.1 {}\r\n", status_line);
    for header in headers {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    if let Some(body) = body {
        match throttle {
            None => {
                let _ = stream.write_all(body).await;
            }
            Some(pause) => {
                for chunk in body.chunks(8 * 1024) {
                    if stream.write_all(chunk).await.is_err() {
                        return;
                    }
                    let _ = stream.flush().await;
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
    let _ = stream.flush().await;
}

async fn handle_connection(mut stream: TcpStream, config: Arc<ServerConfig>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    let total = config.payload.len() as u64;

    if request.path == "/moved" {
        write_response(
            &mut stream,
            "307 Temporary Redirect",
            &[
                "Location: /file.bin".to_string(),
                "Content-Length: 0".to_string(),
            ],
            None,
            None,
        )
        .await;
        return;
    }

    if request.method == "HEAD" {
        let mut headers = Vec::new();
        if !config.hide_size_in_head {
            headers.push(format!("Content-Length: {}", total));
        }
        if config.accept_ranges {
            headers.push("Accept-Ranges: bytes".to_string());
        }
        write_response(&mut stream, "200 OK", &headers, None, None).await;
        return;
    }

    match request.range.filter(|_| config.accept_ranges) {
        Some((start, end)) => {
            if config.fail_range_start == Some(start) {
                let status = match config.fail_status {
                    416 => "416 Range Not Satisfiable".to_string(),
                    other => format!("{} Internal Server Error", other),
                };
                write_response(
                    &mut stream,
                    &status,
                    &["Content-Length: 0".to_string()],
                    None,
                    None,
                )
                .await;
                return;
            }
            if end >= total || start > end {
                write_response(
                    &mut stream,
                    "416 Range Not Satisfiable",
                    &["Content-Length: 0".to_string()],
                    None,
                    None,
                )
                .await;
                return;
            }
            let mut slice = &config.payload[start as usize..=end as usize];
            if config.truncate_range_start == Some(start) {
                slice = &slice[..slice.len() / 2];
            }
            let headers = vec![
                format!("Content-Length: {}", slice.len()),
                format!("Content-Range: bytes {}-{}/{}", start, end, total),
            ];
            write_response(
                &mut stream,
                "206 Partial Content",
                &headers,
                Some(slice),
                config.throttle,
            )
            .await;
        }
        None => {
            let headers = vec![format!("Content-Length: {}", total)];
            write_response(
                &mut stream,
                "200 OK",
                &headers,
                Some(&config.payload),
                config.throttle,
            )
            .await;
        }
    }
}
