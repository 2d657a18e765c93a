//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use messaging_resilience::outbox::{MessageSender, QueuedMessage, SendError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request received by the programmable backend.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl MockRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();

    Some(MockRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` sees every request and returns the status code and body to answer with.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK".to_string(),
                            401 => "401 Unauthorized".to_string(),
                            404 => "404 Not Found".to_string(),
                            429 => "429 Too Many Requests".to_string(),
                            500 => "500 Internal Server Error".to_string(),
                            503 => "503 Service Unavailable".to_string(),
                            code => format!("{} Unknown", code),
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Mock lock RPC server with Postgres advisory lock semantics: one holder per key.
///
/// Records every request for later inspection.
pub async fn start_lock_rpc_backend() -> (SocketAddr, Arc<Mutex<Vec<MockRequest>>>) {
    let held: Arc<Mutex<std::collections::HashSet<i64>>> = Arc::default();
    let log: Arc<Mutex<Vec<MockRequest>>> = Arc::default();

    let log_handle = log.clone();
    let addr = start_programmable_backend(move |request: MockRequest| {
        let held = held.clone();
        let log = log_handle.clone();
        async move {
            log.lock().unwrap().push(request.clone());
            let Some(key) = request.json()["p_lock_key"].as_i64() else {
                return (500, r#"{"message":"missing p_lock_key"}"#.to_string());
            };
            let mut held = held.lock().unwrap();
            let granted = if request.path.ends_with("/try_advisory_lock") {
                held.insert(key)
            } else if request.path.ends_with("/release_advisory_lock") {
                held.remove(&key)
            } else {
                return (404, "{}".to_string());
            };
            (200, granted.to_string())
        }
    })
    .await;

    (addr, log)
}

/// Sender that fails the first `failures` sends, then delivers.
#[derive(Debug, Default)]
pub struct FlakySender {
    failures: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

impl FlakySender {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for FlakySender {
    async fn send(&self, message: &QueuedMessage) -> Result<(), SendError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err("network unreachable".into());
        }
        self.delivered.lock().unwrap().push(message.body.clone());
        Ok(())
    }
}
