//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::http::StatusCode;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use campus_guard::config::GuardConfig;
use campus_guard::{GuardServer, RetryPolicy, Shutdown};

pub const ADMIN_KEY: &str = "test-admin-key";

/// A request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock backend does with one request.
pub enum MockReply {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    /// Close the connection without answering.
    Hangup,
}

impl MockReply {
    pub fn json(status: u16, body: &str) -> Self {
        MockReply::Respond {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    pub fn with_header(status: u16, name: &str, value: &str) -> Self {
        MockReply::Respond {
            status,
            headers: vec![(name.to_string(), value.to_string())],
            body: String::new(),
        }
    }
}

/// Recorded traffic of a mock backend.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<SeenRequest>>>);

impl Recorder {
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Start a programmable mock of the Supabase REST/Auth API on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Recorder)
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let recorder = Recorder::default();
    let seen = recorder.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let f = f.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let text = String::from_utf8_lossy(&buf).to_string();
                let mut lines = text.split("\r\n");
                let mut request_line = lines.next().unwrap_or_default().split_whitespace();
                let request = SeenRequest {
                    method: request_line.next().unwrap_or_default().to_string(),
                    target: request_line.next().unwrap_or_default().to_string(),
                    headers: lines
                        .take_while(|l| !l.is_empty())
                        .filter_map(|l| l.split_once(':'))
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                        .collect(),
                };
                seen.0.lock().unwrap().push(request.clone());
                let is_head = request.method == "HEAD";

                match f(request).await {
                    MockReply::Hangup => {
                        let _ = socket.shutdown().await;
                    }
                    MockReply::Respond { status, headers, body } => {
                        let reason = StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");
                        let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason);
                        for (k, v) in headers {
                            response.push_str(&format!("{}: {}\r\n", k, v));
                        }
                        let length = if is_head { 0 } else { body.len() };
                        response.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", length));
                        if !is_head {
                            response.push_str(&body);
                        }
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                }
            });
        }
    });

    (addr, recorder)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Defaults with fast retries, admin enabled and metrics off.
pub fn test_config(supabase: SocketAddr) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.supabase.url = format!("http://{}", supabase);
    config.supabase.service_role_key = "service-role-test".to_string();
    config.observability.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config.retries = RetryPolicy {
        initial_delay_ms: 10,
        max_delay_ms: 20,
        jitter_ms: 0,
        ..RetryPolicy::supabase()
    };
    config
}

/// Start the guard on an ephemeral port. Triggering the returned
/// `Shutdown` stops it.
pub async fn start_guard(config: GuardConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GuardServer::new(config).await.unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();

    tokio::spawn(async move {
        let _ = server.run(listener, None, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
