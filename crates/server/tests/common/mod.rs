//! Common test utilities and fixtures.

pub mod server;

#[allow(unused_imports)]
pub use server::*;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use tower::ServiceExt;

/// Digest of `hello world`.
#[allow(dead_code)]
pub const HELLO_WORLD_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

/// Send a request through a router and collect the full response.
#[allow(dead_code)]
pub async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

/// Build a GET request.
#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Build a POST request with a body.
#[allow(dead_code)]
pub fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(body.into())
        .unwrap()
}

/// Poll `condition` every 20ms until it holds or five seconds pass.
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    condition()
}

/// A peer that answers discovery, then stalls every download after sending
/// the headers and a few body bytes.
#[allow(dead_code)]
pub struct StallingPeer {
    pub addr: std::net::SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl StallingPeer {
    pub async fn start() -> Self {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    if head.starts_with(b"GET /_internal/api/discovery") {
                        let _ = stream
                            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                            .await;
                        return;
                    }
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\npartial")
                        .await;
                    let _ = stream.flush().await;
                    // Hold the connection open without sending the rest
                    std::future::pending::<()>().await;
                });
            }
        });
        Self { addr, task }
    }
}

impl Drop for StallingPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
