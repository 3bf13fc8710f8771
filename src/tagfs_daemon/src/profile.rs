use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use crate::daemon::Ctx;

/// Resident set size in bytes, from /proc/self/statm.
fn resident_bytes() -> u64 {
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(s) => s,
        Err(_) => return 0,
    };
    let pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    pages * 4096
}

/// Serves a heap/cache snapshot on a loopback port for any connecting
/// client; one response per connection.
pub(crate) fn spawn(runtime: &Runtime, port: u16, ctx: Arc<Ctx>) {
    runtime.spawn(async move {
        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!("profile listener bind failed on port {}: {}", port, err);
                return;
            }
        };
        info!("profile endpoint listening on 127.0.0.1:{}", port);
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("profile accept failed: {}", err);
                    continue;
                }
            };
            let snapshot = serde_json::json!({
                "resident_bytes": resident_bytes(),
                "cache_generation": ctx.stamp.current(),
            });
            let body = snapshot.to_string();
            let response = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            if let Err(err) = socket.write_all(response.as_bytes()).await {
                warn!("profile write failed: {}", err);
            }
        }
    });
}
