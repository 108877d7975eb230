//! One-shot system endpoints: health, telemetry, ack.

use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use chute_core::MetricsWindow;

/// Health probe: `OK`, close.
pub async fn handle_health(mut stream: TcpStream) {
    let _ = stream.write_all(b"OK\n").await;
}

/// Ack probe: `ACK`, close.
pub async fn handle_ack(mut stream: TcpStream) {
    let _ = stream.write_all(b"ACK\n").await;
}

/// Telemetry: one JSON metrics snapshot line, close.
pub async fn handle_telemetry(mut stream: TcpStream, metrics: Arc<Mutex<MetricsWindow>>) {
    let snapshot = metrics.lock().expect("metrics lock poisoned").snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(mut line) => {
            line.push('\n');
            let _ = stream.write_all(line.as_bytes()).await;
        }
        Err(e) => debug!(error = %e, "failed to serialize metrics snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn oneshot<F, Fut>(handler: F) -> Vec<u8>
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handler(socket).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn health_answers_ok() {
        assert_eq!(oneshot(handle_health).await, b"OK\n");
    }

    #[tokio::test]
    async fn ack_answers_ack() {
        assert_eq!(oneshot(handle_ack).await, b"ACK\n");
    }

    #[tokio::test]
    async fn telemetry_serves_snapshot() {
        let metrics = Arc::new(Mutex::new(MetricsWindow::new("receiver")));
        metrics.lock().unwrap().add("chunks_stored", 3);

        let reply = oneshot(move |stream| handle_telemetry(stream, metrics)).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"chunks_stored\":3"));
        assert!(text.contains("\"component\":\"receiver\""));
    }
}
