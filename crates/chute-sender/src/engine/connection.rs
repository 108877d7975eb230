//! A single outbound data connection.
//!
//! Each driver owns one lazily established TCP socket. Connects race a
//! timeout and are retried with a linearly increasing delay; a broken write
//! drops the socket so the next job reconnects.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use chute_core::{Error, Result};

use super::SenderConfig;

pub(crate) struct ConnectionDriver {
    index: usize,
    host: String,
    port: u16,
    connect_timeout: Duration,
    max_connect_attempts: u32,
    reconnect_delay: Duration,
    tcp_nodelay: bool,
    stream: Option<TcpStream>,
}

impl ConnectionDriver {
    pub(crate) fn new(index: usize, config: &SenderConfig) -> Self {
        Self {
            index,
            host: config.host_prefix.clone(),
            port: config.base_port + index as u16,
            connect_timeout: config.connect_timeout,
            max_connect_attempts: config.max_connect_attempts.max(1),
            reconnect_delay: config.reconnect_delay,
            tcp_nodelay: config.tcp_nodelay,
            stream: None,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establish the socket if needed.
    ///
    /// The hostname is resolved once per attempt; a timed-out attempt closes
    /// the pending socket before the next try.
    async fn ensure_connected(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let mut last_error = Error::Timeout;
            for attempt in 1..=self.max_connect_attempts {
                if attempt > 1 {
                    tokio::time::sleep(self.reconnect_delay * (attempt - 1)).await;
                }
                let connect = TcpStream::connect((self.host.as_str(), self.port));
                match tokio::time::timeout(self.connect_timeout, connect).await {
                    Ok(Ok(stream)) => {
                        if self.tcp_nodelay {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(index = self.index, error = %e, "failed to set TCP_NODELAY");
                            }
                        }
                        debug!(
                            index = self.index,
                            host = %self.host,
                            port = self.port,
                            attempt,
                            "connection established"
                        );
                        self.stream = Some(stream);
                        break;
                    }
                    Ok(Err(e)) => {
                        last_error = Error::Transport {
                            message: format!(
                                "connect {}:{} failed: {}",
                                self.host, self.port, e
                            ),
                        };
                    }
                    Err(_) => {
                        last_error = Error::Timeout;
                    }
                }
            }
            if self.stream.is_none() {
                return Err(last_error);
            }
        }
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Write one full frame. A failed write closes the socket.
    pub(crate) async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.ensure_connected().await?;
        if let Err(e) = stream.write_all(frame).await {
            self.stream = None;
            return Err(Error::Io(e));
        }
        self.discard_inbound();
        Ok(())
    }

    /// Throw away any bytes the peer sent back.
    ///
    /// The receiver acknowledges each stored chunk; the relay does not
    /// consume acknowledgements, so they must not pile up in the socket
    /// buffer of a long-lived connection. A read of zero means the peer
    /// closed its end; the socket is dropped so the next job reconnects.
    fn discard_inbound(&mut self) {
        let mut scratch = [0u8; 512];
        while let Some(stream) = self.stream.as_ref() {
            match stream.try_read(&mut scratch) {
                Ok(0) => {
                    self.stream = None;
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.stream = None;
                }
            }
        }
    }

    /// Graceful close at engine shutdown.
    pub(crate) async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
