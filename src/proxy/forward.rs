//! Bidirectional byte forwarding
//!
//! Both directions run concurrently in the calling task. When one direction
//! reaches end-of-stream it shuts down the write side of its destination and
//! tells the other direction, which keeps draining until it either finishes
//! on its own or stays idle for the linger period.

use crate::helper::DEFAULT_BUFFER_SIZE;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::debug;

/// Idle period after which the remaining direction is abandoned
pub const DEFAULT_LINGER: Duration = Duration::from_secs(2);

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Client to backend
    pub client_to_backend: u64,
    /// Backend to client
    pub backend_to_client: u64,
}

/// Byte pump between a client connection and a backend channel
#[derive(Debug, Clone, Copy)]
pub struct Forwarder {
    linger: Duration,
}

impl Default for Forwarder {
    fn default() -> Self {
        Forwarder {
            linger: DEFAULT_LINGER,
        }
    }
}

impl Forwarder {
    /// Forwarder with the default linger
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the idle linger applied once one side has finished
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Configured linger
    pub fn linger(&self) -> Duration {
        self.linger
    }

    /// Forward until both directions are done
    pub async fn forward<C, B>(&self, client: C, backend: B) -> ForwardStats
    where
        C: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, backend_write) = tokio::io::split(backend);

        let (upstream_done, upstream_seen) = watch::channel(false);
        let (downstream_done, downstream_seen) = watch::channel(false);

        let (client_to_backend, backend_to_client) = tokio::join!(
            pump(
                "client->backend",
                client_read,
                backend_write,
                self.linger,
                downstream_seen,
                upstream_done,
            ),
            pump(
                "backend->client",
                backend_read,
                client_write,
                self.linger,
                upstream_seen,
                downstream_done,
            ),
        );

        debug!(
            "Forwarding finished: {} bytes up, {} bytes down",
            client_to_backend, backend_to_client
        );

        ForwardStats {
            client_to_backend,
            backend_to_client,
        }
    }
}

async fn pump<R, W>(
    label: &str,
    mut src: R,
    mut dst: W,
    linger: Duration,
    mut peer_done: watch::Receiver<bool>,
    done: watch::Sender<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;
    let mut peer_finished = false;

    loop {
        let read = if peer_finished {
            match tokio::time::timeout(linger, src.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    debug!("{}: idle after peer finished", label);
                    break;
                }
            }
        } else {
            tokio::select! {
                read = src.read(&mut buf) => read,
                _ = peer_done.changed() => {
                    peer_finished = true;
                    continue;
                }
            }
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = dst.write_all(&buf[..n]).await {
                    debug!("{}: write error: {}", label, e);
                    break;
                }
                total += n as u64;
            }
            Err(e) => {
                debug!("{}: read error: {}", label, e);
                break;
            }
        }
    }

    if let Err(e) = dst.shutdown().await {
        debug!("{}: shutdown error: {}", label, e);
    }
    let _ = done.send(true);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_forward_both_directions() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, mut backend_peer) = duplex(1024);

        let task = tokio::spawn(async move { Forwarder::new().forward(client, backend).await });

        client_peer.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        backend_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");

        backend_peer.write_all(b"response!").await.unwrap();
        let mut buf = [0u8; 9];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response!");

        drop(client_peer);
        drop(backend_peer);

        let stats = task.await.unwrap();
        assert_eq!(stats.client_to_backend, 7);
        assert_eq!(stats.backend_to_client, 9);
    }

    #[tokio::test]
    async fn test_half_close_propagates_and_response_still_flows() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, mut backend_peer) = duplex(1024);

        let task = tokio::spawn(async move { Forwarder::new().forward(client, backend).await });

        client_peer.write_all(b"ping").await.unwrap();
        client_peer.shutdown().await.unwrap();

        // Backend sees the request followed by end-of-stream
        let mut received = Vec::new();
        backend_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping");

        backend_peer.write_all(b"pong").await.unwrap();
        drop(backend_peer);

        let mut reply = Vec::new();
        client_peer.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");

        let stats = task.await.unwrap();
        assert_eq!(stats.client_to_backend, 4);
        assert_eq!(stats.backend_to_client, 4);
    }

    #[tokio::test]
    async fn test_terminates_when_other_side_never_closes() {
        let (client, client_peer) = duplex(1024);
        let (backend, _backend_peer) = duplex(1024);

        drop(client_peer);

        let started = Instant::now();
        let stats = Forwarder::new()
            .with_linger(Duration::from_millis(100))
            .forward(client, backend)
            .await;

        assert_eq!(stats, ForwardStats::default());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_default_linger() {
        assert_eq!(Forwarder::new().linger(), DEFAULT_LINGER);
        assert_eq!(
            Forwarder::new().with_linger(Duration::from_secs(5)).linger(),
            Duration::from_secs(5)
        );
    }
}
