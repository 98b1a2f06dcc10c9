//! Shared frontend scaffolding
//!
//! Listener accept loop, per-client negotiation deadline with panic
//! containment, and the dial-then-forward step every frontend ends with.

use super::forward::{ForwardStats, Forwarder};
use crate::error::TunnelError;
use crate::helper::join_host_port;
use crate::session::RemoteSession;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before retrying
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Absolute point in time bounding every negotiation read and write
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Deadline {
            at: Instant::now() + timeout,
        }
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Run `fut`, failing with [`io::ErrorKind::TimedOut`] once the deadline passes
    pub async fn bound<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<io::Error>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "negotiation deadline exceeded").into()),
        }
    }
}

/// Per-connection entry point of a frontend
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// Serve one accepted client connection to completion
    async fn handle_client(&self, stream: TcpStream);
}

/// Bind `127.0.0.1:port` and serve connections until `shutdown` fires
///
/// Returns the bound address once listening; the accept loop runs in its own
/// task and every client gets its own task.
pub async fn start_proxy(
    name: &'static str,
    port: u16,
    handler: Arc<dyn ClientHandler>,
    mut shutdown: broadcast::Receiver<bool>,
) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let local_addr = listener.local_addr()?;
    info!("{} proxy listening on {}", name, local_addr);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("{}: accepted connection from {}", name, peer);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handler.handle_client(stream).await;
                        });
                    }
                    Err(e) => {
                        warn!("{}: accept error: {}", name, e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                _ = shutdown.recv() => {
                    info!("{} proxy on {} stopped", name, local_addr);
                    break;
                }
            }
        }
    });

    Ok(local_addr)
}

/// Run `body` with a fresh negotiation deadline, containing any panic
///
/// `body` owns the connection, so it is closed on every exit path.
pub async fn handle_client_with_timeout<S, F, Fut>(stream: S, label: &str, timeout: Duration, body: F)
where
    F: FnOnce(S, Deadline) -> Fut,
    Fut: Future<Output = ()>,
{
    let deadline = Deadline::after(timeout);
    let outcome = AssertUnwindSafe(async move { body(stream, deadline).await })
        .catch_unwind()
        .await;

    if let Err(panic) = outcome {
        error!("{}: client handler panicked: {}", label, panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Dial `host:port` through the session and forward `client` over it
///
/// On dial failure the error is logged and returned; `client` is dropped,
/// which closes it.
pub async fn open_channel<S>(
    session: &dyn RemoteSession,
    forwarder: &Forwarder,
    client: S,
    host: &str,
    port: u16,
) -> Result<ForwardStats, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let address = join_host_port(host, port);
    let backend = match session.dial("tcp", &address).await {
        Ok(backend) => backend,
        Err(e) => {
            warn!("Failed to open channel to {}: {}", address, e);
            return Err(e);
        }
    };

    debug!("Channel open to {}", address);
    Ok(forwarder.forward(client, backend).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_deadline_bound_expires() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let result: io::Result<()> = deadline
            .bound(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_deadline_bound_passes_result_through() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: Result<u8, TunnelError> = deadline.bound(async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert!(deadline.remaining() > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_handle_client_with_timeout_contains_panic() {
        let (client, mut peer) = tokio::io::duplex(64);

        handle_client_with_timeout(client, "test", Duration::from_secs(1), |_stream, _deadline| async {
            panic!("boom");
        })
        .await;

        // The connection was dropped with the panicking body
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    struct Echo {
        served: AtomicUsize,
    }

    #[async_trait]
    impl ClientHandler for Echo {
        async fn handle_client(&self, mut stream: TcpStream) {
            self.served.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
            }
        }
    }

    #[tokio::test]
    async fn test_start_proxy_serves_and_stops() {
        let (tx, rx) = broadcast::channel(1);
        let handler = Arc::new(Echo {
            served: AtomicUsize::new(0),
        });

        let addr = start_proxy("echo", 0, handler.clone(), rx).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(handler.served.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
