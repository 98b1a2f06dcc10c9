//! TCP transport implementation
//!
//! Provides plain TCP connections to the SSH endpoint or upstream proxy.

use super::{SocketOpts, StreamDyn, Transport};
use crate::error::TunnelError;
use crate::helper::join_host_port;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connection timeout in effect
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Dial `host:port` and apply socket options
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, TunnelError> {
        let addr = join_host_port(host, port);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TunnelError::Dial {
                addr: addr.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no connection after {:?}", self.connect_timeout),
                ),
            })?
            .map_err(|source| TunnelError::Dial {
                addr: addr.clone(),
                source,
            })?;

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        tracing::debug!("TCP connection established to {}", addr);

        Ok(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn StreamDyn>, TunnelError> {
        let stream = self.connect_tcp(host, port).await?;
        Ok(Box::new(stream))
    }
}
