//! Transport module for Tunn
//!
//! This module provides the raw connection layer used to reach the SSH
//! endpoint or the upstream proxy: plain TCP, or TLS when the port is 443.

mod tcp;
#[cfg(feature = "rustls-tls")]
mod tls;

pub use tcp::TcpTransport;
#[cfg(feature = "rustls-tls")]
pub use tls::TlsTransport;

use crate::error::TunnelError;
use crate::helper::KEEPALIVE_SECS;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Port that switches the dial to TLS
pub const TLS_PORT: u16 = 443;

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(KEEPALIVE_SECS),
            keepalive_interval: Some(KEEPALIVE_SECS),
        }
    }
}

impl SocketOpts {
    /// Socket options for the long-lived session connection
    pub fn for_session() -> Self {
        SocketOpts::default()
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Transport trait for the different raw connection types
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Connect to `host:port` and return a boxed byte stream
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn StreamDyn>, TunnelError>;
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> StreamDyn for T {}

/// Pick TCP or TLS for a destination port
///
/// Port 443 is dialed with TLS, using `host` as the server name.
pub fn create_transport(
    port: u16,
    connect_timeout: Duration,
) -> Result<Box<dyn Transport>, TunnelError> {
    let tcp = TcpTransport::with_defaults()
        .with_socket_opts(SocketOpts::for_session())
        .with_connect_timeout(connect_timeout);

    if port != TLS_PORT {
        return Ok(Box::new(tcp));
    }

    #[cfg(feature = "rustls-tls")]
    {
        Ok(Box::new(TlsTransport::new(tcp)?))
    }

    #[cfg(not(feature = "rustls-tls"))]
    {
        Err(TunnelError::Config(
            "port 443 requires TLS support. Recompile with --features rustls-tls".to_string(),
        ))
    }
}
