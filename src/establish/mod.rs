//! Connection establishment
//!
//! Produces the single raw byte stream that the SSH session runs over,
//! either by dialing the SSH host directly or by dialing an upstream proxy
//! and performing the masked handshake through it.

pub mod masked;

pub use masked::{perform_handshake, render_payload, HandshakeResponse};

use crate::config::{Config, Mode};
use crate::error::TunnelError;
use crate::helper::{duration_from_secs, join_host_port};
use crate::transport::{create_transport, StreamDyn};
use std::time::Duration;
use tracing::info;

/// Raw connection handed to the SSH session
pub type Connection = Box<dyn StreamDyn>;

/// Establish the raw connection selected by `config.mode`
pub async fn establish(config: &Config) -> Result<Connection, TunnelError> {
    match config.mode {
        Mode::Direct => establish_direct(config).await,
        Mode::Proxy => establish_via_proxy(config).await,
    }
}

/// Dial the SSH host, then run the masked handshake if a payload is configured
pub async fn establish_direct(config: &Config) -> Result<Connection, TunnelError> {
    let host = config.ssh.host.as_str();
    let port = config.ssh.port;
    info!("Connecting to {}", join_host_port(host, port));

    let timeout = duration_from_secs(config.connection_timeout);
    let transport = create_transport(port, timeout)?;
    let conn = transport.connect(host, port).await?;

    if config.http_payload.is_empty() {
        return Ok(conn);
    }

    let conn = handshake_within(timeout, conn, &config.http_payload, host, port).await?;
    info!("Masked handshake completed with {}", host);
    Ok(conn)
}

/// Dial the upstream proxy and always run the masked handshake through it
pub async fn establish_via_proxy(config: &Config) -> Result<Connection, TunnelError> {
    let proxy_host = config
        .proxy_host
        .as_deref()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TunnelError::Config("proxyHost is required for proxy mode".to_string()))?;
    let proxy_port = config
        .proxy_port
        .as_deref()
        .ok_or_else(|| TunnelError::Config("proxyPort is required for proxy mode".to_string()))?
        .parse::<u16>()
        .map_err(|_| TunnelError::Config("proxyPort must be a port number".to_string()))?;

    let proxy_addr = join_host_port(proxy_host, proxy_port);
    info!(
        "Connecting to proxy {} for target {}",
        proxy_addr, config.ssh.host
    );

    let timeout = duration_from_secs(config.connection_timeout);
    let transport = create_transport(proxy_port, timeout)?;
    let conn = transport.connect(proxy_host, proxy_port).await?;

    let conn = handshake_within(
        timeout,
        conn,
        &config.http_payload,
        &config.ssh.host,
        config.ssh.port,
    )
    .await?;
    info!("Proxy handshake completed through {}", proxy_addr);
    Ok(conn)
}

/// Masked handshake bounded by the connection timeout
async fn handshake_within(
    timeout: Duration,
    conn: Connection,
    template: &str,
    host: &str,
    port: u16,
) -> Result<Connection, TunnelError> {
    tokio::time::timeout(timeout, perform_handshake(conn, template, host, port))
        .await
        .map_err(|_| TunnelError::Timeout(timeout))?
}
