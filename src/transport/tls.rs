//! TLS transport implementation
//!
//! Provides TLS-encrypted connections using rustls (pure Rust, easy static linking).
//! The server name is the dialed host; TLS 1.2 is the minimum accepted version.

use super::{StreamDyn, TcpTransport, Transport};
use crate::error::TunnelError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{version, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// TLS stream type alias
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// TLS transport for encrypted connections using rustls
#[derive(Clone)]
pub struct TlsTransport {
    /// TLS connector
    connector: TlsConnector,
    /// Underlying TCP dialer
    tcp: TcpTransport,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("tcp", &self.tcp)
            .finish()
    }
}

impl TlsTransport {
    /// Create a TLS transport on top of a TCP dialer, trusting the system roots
    pub fn new(tcp: TcpTransport) -> Result<Self, TunnelError> {
        let mut root_store = RootCertStore::empty();

        let native_certs = rustls_native_certs::load_native_certs();
        for err in &native_certs.errors {
            tracing::debug!("Skipping unreadable system certificate: {}", err);
        }
        for cert in native_certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config =
            ClientConfig::builder_with_protocol_versions(&[&version::TLS13, &version::TLS12])
                .with_root_certificates(root_store)
                .with_no_client_auth();

        Ok(TlsTransport {
            connector: TlsConnector::from(Arc::new(tls_config)),
            tcp,
        })
    }

    /// Dial `host:port` and complete the TLS handshake with `host` as server name
    pub async fn connect_tls(&self, host: &str, port: u16) -> Result<TlsStream, TunnelError> {
        let started = Instant::now();
        let tcp_stream = self.tcp.connect_tcp(host, port).await?;

        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| TunnelError::Tls {
                server: host.to_string(),
                reason: format!("invalid server name: {}", e),
            })?;

        let deadline = started + self.tcp.connect_timeout();
        let tls_stream =
            tokio::time::timeout_at(deadline, self.connector.connect(server_name, tcp_stream))
                .await
                .map_err(|_| TunnelError::Tls {
                    server: host.to_string(),
                    reason: format!("handshake timed out after {:?}", self.tcp.connect_timeout()),
                })?
                .map_err(|e| TunnelError::Tls {
                    server: host.to_string(),
                    reason: e.to_string(),
                })?;

        tracing::debug!("TLS connection established to {}:{}", host, port);

        Ok(tls_stream)
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn StreamDyn>, TunnelError> {
        let stream = self.connect_tls(host, port).await?;
        Ok(Box::new(stream))
    }
}
