//! SSH-backed remote session
//!
//! Runs the SSH client handshake and password authentication over an
//! already established byte stream, then opens `direct-tcpip` channels on
//! demand.

use super::banner::strip_markup;
use super::{BackendStream, RemoteSession};
use crate::error::TunnelError;
use crate::helper::{split_host_port, KEEPALIVE_SECS};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use russh::Disconnect;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Deadline for the SSH handshake plus authentication
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Originator reported for every `direct-tcpip` channel
const ORIGINATOR_ADDRESS: &str = "0.0.0.0";

/// russh client handler
///
/// Host keys are accepted without pinning. Banners are printed as plain text.
#[derive(Debug, Default)]
pub struct TunnelHandler;

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        eprintln!("{}", strip_markup(banner));
        Ok(())
    }
}

/// Remote session over an authenticated SSH connection
pub struct SshSession {
    username: String,
    password: String,
    handshake_timeout: Duration,
    handle: RwLock<Option<Arc<Handle<TunnelHandler>>>>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("username", &self.username)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl SshSession {
    /// Create an adapter for the given credentials; nothing is sent yet
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        SshSession {
            username: username.into(),
            password: password.into(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            handle: RwLock::new(None),
        }
    }

    /// Override the handshake deadline
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Whether an authenticated session is currently held
    pub async fn is_started(&self) -> bool {
        self.handle.read().await.is_some()
    }

    /// Run the SSH handshake and authenticate over `conn`
    ///
    /// Fails with [`TunnelError::Timeout`] when the deadline expires and with
    /// [`TunnelError::Handshake`] for any other protocol or auth failure.
    pub async fn start<S>(&self, conn: S) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        info!("Starting SSH transport over connection");

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(KEEPALIVE_SECS)),
            ..Default::default()
        });

        let handshake = async {
            let mut handle = client::connect_stream(config, conn, TunnelHandler)
                .await
                .map_err(|e| TunnelError::Handshake(format!("SSH handshake failed: {}", e)))?;

            info!("Attempting SSH authentication with user: {}", self.username);
            let auth = handle
                .authenticate_password(self.username.clone(), self.password.clone())
                .await
                .map_err(|e| TunnelError::Handshake(format!("SSH authentication failed: {}", e)))?;

            if !auth.success() {
                return Err(TunnelError::Handshake(format!(
                    "SSH authentication rejected for user {}",
                    self.username
                )));
            }
            Ok(handle)
        };

        let handle = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| TunnelError::Timeout(self.handshake_timeout))??;

        *self.handle.write().await = Some(Arc::new(handle));
        info!("SSH transport established and authenticated");
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn dial(&self, network: &str, address: &str) -> Result<BackendStream, TunnelError> {
        let dial_error = |reason: String| TunnelError::BackendDial {
            address: address.to_string(),
            reason,
        };

        if network != "tcp" {
            return Err(dial_error(format!("unsupported network {}", network)));
        }

        let (host, port) = split_host_port(address)
            .ok_or_else(|| dial_error("missing port".to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| dial_error(format!("invalid port {}", port)))?;

        let handle = self
            .handle
            .read()
            .await
            .clone()
            .ok_or_else(|| dial_error("session is not established".to_string()))?;

        if handle.is_closed() {
            return Err(dial_error("session is closed".to_string()));
        }

        let channel = handle
            .channel_open_direct_tcpip(host, u32::from(port), ORIGINATOR_ADDRESS, 0)
            .await
            .map_err(|e| dial_error(e.to_string()))?;

        debug!("Opened direct-tcpip channel to {}", address);
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) -> Result<(), TunnelError> {
        let Some(handle) = self.handle.write().await.take() else {
            return Ok(());
        };

        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "tunnel closed", "en")
            .await
        {
            warn!("SSH disconnect error: {}", e);
        }
        info!("SSH session closed");
        Ok(())
    }
}
