//! Tunnel lifecycle
//!
//! Establishes the raw connection, starts the SSH session over it, starts
//! one local frontend and tears everything down when shutdown is signalled.

use crate::config::Config;
use crate::error::TunnelError;
use crate::establish::establish;
use crate::proxy::{start_proxy, ProxyType};
use crate::session::{RemoteSession, SshSession};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Owns the remote session and the listener of one tunnel
pub struct Manager {
    config: Config,
    session: Option<Arc<dyn RemoteSession>>,
    listener_shutdown: Option<broadcast::Sender<bool>>,
    local_addr: Option<SocketAddr>,
}

impl Manager {
    /// Create a manager for a validated configuration
    pub fn new(config: Config) -> Self {
        Manager {
            config,
            session: None,
            listener_shutdown: None,
            local_addr: None,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address of the running frontend, if started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Frontend protocol selected by the configuration
    pub fn proxy_type(&self) -> Result<ProxyType> {
        Ok(self.config.listener.proxy_type.parse::<ProxyType>()?)
    }

    /// Establish the connection and authenticate the SSH session
    pub async fn connect(&mut self) -> Result<()> {
        let conn = establish(&self.config)
            .await
            .context("Failed to establish connection")?;

        let session = SshSession::new(&self.config.ssh.username, &self.config.ssh.password);
        session
            .start(conn)
            .await
            .context("Failed to start SSH session")?;

        self.attach_session(Arc::new(session));
        Ok(())
    }

    /// Use an already started session
    pub fn attach_session(&mut self, session: Arc<dyn RemoteSession>) {
        self.session = Some(session);
    }

    /// Start the configured frontend on the session
    pub async fn start_frontend(&mut self) -> Result<SocketAddr> {
        let proxy_type = self.proxy_type()?;
        let session = self
            .session
            .clone()
            .context("Cannot start a frontend without a session")?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let addr = start_proxy(
            proxy_type.name(),
            self.config.listener.port,
            proxy_type.handler(session),
            shutdown_rx,
        )
        .await
        .with_context(|| {
            format!(
                "Failed to start {} proxy on port {}",
                proxy_type, self.config.listener.port
            )
        })?;

        self.listener_shutdown = Some(shutdown_tx);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop the listener and close the session; safe to call more than once
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.listener_shutdown.take() {
            let _ = tx.send(true);
        }
        self.local_addr = None;

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Error while closing session: {}", e);
            }
        }
        Ok(())
    }

    /// Run the tunnel until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<bool>) -> Result<()> {
        let proxy_type = self.proxy_type()?;

        info!("Mode: {}", self.config.mode);
        if let Err(e) = self.connect().await {
            log_startup_failure(&e);
            return Err(e);
        }

        let addr = match self.start_frontend().await {
            Ok(addr) => addr,
            Err(e) => {
                log_startup_failure(&e);
                self.stop().await?;
                return Err(e);
            }
        };
        info!("{} proxy ready on {}", proxy_type, addr);

        let _ = shutdown.recv().await;
        info!("Shutdown signal received, closing tunnel...");

        self.stop().await?;
        info!("Tunnel closed.");
        Ok(())
    }
}

fn log_startup_failure(err: &anyhow::Error) {
    match err.downcast_ref::<TunnelError>() {
        Some(root) if root.is_fatal() => error!("Tunnel startup failed: {:#}", err),
        _ => warn!("Tunnel startup interrupted: {:#}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    #[tokio::test]
    async fn test_unknown_proxy_type_is_config_error() {
        let mut config = Config::sample(Mode::Direct);
        config.listener.proxy_type = "ftp".to_string();

        let manager = Manager::new(config);
        let err = manager.proxy_type().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TunnelError>(),
            Some(TunnelError::Config(_))
        ));

        // run fails before dialing anything
        let (_tx, rx) = broadcast::channel(1);
        let err = manager.run(rx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TunnelError>(),
            Some(TunnelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_frontend_requires_session() {
        let mut manager = Manager::new(Config::sample(Mode::Direct));
        assert!(manager.start_frontend().await.is_err());
        assert!(manager.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_ok() {
        let mut manager = Manager::new(Config::sample(Mode::Direct));
        assert!(manager.stop().await.is_ok());
        assert!(manager.stop().await.is_ok());
    }
}
