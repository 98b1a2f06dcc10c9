//! SOCKS5 frontend
//!
//! Serves exactly one CONNECT per client connection. After the success reply
//! the connection is forwarded over a backend channel until either side
//! closes.

mod consts;
mod negotiate;
mod reply;

pub use consts::*;
pub use negotiate::{format_ipv6, negotiate, TargetAddr};
pub use reply::{reply_bytes, send_reply};

use super::forward::Forwarder;
use super::server::{handle_client_with_timeout, open_channel, ClientHandler, Deadline};
use crate::error::Socks5ReplyCode;
use crate::session::RemoteSession;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Deadline for greeting plus request
pub const SOCKS5_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// SOCKS5 frontend bound to one remote session
pub struct Socks5Proxy {
    session: Arc<dyn RemoteSession>,
    forwarder: Forwarder,
}

impl Socks5Proxy {
    /// Create a frontend dialing through `session`
    pub fn new(session: Arc<dyn RemoteSession>) -> Self {
        Socks5Proxy {
            session,
            forwarder: Forwarder::new(),
        }
    }

    /// Use a custom forwarder
    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = forwarder;
        self
    }

    /// Negotiate one request on `stream` and forward it
    pub async fn serve<S>(&self, mut stream: S, deadline: Deadline)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let target = match negotiate(&mut stream, &deadline).await {
            Ok(target) => target,
            Err(e) => {
                debug!("SOCKS5 negotiation failed: {}", e);
                if let Some(code) = e.reply_code() {
                    let _ = deadline.bound(send_reply(&mut stream, code)).await;
                }
                return;
            }
        };

        if let Err(e) = deadline
            .bound(send_reply(&mut stream, Socks5ReplyCode::Succeeded))
            .await
        {
            debug!("SOCKS5 success reply to {} failed: {}", target, e);
            return;
        }

        info!("SOCKS5 CONNECT {}", target);
        if let Ok(stats) = open_channel(
            self.session.as_ref(),
            &self.forwarder,
            stream,
            &target.host,
            target.port,
        )
        .await
        {
            debug!(
                "SOCKS5 {} closed ({} up / {} down)",
                target, stats.client_to_backend, stats.backend_to_client
            );
        }
    }
}

#[async_trait]
impl ClientHandler for Socks5Proxy {
    async fn handle_client(&self, stream: TcpStream) {
        handle_client_with_timeout(stream, "socks5", SOCKS5_NEGOTIATION_TIMEOUT, |stream, deadline| {
            self.serve(stream, deadline)
        })
        .await;
    }
}
