//! Local proxy frontends
//!
//! Each frontend listens on `127.0.0.1`, negotiates its client protocol and
//! then forwards the connection over a channel opened on the remote session.

pub mod forward;
pub mod http;
pub mod server;
pub mod socks5;

pub use forward::{ForwardStats, Forwarder, DEFAULT_LINGER};
pub use http::{HttpProxy, HTTP_NEGOTIATION_TIMEOUT};
pub use server::{handle_client_with_timeout, open_channel, start_proxy, ClientHandler, Deadline};
pub use socks5::{Socks5Proxy, SOCKS5_NEGOTIATION_TIMEOUT};

use crate::error::TunnelError;
use crate::session::RemoteSession;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Client-facing protocol of the local listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    /// SOCKS5 CONNECT (`socks5` or `socks`)
    Socks5,
    /// HTTP CONNECT and absolute-URI proxying
    Http,
}

impl ProxyType {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ProxyType::Socks5 => "socks5",
            ProxyType::Http => "http",
        }
    }

    /// Build the frontend for this protocol on top of `session`
    pub fn handler(&self, session: Arc<dyn RemoteSession>) -> Arc<dyn ClientHandler> {
        match self {
            ProxyType::Socks5 => Arc::new(Socks5Proxy::new(session)),
            ProxyType::Http => Arc::new(HttpProxy::new(session)),
        }
    }
}

impl FromStr for ProxyType {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socks5" | "socks" => Ok(ProxyType::Socks5),
            "http" => Ok(ProxyType::Http),
            other => Err(TunnelError::Config(format!(
                "unsupported proxy type '{}' (expected socks5, socks or http)",
                other
            ))),
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
