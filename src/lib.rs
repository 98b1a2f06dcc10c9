//! # Tunn - SSH Tunneling Client with Local Proxies
//!
//! Tunn authenticates an SSH session to a remote host, either directly or
//! through an upstream HTTP proxy, and exposes a local SOCKS5 or HTTP proxy
//! whose requests are relayed over that session as `direct-tcpip` channels.
//!
//! ## Features
//!
//! - **Masked Handshake**: An operator-defined HTTP payload can precede the SSH
//!   session so that tunnel setup looks like ordinary HTTP or WebSocket traffic
//! - **Direct and Proxy Modes**: Dial the SSH host directly or go through an
//!   upstream proxy
//! - **TLS on 443**: Connections to port 443 are wrapped in TLS automatically
//! - **Local Frontends**: SOCKS5 CONNECT or HTTP CONNECT/absolute-URI proxying
//!   on `127.0.0.1`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tunn::config::load_config;
//! use tunn::manager::Manager;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.json")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     Manager::new(config).run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Local client -> Frontend -> SSH channel -> SSH server -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod establish;
pub mod helper;
pub mod manager;
pub mod proxy;
pub mod session;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config, Mode};
pub use error::{Socks5Error, TunnelError};
pub use manager::Manager;
pub use proxy::ProxyType;
pub use session::{RemoteSession, SshSession};

/// Version of the Tunn library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
