//! Remote session abstraction
//!
//! The frontends only ever need two things from the tunnel: open a logical
//! stream to `host:port`, and tear everything down. [`RemoteSession`] is that
//! capability; [`SshSession`] implements it over an authenticated SSH
//! connection using `direct-tcpip` channels.

mod banner;
mod ssh;

pub use banner::strip_markup;
pub use ssh::{SshSession, TunnelHandler, HANDSHAKE_TIMEOUT};

use crate::error::TunnelError;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream of an opened backend channel
pub trait BackendIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> BackendIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed backend channel
pub type BackendStream = Box<dyn BackendIo>;

/// Dial capability exposed by an authenticated remote session
///
/// `dial` is called concurrently from every client task; channels are
/// independent once opened. Closing the session must end every open channel.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Open a backend channel to `address` (`host:port`) over `network`
    async fn dial(&self, network: &str, address: &str) -> Result<BackendStream, TunnelError>;

    /// Close the session; safe to call more than once
    async fn close(&self) -> Result<(), TunnelError>;
}
