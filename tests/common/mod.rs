//! Test utilities and mocks for Tunn
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tunn::session::{BackendStream, RemoteSession};
use tunn::TunnelError;

/// Buffer size of the in-memory backend channels
const CHANNEL_BUFFER: usize = 64 * 1024;

/// Backend end of a channel handed out by [`FakeSession`]
pub struct FakeBackend {
    /// Address passed to `dial`
    pub address: String,
    /// Stream standing in for the remote target
    pub stream: DuplexStream,
}

enum Backends {
    Echo,
    Capture(mpsc::UnboundedSender<FakeBackend>),
}

/// In-memory [`RemoteSession`] recording every dialed address
pub struct FakeSession {
    backends: Backends,
    dialed: Mutex<Vec<String>>,
    refuse: AtomicBool,
    closed: watch::Sender<bool>,
}

impl FakeSession {
    fn with_backends(backends: Backends) -> Self {
        FakeSession {
            backends,
            dialed: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            closed: watch::channel(false).0,
        }
    }

    /// Every channel echoes what it receives until the session is closed
    pub fn echo() -> Arc<Self> {
        Arc::new(Self::with_backends(Backends::Echo))
    }

    /// Every channel's backend end is delivered to the returned receiver
    pub fn capture() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeBackend>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::with_backends(Backends::Capture(tx))), rx)
    }

    /// Make every following dial fail
    pub fn refuse_dials(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Addresses dialed so far, in order
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn dial(&self, network: &str, address: &str) -> Result<BackendStream, TunnelError> {
        self.dialed.lock().unwrap().push(address.to_string());

        if network != "tcp" || self.refuse.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TunnelError::BackendDial {
                address: address.to_string(),
                reason: "refused by fake session".to_string(),
            });
        }

        let (client_end, backend_end) = duplex(CHANNEL_BUFFER);
        match &self.backends {
            Backends::Echo => {
                let closed = self.closed.subscribe();
                tokio::spawn(echo(backend_end, closed));
            }
            Backends::Capture(tx) => {
                let _ = tx.send(FakeBackend {
                    address: address.to_string(),
                    stream: backend_end,
                });
            }
        }
        Ok(Box::new(client_end))
    }

    async fn close(&self) -> Result<(), TunnelError> {
        self.closed.send_replace(true);
        Ok(())
    }
}

async fn echo(mut stream: DuplexStream, mut closed: watch::Receiver<bool>) {
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            },
            _ = closed.changed() => break,
        }
    }
}

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Mock SOCKS5 client messages
pub mod socks5_mock {
    use tunn::proxy::socks5::*;

    /// Method selection offering only "no authentication"
    pub fn create_greeting() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// CONNECT to an IPv4 address
    pub fn create_connect_ipv4(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV4,
        ];
        cmd.extend_from_slice(&ip);
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// CONNECT to a domain name
    pub fn create_connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// CONNECT to an IPv6 address
    pub fn create_connect_ipv6(octets: [u8; 16], port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV6,
        ];
        cmd.extend_from_slice(&octets);
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_session_echo_until_closed() {
        let session = FakeSession::echo();
        let mut stream = session.dial("tcp", "example.com:80").await.unwrap();

        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        session.close().await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(session.dialed(), vec!["example.com:80".to_string()]);
    }

    #[tokio::test]
    async fn test_fake_session_refuses() {
        let session = FakeSession::echo();
        session.refuse_dials();
        assert!(session.dial("tcp", "a:1").await.is_err());
        assert!(FakeSession::echo().dial("udp", "a:1").await.is_err());
    }
}
