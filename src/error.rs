//! Error types for Tunn
//!
//! This module defines all custom error types used throughout the application.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for tunnel operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TCP dial to the remote or the upstream proxy failed
    #[error("Failed to connect to {addr}: {source}")]
    Dial {
        /// Address that was dialed
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// TLS negotiation failed
    #[error("TLS handshake with {server} failed: {reason}")]
    Tls {
        /// Server name used for verification
        server: String,
        /// Failure description
        reason: String,
    },

    /// Masked handshake or SSH authentication failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A bounded phase did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed client-side protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Opening a backend channel failed
    #[error("Failed to open backend channel to {address}: {reason}")]
    BackendDial {
        /// Requested backend address
        address: String,
        /// Failure description
        reason: String,
    },

    /// Mid-stream forwarding fault
    #[error("Forwarding error: {0}")]
    Forward(String),
}

impl TunnelError {
    /// Whether this error belongs to the startup phase and should end the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TunnelError::Config(_)
                | TunnelError::Dial { .. }
                | TunnelError::Tls { .. }
                | TunnelError::Handshake(_)
                | TunnelError::Timeout(_)
        )
    }
}

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Client went away during the greeting or request header
    #[error("Handshake interrupted: {0}")]
    Interrupted(io::Error),

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Address or port could not be read
    #[error("Truncated request: {0}")]
    TruncatedRequest(io::Error),
}

impl Socks5Error {
    /// Reply code to send before aborting, if the protocol calls for one
    pub fn reply_code(&self) -> Option<Socks5ReplyCode> {
        match self {
            Socks5Error::UnsupportedVersion(_) | Socks5Error::Interrupted(_) => None,
            Socks5Error::CommandNotSupported(_) => Some(Socks5ReplyCode::CommandNotSupported),
            Socks5Error::AddressTypeNotSupported(_) => {
                Some(Socks5ReplyCode::AddressTypeNotSupported)
            }
            Socks5Error::TruncatedRequest(_) => Some(Socks5ReplyCode::GeneralFailure),
        }
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}
