//! Tunnel configuration types
//!
//! Defines the configuration structures for the tunnel client.

use crate::error::TunnelError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default local listener port
pub const DEFAULT_LISTENER_PORT: u16 = 1080;

/// Default proxy type for the local listener
pub const DEFAULT_PROXY_TYPE: &str = "http";

/// Default connection timeout in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// How the remote endpoint is reached
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dial the SSH host directly
    Direct,
    /// Dial an upstream HTTP-speaking proxy and handshake through it
    Proxy,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => write!(f, "direct"),
            Mode::Proxy => write!(f, "proxy"),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Connection mode
    pub mode: Mode,

    /// Upstream proxy host (proxy mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,

    /// Upstream proxy port (proxy mode only), given as string or number
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_port: Option<String>,

    /// SSH endpoint and credentials
    pub ssh: SshConfig,

    /// Local proxy listener
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Masked handshake template
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_payload: String,

    /// Establishment timeout in seconds
    #[serde(default, alias = "connectionTimeoutSeconds")]
    pub connection_timeout: u64,
}

/// SSH endpoint configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SshConfig {
    /// SSH server host
    #[serde(default)]
    pub host: String,

    /// SSH server port (0 means default)
    #[serde(default)]
    pub port: u16,

    /// Username for password authentication
    #[serde(default)]
    pub username: String,

    /// Password for password authentication
    #[serde(default)]
    pub password: String,
}

/// Local listener configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    /// Loopback port to listen on (0 means default)
    #[serde(default)]
    pub port: u16,

    /// Frontend protocol: `socks5`, `socks` or `http`
    #[serde(default)]
    pub proxy_type: String,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.ssh.host.is_empty() {
            return Err(TunnelError::Config("SSH host is required".to_string()));
        }
        if self.ssh.username.is_empty() {
            return Err(TunnelError::Config("SSH username is required".to_string()));
        }
        if self.ssh.password.is_empty() {
            return Err(TunnelError::Config("SSH password is required".to_string()));
        }

        if self.mode == Mode::Proxy {
            let host_missing = self.proxy_host.as_deref().map_or(true, str::is_empty);
            let port_missing = self.proxy_port.as_deref().map_or(true, str::is_empty);
            if host_missing || port_missing {
                return Err(TunnelError::Config(
                    "proxyHost and proxyPort are required for proxy mode".to_string(),
                ));
            }
            if self.http_payload.is_empty() {
                return Err(TunnelError::Config(
                    "httpPayload is required for proxy mode".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Fill in defaults for unset (zero or empty) fields
    pub fn apply_defaults(&mut self) {
        if self.ssh.port == 0 {
            self.ssh.port = DEFAULT_SSH_PORT;
        }
        if self.listener.port == 0 {
            self.listener.port = DEFAULT_LISTENER_PORT;
        }
        if self.listener.proxy_type.is_empty() {
            self.listener.proxy_type = DEFAULT_PROXY_TYPE.to_string();
        }
        if self.connection_timeout == 0 {
            self.connection_timeout = DEFAULT_CONNECTION_TIMEOUT_SECS;
        }
    }

    /// Sample configuration for the given mode
    pub fn sample(mode: Mode) -> Self {
        let (proxy_host, proxy_port) = match mode {
            Mode::Direct => (None, None),
            Mode::Proxy => (
                Some("proxy.example.com".to_string()),
                Some("80".to_string()),
            ),
        };

        Config {
            mode,
            proxy_host,
            proxy_port,
            ssh: SshConfig {
                host: "target.example.com".to_string(),
                port: 80,
                username: "user".to_string(),
                password: "password".to_string(),
            },
            listener: ListenerConfig {
                port: DEFAULT_LISTENER_PORT,
                proxy_type: "socks5".to_string(),
            },
            http_payload: "GET / HTTP/1.1[crlf]Host: [host][crlf]Upgrade: websocket[crlf][crlf]"
                .to_string(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
        }
    }
}

/// Accept a port written either as a JSON string or a number
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Port>::deserialize(deserializer)?.map(|port| match port {
        Port::Text(text) => text,
        Port::Number(number) => number.to_string(),
    }))
}
