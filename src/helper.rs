//! Helper utilities for Tunn
//!
//! This module provides common utility functions used throughout the application.

use std::time::Duration;

/// Default buffer size for IO operations
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Keep-alive period applied to the session socket and the SSH session
pub const KEEPALIVE_SECS: u64 = 30;

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Join a host and port, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Split `host:port` (or `[v6]:port`) into its parts
///
/// Returns `None` when there is no port separator. The port is returned
/// unparsed; IPv6 brackets are removed from the host.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']')?;
        let port = rest[end + 1..].strip_prefix(':')?;
        return Some((&rest[..end], port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        // bare IPv6 literal without a port
        return None;
    }
    Some((host, port))
}

/// Parse `host[:port]`, falling back to `default_port` when no port is given
///
/// The symbolic ports `http` and `https` are understood.
pub fn parse_host_port(addr: &str, default_port: u16) -> Result<(String, u16), String> {
    let Some((host, port)) = split_host_port(addr) else {
        let host = addr.trim_start_matches('[').trim_end_matches(']');
        return Ok((host.to_string(), default_port));
    };

    let port = match port {
        "https" => 443,
        "http" => 80,
        other => other
            .parse::<u16>()
            .map_err(|_| format!("invalid port: {}", other))?,
    };
    Ok((host.to_string(), port))
}
