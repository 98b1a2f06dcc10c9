//! Masked handshake
//!
//! Renders an operator-supplied HTTP-like payload, writes it to the raw
//! connection and waits for an HTTP-style status line plus headers. The
//! response is read one byte at a time so that nothing past the blank line
//! ending the header block is consumed: the peer switches to raw relay right
//! after it, and those bytes belong to the SSH session.

use crate::error::TunnelError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Largest response header block accepted from the peer
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Render a payload template for `host:port`
///
/// Known placeholders are `[host]`, `[port]`, `[host_port]`, `[crlf]`,
/// `[cr]` and `[lf]`. Substituted text is never scanned again and any other
/// bracketed text is copied through unchanged.
pub fn render_payload(template: &str, host: &str, port: u16) -> Vec<u8> {
    let port = port.to_string();
    let mut out = Vec::with_capacity(template.len() + host.len());
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        out.extend_from_slice(rest[..open].as_bytes());
        let tail = &rest[open..];

        let replaced = [
            ("[host_port]", None),
            ("[host]", Some(host)),
            ("[port]", Some(port.as_str())),
            ("[crlf]", Some("\r\n")),
            ("[cr]", Some("\r")),
            ("[lf]", Some("\n")),
        ]
        .into_iter()
        .find(|(token, _)| tail.starts_with(token));

        match replaced {
            Some((token, Some(value))) => {
                out.extend_from_slice(value.as_bytes());
                rest = &tail[token.len()..];
            }
            Some((token, None)) => {
                out.extend_from_slice(host.as_bytes());
                out.push(b':');
                out.extend_from_slice(port.as_bytes());
                rest = &tail[token.len()..];
            }
            None => {
                out.push(b'[');
                rest = &tail[1..];
            }
        }
    }

    out.extend_from_slice(rest.as_bytes());
    out
}

/// Status line and headers returned by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Numeric status code
    pub status: u16,
    /// Status line as received, without the line ending
    pub status_line: String,
    /// Header lines in received order
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// 1xx and 2xx responses let the tunnel proceed
    pub fn is_accepted(&self) -> bool {
        (100..300).contains(&self.status)
    }
}

/// Perform the masked handshake on `conn`
///
/// On success the same connection is handed back untouched. On rejection the
/// connection is dropped, which closes it.
pub async fn perform_handshake<S>(
    mut conn: S,
    template: &str,
    host: &str,
    port: u16,
) -> Result<S, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = render_payload(template, host, port);
    debug!("Sending {} byte handshake payload for {}", payload.len(), host);

    conn.write_all(&payload).await?;
    conn.flush().await?;

    let response = read_response(&mut conn).await?;
    if !response.is_accepted() {
        return Err(TunnelError::Handshake(format!(
            "peer answered '{}'",
            response.status_line
        )));
    }

    info!("Handshake accepted: {}", response.status_line);
    for (name, value) in &response.headers {
        debug!("Handshake header {}: {}", name, value);
    }
    Ok(conn)
}

/// Read one status line and header block without over-reading
pub async fn read_response<S>(conn: &mut S) -> Result<HandshakeResponse, TunnelError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") && !head.ends_with(b"\n\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(TunnelError::Handshake(format!(
                "response header exceeds {} bytes",
                MAX_RESPONSE_HEAD
            )));
        }
        let n = conn.read(&mut byte).await?;
        if n == 0 {
            return Err(TunnelError::Handshake(
                "connection closed before the response header completed".to_string(),
            ));
        }
        head.push(byte[0]);
    }

    parse_response(&head)
}

fn parse_response(head: &[u8]) -> Result<HandshakeResponse, TunnelError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();

    let status_line = lines.next().unwrap_or_default().trim_end().to_string();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TunnelError::Handshake(format!(
            "malformed status line '{}'",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            TunnelError::Handshake(format!("malformed status line '{}'", status_line))
        })?;

    let headers = lines
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Ok(HandshakeResponse {
        status,
        status_line,
        headers,
    })
}
