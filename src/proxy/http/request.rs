//! HTTP/1.x request head parsing
//!
//! Headers keep their received order and casing so the request can be
//! re-serialized for the backend without changes other than dropping
//! `Proxy-Connection`.

use crate::error::TunnelError;
use crate::helper::parse_host_port;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

/// Longest accepted request, header or chunk-size line
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Most header lines accepted in one request head
pub const MAX_HEADERS: usize = 100;

/// Default port for `CONNECT` targets without one
pub const CONNECT_DEFAULT_PORT: u16 = 443;

/// Default port for plain proxied requests
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Parsed request line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `GET`
    pub method: String,
    /// Request target as sent: authority, absolute URI or origin path
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`
    pub version: String,
    /// Header fields in received order
    pub headers: Vec<(String, String)>,
}

/// Where a non-CONNECT request should be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Backend host, IPv6 without brackets
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Origin-form path including the query
    pub path: String,
}

impl RequestHead {
    /// First header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether this is a `CONNECT` request
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Whether the body uses chunked transfer coding
    pub fn is_chunked(&self) -> bool {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("Transfer-Encoding"))
            .flat_map(|(_, value)| value.split(','))
            .last()
            .map_or(false, |coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Declared body length, if any
    pub fn content_length(&self) -> Result<Option<u64>, TunnelError> {
        self.header("Content-Length")
            .map(|value| {
                value.trim().parse::<u64>().map_err(|_| {
                    TunnelError::Protocol(format!("invalid Content-Length '{}'", value))
                })
            })
            .transpose()
    }

    /// Reject framing headers the body relay could not honour
    ///
    /// A chunked body ignores `Content-Length`, so it is only parsed otherwise.
    pub fn check_body_framing(&self) -> Result<(), TunnelError> {
        if !self.is_chunked() {
            self.content_length()?;
        }
        Ok(())
    }

    /// Host and port of a `CONNECT` request
    pub fn connect_target(&self) -> Result<(String, u16), TunnelError> {
        let (host, port) =
            parse_host_port(&self.target, CONNECT_DEFAULT_PORT).map_err(TunnelError::Protocol)?;
        if host.is_empty() {
            return Err(TunnelError::Protocol(format!(
                "CONNECT target '{}' has no host",
                self.target
            )));
        }
        Ok((host, port))
    }

    /// Backend address and origin-form path of a plain proxied request
    ///
    /// Absolute URIs carry their own authority; otherwise the `Host` header
    /// is used.
    pub fn forward_target(&self) -> Result<ForwardTarget, TunnelError> {
        if self.target.contains("://") {
            let url = Url::parse(&self.target).map_err(|e| {
                TunnelError::Protocol(format!("invalid request URI '{}': {}", self.target, e))
            })?;
            let host = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| {
                    TunnelError::Protocol(format!("request URI '{}' has no host", self.target))
                })?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            let port = url.port_or_known_default().unwrap_or(HTTP_DEFAULT_PORT);
            let path = match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            };
            return Ok(ForwardTarget { host, port, path });
        }

        let host_header = self
            .header("Host")
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| TunnelError::Protocol("missing Host header".to_string()))?;
        let (host, port) =
            parse_host_port(host_header, HTTP_DEFAULT_PORT).map_err(TunnelError::Protocol)?;
        if host.is_empty() {
            return Err(TunnelError::Protocol(format!(
                "Host header '{}' has no host",
                host_header
            )));
        }

        Ok(ForwardTarget {
            host,
            port,
            path: self.target.clone(),
        })
    }

    /// Request line and headers for the backend, ending with the blank line
    pub fn to_backend_bytes(&self, path: &str) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, path, self.version);
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("Proxy-Connection") {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

/// Read one line including its terminator, refusing lines over [`MAX_LINE_LEN`]
///
/// Returns `Ok(false)` on a clean end-of-stream before any byte was read.
pub(crate) async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<bool, TunnelError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let limit = MAX_LINE_LEN as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', line).await?;

    if n == 0 {
        return Ok(false);
    }
    if !line.ends_with(b"\n") {
        return Err(TunnelError::Protocol(if n > MAX_LINE_LEN {
            format!("line exceeds {} bytes", MAX_LINE_LEN)
        } else {
            "connection closed mid-line".to_string()
        }));
    }
    Ok(true)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Read a request line and header block
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead, TunnelError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(256);

    if !read_line(reader, &mut line).await? {
        return Err(TunnelError::Protocol(
            "connection closed before request".to_string(),
        ));
    }
    let request_line = String::from_utf8_lossy(trim_line_ending(&line)).into_owned();
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) if version.starts_with("HTTP/1.") => {
            (method.to_string(), target.to_string(), version.to_string())
        }
        _ => {
            return Err(TunnelError::Protocol(format!(
                "malformed request line '{}'",
                request_line
            )))
        }
    };

    let mut headers = Vec::new();
    loop {
        if !read_line(reader, &mut line).await? {
            return Err(TunnelError::Protocol(
                "connection closed inside request head".to_string(),
            ));
        }
        let text = trim_line_ending(&line);
        if text.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(TunnelError::Protocol(format!(
                "more than {} headers",
                MAX_HEADERS
            )));
        }

        let text = String::from_utf8_lossy(text);
        let (name, value) = text
            .split_once(':')
            .filter(|(name, _)| !name.is_empty() && !name.contains(char::is_whitespace))
            .ok_or_else(|| TunnelError::Protocol(format!("malformed header line '{}'", text)))?;
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}
