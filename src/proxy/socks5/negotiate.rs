//! SOCKS5 greeting and request parsing
//!
//! Only the "no authentication" method and the CONNECT command are
//! supported. Every read and write is bounded by the caller's deadline.

use super::consts::*;
use crate::error::Socks5Error;
use crate::helper::join_host_port;
use crate::proxy::server::Deadline;
use std::fmt;
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Destination requested by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    /// Dotted IPv4, colon-separated IPv6 (no brackets) or domain name
    pub host: String,
    /// Destination port
    pub port: u16,
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_host_port(&self.host, self.port))
    }
}

/// Run the method negotiation and read one CONNECT request
///
/// The caller is responsible for sending the error reply suggested by
/// [`Socks5Error::reply_code`] and the success reply.
pub async fn negotiate<S>(stream: &mut S, deadline: &Deadline) -> Result<TargetAddr, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    greet(stream, deadline).await?;
    read_request(stream, deadline).await
}

/// Consume the greeting and always select "no authentication"
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
async fn greet<S>(stream: &mut S, deadline: &Deadline) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = deadline
        .bound(stream.read_u8())
        .await
        .map_err(Socks5Error::Interrupted)?;
    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let nmethods = deadline
        .bound(stream.read_u8())
        .await
        .map_err(Socks5Error::Interrupted)?;
    let mut methods = vec![0u8; nmethods as usize];
    deadline
        .bound(stream.read_exact(&mut methods))
        .await
        .map_err(Socks5Error::Interrupted)?;
    debug!("SOCKS5 client offered methods {:?}", methods);

    deadline
        .bound(async {
            stream
                .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
                .await?;
            stream.flush().await
        })
        .await
        .map_err(Socks5Error::Interrupted)
}

/// Read the request header, destination address and port
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
async fn read_request<S>(stream: &mut S, deadline: &Deadline) -> Result<TargetAddr, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    deadline
        .bound(stream.read_exact(&mut header))
        .await
        .map_err(Socks5Error::Interrupted)?;

    let [_version, command, _reserved, addr_type] = header;
    if command != SOCKS5_CMD_TCP_CONNECT {
        return Err(Socks5Error::CommandNotSupported(command));
    }

    let host = match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut octets = [0u8; 4];
            deadline
                .bound(stream.read_exact(&mut octets))
                .await
                .map_err(Socks5Error::TruncatedRequest)?;
            Ipv4Addr::from(octets).to_string()
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let len = deadline
                .bound(stream.read_u8())
                .await
                .map_err(Socks5Error::TruncatedRequest)?;
            let mut domain = vec![0u8; len as usize];
            deadline
                .bound(stream.read_exact(&mut domain))
                .await
                .map_err(Socks5Error::TruncatedRequest)?;
            String::from_utf8_lossy(&domain).into_owned()
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut octets = [0u8; 16];
            deadline
                .bound(stream.read_exact(&mut octets))
                .await
                .map_err(Socks5Error::TruncatedRequest)?;
            format_ipv6(&octets)
        }
        other => return Err(Socks5Error::AddressTypeNotSupported(other)),
    };

    let port = deadline
        .bound(stream.read_u16())
        .await
        .map_err(Socks5Error::TruncatedRequest)?;

    Ok(TargetAddr { host, port })
}

/// Eight big-endian hextets in lowercase hex, without zero compression
pub fn format_ipv6(octets: &[u8; 16]) -> String {
    octets
        .chunks_exact(2)
        .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Socks5ReplyCode;
    use std::time::Duration;
    use tokio::io::duplex;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    async fn run(input: &[u8]) -> (Result<TargetAddr, Socks5Error>, Vec<u8>) {
        let (mut client, mut server) = duplex(1024);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let result = negotiate(&mut server, &deadline()).await;
        drop(server);

        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        (result, written)
    }

    #[tokio::test]
    async fn test_connect_ipv4() {
        let (result, written) = run(&[5, 1, 0, 5, 1, 0, 1, 93, 184, 216, 34, 0, 80]).await;
        assert_eq!(written, vec![5, 0]);
        let target = result.unwrap();
        assert_eq!(target.host, "93.184.216.34");
        assert_eq!(target.port, 80);
        assert_eq!(target.to_string(), "93.184.216.34:80");
    }

    #[tokio::test]
    async fn test_connect_domain() {
        let mut input = vec![5, 2, 0, 2, 5, 1, 0, 3, 11];
        input.extend_from_slice(b"example.com");
        input.extend_from_slice(&443u16.to_be_bytes());

        let (result, _) = run(&input).await;
        let target = result.unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
    }

    #[tokio::test]
    async fn test_connect_ipv6_is_bracketed_once() {
        let mut input = vec![5, 1, 0, 5, 1, 0, 4];
        input.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        input.extend_from_slice(&8080u16.to_be_bytes());

        let (result, _) = run(&input).await;
        let target = result.unwrap();
        assert_eq!(target.host, "2001:db8:0:0:0:0:0:1");
        assert_eq!(target.to_string(), "[2001:db8:0:0:0:0:0:1]:8080");
    }

    #[tokio::test]
    async fn test_wrong_version_aborts_silently() {
        let (result, written) = run(&[4, 1, 0]).await;
        assert!(matches!(result, Err(Socks5Error::UnsupportedVersion(4))));
        assert!(result.unwrap_err().reply_code().is_none());
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        let (result, _) = run(&[5, 1, 0, 5, 2, 0, 1, 127, 0, 0, 1, 0, 80]).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Socks5Error::CommandNotSupported(2)));
        assert_eq!(err.reply_code(), Some(Socks5ReplyCode::CommandNotSupported));
    }

    #[tokio::test]
    async fn test_unsupported_address_type() {
        let (result, _) = run(&[5, 1, 0, 5, 1, 0, 9]).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Socks5Error::AddressTypeNotSupported(9)));
        assert_eq!(
            err.reply_code(),
            Some(Socks5ReplyCode::AddressTypeNotSupported)
        );
    }

    #[tokio::test]
    async fn test_truncated_port() {
        let (result, _) = run(&[5, 1, 0, 5, 1, 0, 1, 10, 0, 0, 1, 0]).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Socks5Error::TruncatedRequest(_)));
        assert_eq!(err.reply_code(), Some(Socks5ReplyCode::GeneralFailure));
    }

    #[tokio::test]
    async fn test_truncated_header_has_no_reply() {
        let (result, _) = run(&[5, 1, 0, 5, 1]).await;
        let err = result.unwrap_err();
        assert!(matches!(err, Socks5Error::Interrupted(_)));
        assert!(err.reply_code().is_none());
    }

    #[tokio::test]
    async fn test_negotiation_deadline() {
        let (_client, mut server) = duplex(64);
        let deadline = Deadline::after(Duration::from_millis(50));
        let err = negotiate(&mut server, &deadline).await.unwrap_err();
        match err {
            Socks5Error::Interrupted(e) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_format_ipv6() {
        let mut octets = [0u8; 16];
        octets[15] = 1;
        assert_eq!(format_ipv6(&octets), "0:0:0:0:0:0:0:1");

        let octets = [
            0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0x02, 0x1a, 0x2b, 0xff, 0xfe, 0x3c, 0x4d, 0x5e,
        ];
        assert_eq!(format_ipv6(&octets), "fe80:0:0:0:21a:2bff:fe3c:4d5e");
    }
}
