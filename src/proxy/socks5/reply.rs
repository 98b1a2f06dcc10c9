//! SOCKS5 reply builder

use super::consts::*;
use crate::error::Socks5ReplyCode;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encode a reply
///
/// The bound address is always reported as IPv4 `0.0.0.0:0`.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn reply_bytes(code: Socks5ReplyCode) -> [u8; 10] {
    [
        SOCKS5_VERSION,
        code.into(),
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_IPV4,
        0,
        0,
        0,
        0,
        0,
        0,
    ]
}

/// Write and flush a reply
pub async fn send_reply<S>(stream: &mut S, code: Socks5ReplyCode) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&reply_bytes(code)).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_bytes() {
        assert_eq!(
            reply_bytes(Socks5ReplyCode::Succeeded),
            [5, 0, 0, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            reply_bytes(Socks5ReplyCode::CommandNotSupported),
            [5, 7, 0, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            reply_bytes(Socks5ReplyCode::AddressTypeNotSupported),
            [5, 8, 0, 1, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_send_reply() {
        let mut stream = tokio_test::io::Builder::new()
            .write(&[5, 1, 0, 1, 0, 0, 0, 0, 0, 0])
            .build();
        send_reply(&mut stream, Socks5ReplyCode::GeneralFailure)
            .await
            .unwrap();
    }
}
