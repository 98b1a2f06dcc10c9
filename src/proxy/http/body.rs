//! Request body relay
//!
//! The body is streamed to the backend byte for byte. For chunked bodies the
//! framing itself is copied, so the backend sees exactly what the client sent.

use super::request::{read_line, RequestHead};
use crate::error::TunnelError;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy the body announced by `head` from `reader` to `writer`
///
/// Returns the number of bytes written, framing included.
pub async fn copy_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    head: &RequestHead,
) -> Result<u64, TunnelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if head.is_chunked() {
        return copy_chunked(reader, writer).await;
    }

    match head.content_length()? {
        Some(length) => copy_exact(reader, writer, length).await,
        None => Ok(0),
    }
}

async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, length: u64) -> Result<u64, TunnelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy_buf(&mut (&mut *reader).take(length), writer).await?;
    if copied < length {
        return Err(TunnelError::Forward(format!(
            "request body truncated: {} of {} bytes",
            copied, length
        )));
    }
    Ok(copied)
}

async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, TunnelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(32);
    let mut total = 0u64;

    loop {
        expect_line(reader, &mut line).await?;
        writer.write_all(&line).await?;
        total += line.len() as u64;

        let size = chunk_size(&line)?;
        if size == 0 {
            break;
        }

        // chunk data plus its CRLF
        total += copy_exact(reader, writer, size).await?;
        expect_line(reader, &mut line).await?;
        writer.write_all(&line).await?;
        total += line.len() as u64;
    }

    // trailer section up to the final blank line
    loop {
        expect_line(reader, &mut line).await?;
        writer.write_all(&line).await?;
        total += line.len() as u64;
        if line == b"\r\n" || line == b"\n" {
            break;
        }
    }

    Ok(total)
}

async fn expect_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<(), TunnelError>
where
    R: AsyncBufRead + Unpin,
{
    if read_line(reader, line).await? {
        Ok(())
    } else {
        Err(TunnelError::Forward(
            "client closed inside chunked body".to_string(),
        ))
    }
}

fn chunk_size(line: &[u8]) -> Result<u64, TunnelError> {
    let text = String::from_utf8_lossy(line);
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16)
        .map_err(|_| TunnelError::Protocol(format!("invalid chunk size '{}'", size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn head(headers: &[(&str, &str)]) -> RequestHead {
        RequestHead {
            method: "POST".to_string(),
            target: "/".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    async fn relay(head: &RequestHead, input: &[u8]) -> (Result<u64, TunnelError>, Vec<u8>, Vec<u8>) {
        let mut reader = BufReader::new(input);
        let mut out = Vec::new();
        let result = copy_body(&mut reader, &mut out, head).await;
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        (result, out, rest)
    }

    #[tokio::test]
    async fn test_content_length_copies_exactly() {
        let head = head(&[("Content-Length", "5")]);
        let (result, out, rest) = relay(&head, b"helloEXTRA").await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(out, b"hello");
        assert_eq!(rest, b"EXTRA");
    }

    #[tokio::test]
    async fn test_content_length_truncated() {
        let head = head(&[("Content-Length", "10")]);
        let (result, _, _) = relay(&head, b"abc").await;
        assert!(matches!(result, Err(TunnelError::Forward(_))));
    }

    #[tokio::test]
    async fn test_no_body() {
        let head = head(&[]);
        let (result, out, rest) = relay(&head, b"NEXT").await;
        assert_eq!(result.unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn test_chunked_relayed_verbatim() {
        let body: &[u8] = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let mut input = body.to_vec();
        input.extend_from_slice(b"AFTER");

        let head = head(&[("Transfer-Encoding", "chunked"), ("Content-Length", "3")]);
        let (result, out, rest) = relay(&head, &input).await;
        assert_eq!(result.unwrap(), body.len() as u64);
        assert_eq!(out, body);
        assert_eq!(rest, b"AFTER");
    }

    #[tokio::test]
    async fn test_chunked_bad_size() {
        let head = head(&[("Transfer-Encoding", "chunked")]);
        let (result, _, _) = relay(&head, b"zz\r\n").await;
        assert!(matches!(result, Err(TunnelError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_chunked_truncated() {
        let head = head(&[("Transfer-Encoding", "chunked")]);
        let (result, _, _) = relay(&head, b"5\r\nab").await;
        assert!(matches!(result, Err(TunnelError::Forward(_))));
    }
}
