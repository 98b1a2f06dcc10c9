//! HTTP proxy frontend
//!
//! `CONNECT` requests become opaque tunnels. Any other method is sent to the
//! backend once with `Proxy-Connection` removed, and the backend's raw
//! response bytes are copied back until either side closes.

mod body;
mod request;

pub use body::copy_body;
pub use request::{
    read_request_head, ForwardTarget, RequestHead, CONNECT_DEFAULT_PORT, HTTP_DEFAULT_PORT,
    MAX_HEADERS, MAX_LINE_LEN,
};

use super::forward::Forwarder;
use super::server::{handle_client_with_timeout, open_channel, ClientHandler, Deadline};
use crate::error::TunnelError;
use crate::helper::join_host_port;
use crate::session::{BackendStream, RemoteSession};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Deadline for reading the request head
pub const HTTP_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply sent once a `CONNECT` tunnel is accepted
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Body-less response generated by the proxy itself
pub fn synthetic_response(code: u16, reason: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        code, reason
    )
}

/// HTTP frontend bound to one remote session
pub struct HttpProxy {
    session: Arc<dyn RemoteSession>,
    forwarder: Forwarder,
}

impl HttpProxy {
    /// Create a frontend dialing through `session`
    pub fn new(session: Arc<dyn RemoteSession>) -> Self {
        HttpProxy {
            session,
            forwarder: Forwarder::new(),
        }
    }

    /// Use a custom forwarder for `CONNECT` tunnels
    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = forwarder;
        self
    }

    /// Serve one request on `stream`
    pub async fn serve<S>(&self, stream: S, deadline: Deadline)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(stream);

        let head = match deadline.bound(read_request_head(&mut reader)).await {
            Ok(head) => head,
            Err(e) => {
                debug!("HTTP request rejected: {}", e);
                let _ = deadline
                    .bound(reader.get_mut().write_all(synthetic_response(400, "Bad Request").as_bytes()))
                    .await;
                return;
            }
        };

        if head.is_connect() {
            self.serve_connect(reader, head, deadline).await;
        } else {
            self.serve_request(reader, head).await;
        }
    }

    async fn serve_connect<S>(&self, mut reader: BufReader<S>, head: RequestHead, deadline: Deadline)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (host, port) = match head.connect_target() {
            Ok(target) => target,
            Err(e) => {
                debug!("HTTP CONNECT rejected: {}", e);
                let _ = deadline
                    .bound(reader.get_mut().write_all(synthetic_response(400, "Bad Request").as_bytes()))
                    .await;
                return;
            }
        };

        if let Err(e) = deadline
            .bound(reader.get_mut().write_all(CONNECT_ESTABLISHED))
            .await
        {
            debug!("HTTP CONNECT reply failed: {}", e);
            return;
        }

        info!("HTTP CONNECT {}", join_host_port(&host, port));
        // the reader still holds any bytes the client pipelined after the head
        let _ = open_channel(self.session.as_ref(), &self.forwarder, reader, &host, port).await;
    }

    async fn serve_request<S>(&self, mut reader: BufReader<S>, head: RequestHead)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let target = match head.check_body_framing().and_then(|_| head.forward_target()) {
            Ok(target) => target,
            Err(e) => {
                debug!("HTTP request rejected: {}", e);
                let _ = reader
                    .get_mut()
                    .write_all(synthetic_response(400, "Bad Request").as_bytes())
                    .await;
                return;
            }
        };

        let address = join_host_port(&target.host, target.port);
        info!("HTTP {} {}{}", head.method, address, target.path);

        let mut backend = match self.session.dial("tcp", &address).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("Failed to open channel to {}: {}", address, e);
                let _ = reader
                    .get_mut()
                    .write_all(synthetic_response(502, "Bad Gateway").as_bytes())
                    .await;
                return;
            }
        };

        if let Err(e) = send_request(&mut reader, &mut backend, &head, &target).await {
            warn!("Forwarding request to {} failed: {}", address, e);
            let _ = reader
                .get_mut()
                .write_all(synthetic_response(502, "Bad Gateway").as_bytes())
                .await;
            return;
        }

        // one request per connection: anything else the client sends is discarded
        let (mut client_rd, mut client_wr) = tokio::io::split(reader);
        tokio::select! {
            copied = tokio::io::copy(&mut backend, &mut client_wr) => match copied {
                Ok(bytes) => debug!("HTTP response from {}: {} bytes", address, bytes),
                Err(e) => debug!("HTTP response from {} interrupted: {}", address, e),
            },
            _ = wait_for_close(&mut client_rd) => {
                debug!("Client closed before the response from {} ended", address);
            }
        }
    }
}

async fn wait_for_close<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn send_request<S>(
    reader: &mut BufReader<S>,
    backend: &mut BackendStream,
    head: &RequestHead,
    target: &ForwardTarget,
) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    backend.write_all(&head.to_backend_bytes(&target.path)).await?;
    copy_body(reader, backend, head).await?;
    backend.flush().await?;
    Ok(())
}

#[async_trait]
impl ClientHandler for HttpProxy {
    async fn handle_client(&self, stream: TcpStream) {
        handle_client_with_timeout(stream, "http", HTTP_NEGOTIATION_TIMEOUT, |stream, deadline| {
            self.serve(stream, deadline)
        })
        .await;
    }
}
