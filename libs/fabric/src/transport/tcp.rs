use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::transport::{Address, Connector, FrameSink, FrameSource, Link};

/// Largest frame accepted from the wire (100MB)
const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// TCP connector with length-prefix framing
///
/// Messages are sent with a 4-byte big-endian length prefix
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Connector with no timeouts
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuring the connector
    pub fn builder() -> TcpConnectorBuilder {
        TcpConnectorBuilder::new()
    }

    /// Wrap an already-connected stream
    pub fn link(&self, stream: TcpStream) -> Link {
        let (read, write) = stream.into_split();
        Link::new(
            TcpFrameWriter {
                half: write,
                send_timeout: self.send_timeout,
            },
            TcpFrameReader {
                half: read,
                receive_timeout: self.receive_timeout,
            },
        )
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &Address) -> Result<Link> {
        let connect_op = TcpStream::connect((address.host.as_str(), address.port));

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??
        } else {
            connect_op.await?
        };
        stream.set_nodelay(true)?;

        Ok(self.link(stream))
    }
}

/// Write half of a framed TCP connection
pub struct TcpFrameWriter {
    half: OwnedWriteHalf,
    send_timeout: Option<Duration>,
}

#[async_trait::async_trait]
impl FrameSink for TcpFrameWriter {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| Error::InvalidFrame(format!("Message too large: {} bytes", frame.len())))?;

        let send_op = async {
            // Write length prefix (4 bytes, big-endian)
            self.half.write_u32(len).await?;

            // Write data
            self.half.write_all(frame).await?;
            self.half.flush().await?;

            Ok::<(), Error>(())
        };

        if let Some(timeout) = self.send_timeout {
            tokio::time::timeout(timeout, send_op)
                .await
                .map_err(|_| Error::Custom("Send timeout exceeded".to_string()))?
        } else {
            send_op.await
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.half.shutdown().await?;
        Ok(())
    }
}

/// Read half of a framed TCP connection
pub struct TcpFrameReader {
    half: OwnedReadHalf,
    receive_timeout: Option<Duration>,
}

fn closed_on_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

#[async_trait::async_trait]
impl FrameSource for TcpFrameReader {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        let receive_op = async {
            let len = self.half.read_u32().await.map_err(closed_on_eof)? as usize;

            if len > MAX_FRAME_LEN {
                return Err(Error::InvalidFrame(format!(
                    "Message too large: {} bytes",
                    len
                )));
            }

            let mut buf = vec![0u8; len];
            self.half
                .read_exact(&mut buf)
                .await
                .map_err(closed_on_eof)?;

            Ok::<Vec<u8>, Error>(buf)
        };

        if let Some(timeout) = self.receive_timeout {
            tokio::time::timeout(timeout, receive_op)
                .await
                .map_err(|_| Error::Custom("Receive timeout exceeded".to_string()))?
        } else {
            receive_op.await
        }
    }
}

/// TCP listener for accepting framed connections
///
/// Serves as the backend side of a TCP link, e.g. in-process test backends.
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<(Link, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((TcpConnector::new().link(stream), addr))
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

/// Builder for configuring the TCP connector
#[derive(Default)]
pub struct TcpConnectorBuilder {
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl TcpConnectorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TcpConnector {
        TcpConnector {
            connect_timeout: self.connect_timeout,
            send_timeout: self.send_timeout,
            receive_timeout: self.receive_timeout,
        }
    }
}
