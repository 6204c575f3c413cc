use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::transport::{Address, Connector, FrameSink, FrameSource, Link};

/// WebSocket connector
///
/// Each frame travels as one text message, matching the backend's JSON envelopes.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    connect_timeout: Option<Duration>,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &Address) -> Result<Link> {
        let url = address.ws_url();
        let connect_op = tokio_tungstenite::connect_async(url);

        let (stream, _response) = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??
        } else {
            connect_op.await?
        };

        Ok(link(stream))
    }
}

/// Split an established WebSocket into a [`Link`]
pub fn link<S>(stream: WebSocketStream<S>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = stream.split();
    Link::new(WsFrameWriter { sink }, WsFrameReader { source })
}

/// Complete a server-side handshake on an accepted TCP stream
pub async fn accept(stream: TcpStream) -> Result<Link> {
    let stream = tokio_tungstenite::accept_async(stream).await?;
    Ok(link(stream))
}

pub struct WsFrameWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait::async_trait]
impl<S> FrameSink for WsFrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| Error::InvalidFrame(format!("Frame is not UTF-8: {}", e)))?;
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

pub struct WsFrameReader<S> {
    source: SplitStream<WebSocketStream<S>>,
}

#[async_trait::async_trait]
impl<S> FrameSource for WsFrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Binary(bytes))) => return Ok(bytes.to_vec()),
                Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionClosed),
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}
