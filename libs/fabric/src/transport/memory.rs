//! In-process transport backed by tokio channels
//!
//! Frames are delivered whole and in order. Useful for embedding a backend in
//! the same process and for driving the client deterministically in tests.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{Address, Connector, FrameSink, FrameSource, Link};

/// Create a connected connector/listener pair
///
/// Every successful [`Connector::connect`] on the connector yields the peer
/// link from [`MemoryListener::accept`]. The address is ignored.
pub fn channel() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemoryConnector { accept_tx }, MemoryListener { accept_rx })
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Link>,
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _address: &Address) -> Result<Link> {
        let (client, server) = pipe();
        self.accept_tx.send(server).map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory listener is gone",
            ))
        })?;
        Ok(client)
    }
}

pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<Link>,
}

impl MemoryListener {
    /// Wait for the next client connection; `None` once every connector is dropped
    pub async fn accept(&mut self) -> Option<Link> {
        self.accept_rx.recv().await
    }
}

/// Two links wired back to back
pub fn pipe() -> (Link, Link) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Link::new(MemorySink { tx: Some(a_tx) }, MemorySource { rx: b_rx }),
        Link::new(MemorySink { tx: Some(b_tx) }, MemorySource { rx: a_rx }),
    )
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait::async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(frame.to_vec()).map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait::async_trait]
impl FrameSource for MemorySource {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.rx.recv().await.ok_or(Error::ConnectionClosed)
    }
}
