use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;
pub mod tcp;
pub mod ws;

pub use self::memory::{MemoryConnector, MemoryListener};
pub use self::tcp::{TcpConnector, TcpConnectorBuilder, TcpTransportListener};
pub use self::ws::WsConnector;

/// Where the backend listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
    /// Request path for WebSocket handshakes
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/ws".to_string()
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: default_path(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// `ws://host:port/path`
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Write half of a connection. Each call carries one complete frame.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Close the connection from this side
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connection
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame, or [`crate::Error::ConnectionClosed`] once the peer is gone
    async fn receive(&mut self) -> Result<Vec<u8>>;
}

/// An open connection, split into its two halves
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Link {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

/// Opens links to an address
///
/// The connection manager calls this once per (re)connect attempt.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address) -> Result<Link>;
}
