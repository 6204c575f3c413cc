use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request `{action}` timed out after {after:?}")]
    Timeout { action: String, after: Duration },

    #[error("{0}")]
    Protocol(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Layout error: {0}")]
    Layout(#[from] flowlink_core::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, Error>;
