//! Flowlink Fabric - Client side of the backend link
//!
//! One persistent connection carries correlated calls and unsolicited push
//! events. [`Client`] bundles the pieces:
//!
//! - [`ConnectionManager`] opens the link and reconnects after unsolicited closes
//! - [`RequestMultiplexer`] correlates calls with replies and enforces deadlines
//! - [`EventDispatcher`] fans push events out to listeners
//! - [`router::Router`] tells replies and events apart
//!
//! # Example
//!
//! ```no_run
//! use flowlink_fabric::{Client, ClientConfig};
//! use flowlink_fabric::protocol::{FlowComplete, ListRoutes};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::websocket(ClientConfig::default());
//! client.set_status_callback(|state| println!("backend link is {}", state));
//! client.connect_backend(None);
//!
//! let _sub = client.on(|_: FlowComplete| println!("flow finished"));
//!
//! let mut states = client.state_changes();
//! states.wait_for(|s| s.is_connected()).await?;
//! let routes = client.invoke(&ListRoutes).await?;
//! println!("{} routes mapped", routes.routes.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod multiplexer;
pub mod protocol;
pub mod router;
pub mod transport;

// Re-exports for convenience
pub use client::Client;
pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::{EventDispatcher, Subscription};
pub use error::{Error, Result};
pub use multiplexer::{CallHandle, RequestMultiplexer};
