//! Flowlink Core - Route codec, frame templates and wire envelopes
//!
//! Everything in this crate is synchronous and free of I/O. The async
//! connection machinery lives in `flowlink-fabric`.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use flowlink_core::route::{RouteField, RouteLayout};
//!
//! let layout = RouteLayout::new(vec![
//!     RouteField::route("cmd", 1),
//!     RouteField::route("act", 1),
//! ])?;
//!
//! let values = BTreeMap::from([("cmd".to_string(), 1), ("act".to_string(), 2)]);
//! let route = layout.combine(&values);
//! assert_eq!(route, 258);
//! assert_eq!(layout.split(route), values);
//! # Ok::<(), flowlink_core::Error>(())
//! ```

pub mod envelope;
pub mod error;
pub mod route;
pub mod template;

pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use error::{Error, Result};
pub use route::{RouteField, RouteLayout};
pub use template::{FrameTemplate, TemplateCatalog};
