//! Chat module.
//!
//! Everything related to the external chat service: the REST API seam,
//! its HTTP implementation, the reconciler and the per-user session
//! cache.

pub mod api;
pub use api::*;

#[cfg(feature = "http-chat-api")]
pub mod http;
#[cfg(feature = "http-chat-api")]
pub use http::*;

#[cfg(test)]
pub(crate) mod mock;

pub mod reconcile;
pub use reconcile::*;

pub mod session;
pub use session::*;
