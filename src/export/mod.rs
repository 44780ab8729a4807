//! Export module.
//!
//! One-time migration export: message threads are grouped into
//! channels and serialized, together with users and attachments, into
//! the CSV/ZIP bulk-import layout the target chat service ingests.

pub mod export;
pub use export::*;

pub mod format;
pub use format::*;
