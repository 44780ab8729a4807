//! Reply module.
//!
//! Everything related to "reply by email": the correlation patterns,
//! the quote stripper and the ingestion pass that turns inbound email
//! into in-app replies.

pub mod ingest;
pub use ingest::*;

pub mod quote;
pub use quote::*;

pub mod token;
pub use token::*;
