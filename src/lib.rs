pub mod config;
pub use config::*;

pub mod tenant;
pub use tenant::*;

pub mod domain;
pub use domain::*;

pub mod store;
pub use store::*;

pub mod chat;
pub use chat::*;

pub mod reply;
pub use reply::*;

pub mod export;
pub use export::*;

pub mod outbox;
pub use outbox::*;

pub mod notify;
pub use notify::*;
