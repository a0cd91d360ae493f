//! HTTP request handlers.

pub mod admin;
pub mod chat;
pub mod common;
pub mod health;
pub mod me;
pub mod uploads;

pub use admin::*;
pub use chat::*;
pub use health::*;
pub use me::*;
pub use uploads::*;
