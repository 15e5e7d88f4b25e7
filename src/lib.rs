//! Rusty Chat - A multi-user real-time chat server implemented in Rust
//!
//! This library provides the core of a line-oriented TCP chat server:
//! the wire codec, per-connection rate limiting, the connection registry,
//! channels, and block-aware message routing.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod protocol;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
pub use error::{Result, RustyChatError};
