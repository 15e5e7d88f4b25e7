//! Abstract storage interfaces for pluggable backends
//!
//! The chat core only talks to credentials, history and block relationships
//! through these traits, so durable backends can replace the in-memory ones.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::MessageType;

/// Credential storage
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Check a username/password pair. Unknown users are `Ok(false)`.
    async fn authenticate_user(&self, username: &str, password: &str) -> Result<bool>;

    /// Register a new account
    async fn add_user(&self, username: &str, password: &str) -> Result<()>;
}

/// Chat history storage
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record a plain-encoded frame
    async fn add_message(&self, raw_line: &str) -> Result<()>;

    /// Frames of the given types visible to `requester`, oldest first.
    ///
    /// Entries involving a blocking relationship with the requester are left out.
    async fn get_history(&self, requester: &str, message_types: &[MessageType])
        -> Result<Vec<String>>;
}

/// Block relationship storage
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// `blocker` stops receiving from and sending to `blocked`
    async fn block_user(&self, blocker: &str, blocked: &str) -> Result<()>;

    async fn unblock_user(&self, blocker: &str, blocked: &str) -> Result<()>;

    async fn is_blocked(&self, blocker: &str, blocked: &str) -> Result<bool>;

    /// Users `user` has blocked
    async fn get_blocked_users(&self, user: &str) -> Result<Vec<String>>;

    /// Users who have blocked `user`
    async fn get_blocker_users(&self, user: &str) -> Result<Vec<String>>;
}
