//! Core functionality for the chat server

pub mod channel;
pub mod connection;
pub mod line_reader;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod server;

// Re-export main components for convenience
pub use channel::{ChannelDetails, ChannelError, ChannelManager, ChannelReply, Recipients};
pub use connection::{Connection, ConnectionId, FrameSender};
pub use line_reader::{LineReader, ReadFrame};
pub use rate_limiter::{BucketConfig, TokenBucketLimiter};
pub use registry::ConnectionRegistry;
pub use router::MessageRouter;
pub use server::ChatServer;
