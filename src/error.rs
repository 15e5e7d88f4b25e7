use std::error::Error;
use std::fmt;

use crate::auth::AuthError;
use crate::core::channel::ChannelError;
use crate::protocol::{ChannelBuildError, DecodeError};

#[derive(Debug)]
pub enum RustyChatError {
    // Connections errors
    ConnectionError(String),

    // Protocol errors
    Decode(DecodeError),
    InvalidPayload(ChannelBuildError),
    MessageTooLarge(usize),

    // Channel errors
    Channel(ChannelError),

    // Auth errors
    Auth(AuthError),

    // Admission control
    RateLimited,

    // Storage errors
    StorageError(String),

    // Validation errors
    ValidationError(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RustyChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::Decode(err) => write!(f, "{}", err),
            Self::InvalidPayload(err) => write!(f, "Invalid payload: {}", err),
            Self::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Self::Channel(err) => write!(f, "{}", err),
            Self::Auth(err) => write!(f, "{}", err),
            Self::RateLimited => write!(f, "Too many messages, please wait."),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            Self::InvalidPayload(err) => Some(err),
            Self::Channel(err) => Some(err),
            Self::Auth(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for RustyChatError {
    fn from(err: DecodeError) -> Self {
        RustyChatError::Decode(err)
    }
}

impl From<ChannelBuildError> for RustyChatError {
    fn from(err: ChannelBuildError) -> Self {
        RustyChatError::InvalidPayload(err)
    }
}

impl From<ChannelError> for RustyChatError {
    fn from(err: ChannelError) -> Self {
        RustyChatError::Channel(err)
    }
}

impl From<AuthError> for RustyChatError {
    fn from(err: AuthError) -> Self {
        RustyChatError::Auth(err)
    }
}

// Generic result type for RustyChat
pub type Result<T> = std::result::Result<T, RustyChatError>;
