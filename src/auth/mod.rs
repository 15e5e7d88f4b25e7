//! Credential validation and hashing
//!
//! Account storage lives behind [`crate::storage::AuthStore`]; this module holds
//! the rules every backend applies and the password hashing they share.

pub mod credentials;

use std::error::Error;
use std::fmt;

pub use credentials::{hash_password, verify_password};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Authentication failures. `Display` is the canned reason sent in `USR fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    DuplicateUsername,
    WeakPassword,
    InvalidUsername,
    AuthenticationFailed,
    AlreadyLoggedIn,
    Storage(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateUsername => write!(f, "Username is already taken."),
            Self::WeakPassword => write!(
                f,
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            ),
            Self::InvalidUsername => write!(
                f,
                "Username must be {}-{} characters of letters, digits, '_' or '-'.",
                MIN_USERNAME_LEN, MAX_USERNAME_LEN
            ),
            Self::AuthenticationFailed => write!(f, "Invalid username or password."),
            Self::AlreadyLoggedIn => write!(f, "User is already logged in."),
            Self::Storage(msg) => write!(f, "Authentication unavailable: {}", msg),
        }
    }
}

impl Error for AuthError {}

/// Usernames travel unescaped in frames, so only a safe alphabet is accepted
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len)
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AuthError::InvalidUsername);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}
