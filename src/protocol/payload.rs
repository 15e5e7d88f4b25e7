//! In-memory representation of protocol messages

use std::fmt;
use std::str::FromStr;

use super::channel::ChannelPayload;

/// Free-form outcome strings carried in the `status` field
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAIL: &str = "fail";
    pub const REQ: &str = "req";
    pub const RES: &str = "res";
    pub const LOGIN: &str = "login";
    pub const SIGNUP: &str = "signup";
    pub const BLOCK: &str = "block";
    pub const UNBLOCK: &str = "unblock";
}

/// Wire tag identifying a payload's layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Message,
    Whisper,
    System,
    Error,
    User,
    ActiveUsers,
    History,
    Encryption,
    Channel,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Message => "MSG",
            MessageType::Whisper => "WSP",
            MessageType::System => "SYS",
            MessageType::Error => "ERR",
            MessageType::User => "USR",
            MessageType::ActiveUsers => "ACT_USRS",
            MessageType::History => "HSTRY",
            MessageType::Encryption => "ENC",
            MessageType::Channel => "CH",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "MSG" => Ok(MessageType::Message),
            "WSP" => Ok(MessageType::Whisper),
            "SYS" => Ok(MessageType::System),
            "ERR" => Ok(MessageType::Error),
            "USR" => Ok(MessageType::User),
            "ACT_USRS" => Ok(MessageType::ActiveUsers),
            "HSTRY" => Ok(MessageType::History),
            "ENC" => Ok(MessageType::Encryption),
            "CH" => Ok(MessageType::Channel),
            other => Err(other.to_string()),
        }
    }
}

/// Type-specific fields of a payload.
///
/// Each variant holds exactly the fields its wire layout defines, so a payload
/// can never carry fields that belong to another message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// Group message delivered to every non-excluded connection
    Message { sender: String, content: String },
    /// Private message routed by recipient username
    Whisper {
        sender: String,
        recipient: String,
        content: String,
    },
    /// Server notice with an outcome status
    System { content: String, status: String },
    Error { content: String },
    /// Authentication handshake and block/unblock requests
    User {
        username: String,
        status: String,
        password: Option<String>,
    },
    ActiveUsers { users: Vec<String>, status: String },
    /// History request/response; entries are complete plain-encoded frames
    History {
        sender: String,
        entries: Vec<String>,
        status: String,
    },
    /// Encrypted key blob relayed from sender to recipient
    Encryption {
        sender: String,
        recipient: String,
        key: String,
        status: String,
    },
    Channel(ChannelPayload),
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub kind: PayloadKind,
}

impl Payload {
    /// Creates a payload stamped with the current time
    pub fn new(kind: PayloadKind) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            kind,
        }
    }

    pub fn with_timestamp(timestamp: i64, kind: PayloadKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn message(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(PayloadKind::Message {
            sender: sender.into(),
            content: content.into(),
        })
    }

    pub fn whisper(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(PayloadKind::Whisper {
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
        })
    }

    pub fn system(content: impl Into<String>, status: impl Into<String>) -> Self {
        Self::new(PayloadKind::System {
            content: content.into(),
            status: status.into(),
        })
    }

    /// Shorthand for the `SYS fail` reply used for every rejected request
    pub fn system_fail(content: impl Into<String>) -> Self {
        Self::system(content, status::FAIL)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(PayloadKind::Error {
            content: content.into(),
        })
    }

    pub fn user(username: impl Into<String>, status: impl Into<String>) -> Self {
        Self::new(PayloadKind::User {
            username: username.into(),
            status: status.into(),
            password: None,
        })
    }

    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(PayloadKind::User {
            username: username.into(),
            status: status::LOGIN.to_string(),
            password: Some(password.into()),
        })
    }

    pub fn active_users(users: Vec<String>, status: impl Into<String>) -> Self {
        Self::new(PayloadKind::ActiveUsers {
            users,
            status: status.into(),
        })
    }

    pub fn history(
        sender: impl Into<String>,
        entries: Vec<String>,
        status: impl Into<String>,
    ) -> Self {
        Self::new(PayloadKind::History {
            sender: sender.into(),
            entries,
            status: status.into(),
        })
    }

    pub fn channel(payload: ChannelPayload) -> Self {
        Self::new(PayloadKind::Channel(payload))
    }

    pub fn message_type(&self) -> MessageType {
        match &self.kind {
            PayloadKind::Message { .. } => MessageType::Message,
            PayloadKind::Whisper { .. } => MessageType::Whisper,
            PayloadKind::System { .. } => MessageType::System,
            PayloadKind::Error { .. } => MessageType::Error,
            PayloadKind::User { .. } => MessageType::User,
            PayloadKind::ActiveUsers { .. } => MessageType::ActiveUsers,
            PayloadKind::History { .. } => MessageType::History,
            PayloadKind::Encryption { .. } => MessageType::Encryption,
            PayloadKind::Channel(_) => MessageType::Channel,
        }
    }

    /// Username of whoever authored this payload, when the type carries one
    pub fn sender(&self) -> Option<&str> {
        match &self.kind {
            PayloadKind::Message { sender, .. }
            | PayloadKind::Whisper { sender, .. }
            | PayloadKind::History { sender, .. }
            | PayloadKind::Encryption { sender, .. } => Some(sender),
            PayloadKind::Channel(channel) => Some(channel.requester()),
            _ => None,
        }
    }

    pub fn recipient(&self) -> Option<&str> {
        match &self.kind {
            PayloadKind::Whisper { recipient, .. } | PayloadKind::Encryption { recipient, .. } => {
                Some(recipient)
            }
            _ => None,
        }
    }
}
