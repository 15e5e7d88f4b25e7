//! Channel (room) request/response payloads and their builder

use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// Operation a channel payload asks for or reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelAction {
    Create,
    Join,
    Leave,
    Kick,
    Ban,
    GetUsers,
    GetChannels,
    Message,
}

impl ChannelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelAction::Create => "create",
            ChannelAction::Join => "join",
            ChannelAction::Leave => "leave",
            ChannelAction::Kick => "kick",
            ChannelAction::Ban => "ban",
            ChannelAction::GetUsers => "get-users",
            ChannelAction::GetChannels => "get-channels",
            ChannelAction::Message => "message",
        }
    }
}

impl fmt::Display for ChannelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelAction {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "create" => Ok(ChannelAction::Create),
            "join" => Ok(ChannelAction::Join),
            "leave" => Ok(ChannelAction::Leave),
            "kick" => Ok(ChannelAction::Kick),
            "ban" => Ok(ChannelAction::Ban),
            "get-users" => Ok(ChannelAction::GetUsers),
            "get-channels" => Ok(ChannelAction::GetChannels),
            "message" => Ok(ChannelAction::Message),
            other => Err(format!("unknown channel action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// Optional arguments of a channel payload.
///
/// The key set is closed: every argument the protocol knows about has its own field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptionalChannelArgs {
    pub status: Option<String>,
    pub visibility: Option<Visibility>,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub channels: Option<Vec<String>>,
    pub users: Option<Vec<String>>,
    pub target: Option<String>,
}

impl OptionalChannelArgs {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.visibility.is_none()
            && self.message.is_none()
            && self.reason.is_none()
            && self.channels.is_none()
            && self.users.is_none()
            && self.target.is_none()
    }
}

/// Rejected channel payload construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBuildError {
    MissingRequester,
    MissingAction,
}

impl fmt::Display for ChannelBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequester => write!(f, "channel payload requires a requester"),
            Self::MissingAction => write!(f, "channel payload requires an action"),
        }
    }
}

impl Error for ChannelBuildError {}

/// A channel request or response.
///
/// Only [`ChannelPayloadBuilder`] can produce one, so `requester` and `action`
/// are always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPayload {
    action: ChannelAction,
    requester: String,
    channel: Option<String>,
    password: Option<String>,
    size: Option<u32>,
    args: OptionalChannelArgs,
}

impl ChannelPayload {
    pub fn builder() -> ChannelPayloadBuilder {
        ChannelPayloadBuilder::default()
    }

    pub fn action(&self) -> ChannelAction {
        self.action
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn size(&self) -> Option<u32> {
        self.size
    }

    pub fn args(&self) -> &OptionalChannelArgs {
        &self.args
    }

    /// Replaces the requester with the authenticated identity of the connection
    pub(crate) fn set_requester(&mut self, requester: &str) {
        if !requester.is_empty() {
            self.requester = requester.to_string();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelPayloadBuilder {
    action: Option<ChannelAction>,
    requester: Option<String>,
    channel: Option<String>,
    password: Option<String>,
    size: Option<u32>,
    args: OptionalChannelArgs,
}

impl ChannelPayloadBuilder {
    pub fn action(mut self, action: ChannelAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.args.status = Some(status.into());
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.args.visibility = Some(visibility);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.args.message = Some(message.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.args.reason = Some(reason.into());
        self
    }

    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.args.channels = Some(channels);
        self
    }

    pub fn users(mut self, users: Vec<String>) -> Self {
        self.args.users = Some(users);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.args.target = Some(target.into());
        self
    }

    pub fn args(mut self, args: OptionalChannelArgs) -> Self {
        self.args = args;
        self
    }

    pub fn build(self) -> Result<ChannelPayload, ChannelBuildError> {
        let action = self.action.ok_or(ChannelBuildError::MissingAction)?;
        let requester = self
            .requester
            .filter(|r| !r.is_empty())
            .ok_or(ChannelBuildError::MissingRequester)?;

        Ok(ChannelPayload {
            action,
            requester,
            channel: self.channel,
            password: self.password,
            size: self.size,
            args: self.args,
        })
    }
}
