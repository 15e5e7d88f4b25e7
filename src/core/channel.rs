//! Channel (room) lifecycle and membership
//!
//! Locking: `channels` is the coarse structural lock and only guards which
//! names exist. Each channel's state sits behind its own mutex, taken after the
//! structural lock is released, so operations on different channels never
//! serialize. The only place both are held is the inactivity sweep, which
//! always takes the structural lock first.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::constants::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHANNEL_INACTIVITY_SECS, DEFAULT_CHANNEL_SWEEP_SECS,
};
use crate::error::Result;
use crate::protocol::codec::{ABSENT, FIELD_SEPARATOR, LIST_SEPARATOR};
use crate::protocol::{status, ChannelAction, ChannelPayload, ChannelPayloadBuilder, Visibility};

/// Why a channel operation was refused. `Display` is the reason sent to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    AlreadyExists,
    DoesNotExist,
    IncorrectPassword,
    AtCapacity,
    NotInChannel,
    AlreadyInChannel,
    Banned,
    NotOwner,
    NoActiveChannels,
    InvalidRequest(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "Channel already exists."),
            Self::DoesNotExist => write!(f, "Channel does not exist."),
            Self::IncorrectPassword => write!(f, "Incorrect password."),
            Self::AtCapacity => write!(f, "Channel is full. Try again later."),
            Self::NotInChannel => write!(f, "User not in channel."),
            Self::AlreadyInChannel => write!(f, "User already in channel."),
            Self::Banned => write!(f, "You are banned from this channel."),
            Self::NotOwner => write!(f, "Only the channel owner can do that."),
            Self::NoActiveChannels => write!(f, "No active channels."),
            Self::InvalidRequest(reason) => write!(f, "{}", reason),
        }
    }
}

impl Error for ChannelError {}

/// Server-side state of one live channel
#[derive(Debug, Clone)]
pub struct ChannelDetails {
    pub name: String,
    /// None means the channel is unprotected
    pub password: Option<String>,
    pub capacity: u32,
    pub owner: String,
    pub members: HashSet<String>,
    pub banned: HashSet<String>,
    pub visibility: Visibility,
    pub last_activity: Instant,
    /// Set once the channel has been removed from the map; stale handles must not use it
    closed: bool,
}

impl ChannelDetails {
    pub fn new(
        name: String,
        password: Option<String>,
        capacity: u32,
        owner: String,
        visibility: Visibility,
    ) -> Self {
        let mut members = HashSet::new();
        members.insert(owner.clone());
        Self {
            name,
            password,
            capacity,
            owner,
            members,
            banned: HashSet::new(),
            visibility,
            last_activity: Instant::now(),
            closed: false,
        }
    }

    pub fn requires_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn has_member(&self, username: &str) -> bool {
        self.members.contains(username)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity as usize
    }

    pub fn is_banned(&self, username: &str) -> bool {
        self.banned.contains(username)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_inactive(&self, threshold: Duration) -> bool {
        self.last_activity.elapsed() > threshold
    }

    /// Members sorted by name
    pub fn sorted_members(&self) -> Vec<String> {
        let mut members: Vec<String> = self.members.iter().cloned().collect();
        members.sort();
        members
    }

    fn remove_member(&mut self, username: &str) -> bool {
        let removed = self.members.remove(username);
        if removed && self.owner == username {
            if let Some(next_owner) = self.members.iter().min().cloned() {
                log::debug!("Ownership of {} passes to {}", self.name, next_owner);
                self.owner = next_owner;
            }
        }
        removed
    }
}

/// Who should receive a channel response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    Requester,
    /// Every listed channel member, requester included
    Members(Vec<String>),
    /// The requester and the user a kick/ban was aimed at
    RequesterAndTarget(String),
}

/// Response to a channel request, shaped for the wire
#[derive(Debug, Clone)]
pub struct ChannelReply {
    pub response: ChannelPayload,
    pub recipients: Recipients,
}

impl ChannelReply {
    pub fn is_success(&self) -> bool {
        self.response.args().status.as_deref() == Some(status::SUCCESS)
    }
}

type ChannelHandle = Arc<Mutex<ChannelDetails>>;

/// Owns every live channel
pub struct ChannelManager {
    channels: RwLock<HashMap<String, ChannelHandle>>,
    sweep_interval: Duration,
    inactivity_threshold: Duration,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_CHANNEL_SWEEP_SECS),
            Duration::from_secs(DEFAULT_CHANNEL_INACTIVITY_SECS),
        )
    }
}

impl ChannelManager {
    pub fn new(sweep_interval: Duration, inactivity_threshold: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            sweep_interval,
            inactivity_threshold,
        }
    }

    fn validate_name(name: &str) -> std::result::Result<(), ChannelError> {
        if name.is_empty()
            || name == ABSENT
            || name.contains(LIST_SEPARATOR)
            || name.contains(FIELD_SEPARATOR)
            || name.chars().any(char::is_control)
        {
            return Err(ChannelError::InvalidRequest(
                "Invalid channel name.".to_string(),
            ));
        }
        Ok(())
    }

    /// Clone the handle of a live channel without holding the structural lock afterwards
    async fn lookup(&self, name: &str) -> std::result::Result<ChannelHandle, ChannelError> {
        let channels = self.channels.read().await;
        channels.get(name).cloned().ok_or(ChannelError::DoesNotExist)
    }

    async fn remove_if_current(&self, name: &str, handle: &ChannelHandle) {
        let mut channels = self.channels.write().await;
        if channels
            .get(name)
            .map_or(false, |current| Arc::ptr_eq(current, handle))
        {
            channels.remove(name);
            log::info!("Channel {} deleted", name);
        }
    }

    /// Creates a channel with `owner` as its only member
    pub async fn create(
        &self,
        name: &str,
        password: Option<&str>,
        capacity: u32,
        owner: &str,
        visibility: Visibility,
    ) -> std::result::Result<(), ChannelError> {
        Self::validate_name(name)?;
        if capacity == 0 {
            return Err(ChannelError::InvalidRequest(
                "Channel size must be at least 1.".to_string(),
            ));
        }

        let mut channels = self.channels.write().await;
        if channels.contains_key(name) {
            return Err(ChannelError::AlreadyExists);
        }

        let details = ChannelDetails::new(
            name.to_string(),
            password.filter(|p| !p.is_empty()).map(str::to_string),
            capacity,
            owner.to_string(),
            visibility,
        );
        channels.insert(name.to_string(), Arc::new(Mutex::new(details)));
        log::info!("Channel {} created by {} (capacity {})", name, owner, capacity);
        Ok(())
    }

    pub async fn join(
        &self,
        name: &str,
        password: Option<&str>,
        requester: &str,
    ) -> std::result::Result<(), ChannelError> {
        let handle = self.lookup(name).await?;
        let mut channel = handle.lock().await;
        if channel.closed {
            return Err(ChannelError::DoesNotExist);
        }
        if let Some(expected) = &channel.password {
            if password != Some(expected.as_str()) {
                return Err(ChannelError::IncorrectPassword);
            }
        }
        if channel.is_banned(requester) {
            return Err(ChannelError::Banned);
        }
        if channel.has_member(requester) {
            return Err(ChannelError::AlreadyInChannel);
        }
        if channel.is_full() {
            return Err(ChannelError::AtCapacity);
        }

        channel.members.insert(requester.to_string());
        channel.touch();
        log::debug!("{} joined channel {}", requester, name);
        Ok(())
    }

    /// Removes `requester`; returns true when the channel was deleted because it emptied
    pub async fn leave(&self, name: &str, requester: &str) -> std::result::Result<bool, ChannelError> {
        let handle = self.lookup(name).await?;
        let emptied = {
            let mut channel = handle.lock().await;
            if channel.closed {
                return Err(ChannelError::DoesNotExist);
            }
            if !channel.remove_member(requester) {
                return Err(ChannelError::NotInChannel);
            }
            channel.touch();
            if channel.members.is_empty() {
                channel.closed = true;
            }
            channel.closed
        };

        log::debug!("{} left channel {}", requester, name);
        if emptied {
            self.remove_if_current(name, &handle).await;
        }
        Ok(emptied)
    }

    /// Validates a channel message and returns the members to fan it out to.
    ///
    /// The membership check and the activity stamp happen in one critical section.
    pub async fn message(
        &self,
        name: &str,
        requester: &str,
    ) -> std::result::Result<Vec<String>, ChannelError> {
        let handle = self.lookup(name).await?;
        let mut channel = handle.lock().await;
        if channel.closed {
            return Err(ChannelError::DoesNotExist);
        }
        if !channel.has_member(requester) {
            return Err(ChannelError::NotInChannel);
        }
        channel.touch();
        Ok(channel.sorted_members())
    }

    pub async fn get_users(&self, name: &str) -> std::result::Result<Vec<String>, ChannelError> {
        let handle = self.lookup(name).await?;
        let channel = handle.lock().await;
        if channel.closed {
            return Err(ChannelError::DoesNotExist);
        }
        Ok(channel.sorted_members())
    }

    /// Names of public channels. An empty list is reported as `NoActiveChannels`.
    pub async fn get_channels(&self) -> std::result::Result<Vec<String>, ChannelError> {
        let handles: Vec<ChannelHandle> = {
            let channels = self.channels.read().await;
            channels.values().cloned().collect()
        };

        let mut names = Vec::new();
        for handle in handles {
            let channel = handle.lock().await;
            if !channel.closed && channel.visibility == Visibility::Public {
                names.push(channel.name.clone());
            }
        }

        if names.is_empty() {
            return Err(ChannelError::NoActiveChannels);
        }
        names.sort();
        Ok(names)
    }

    async fn owner_action(
        &self,
        name: &str,
        requester: &str,
        target: &str,
        ban: bool,
    ) -> std::result::Result<(), ChannelError> {
        let handle = self.lookup(name).await?;
        let mut channel = handle.lock().await;
        if channel.closed {
            return Err(ChannelError::DoesNotExist);
        }
        if channel.owner != requester {
            return Err(ChannelError::NotOwner);
        }
        if target == requester {
            return Err(ChannelError::InvalidRequest(
                "You cannot remove yourself.".to_string(),
            ));
        }

        let removed = channel.remove_member(target);
        if ban {
            channel.banned.insert(target.to_string());
        } else if !removed {
            return Err(ChannelError::NotInChannel);
        }
        channel.touch();
        Ok(())
    }

    /// Owner removes a member; they may rejoin later
    pub async fn kick(
        &self,
        name: &str,
        requester: &str,
        target: &str,
    ) -> std::result::Result<(), ChannelError> {
        self.owner_action(name, requester, target, false).await?;
        log::info!("{} kicked {} from {}", requester, target, name);
        Ok(())
    }

    /// Owner removes a user (member or not) and blocks future joins
    pub async fn ban(
        &self,
        name: &str,
        requester: &str,
        target: &str,
    ) -> std::result::Result<(), ChannelError> {
        self.owner_action(name, requester, target, true).await?;
        log::info!("{} banned {} from {}", requester, target, name);
        Ok(())
    }

    /// Evicts a user from every channel they are in (e.g., on disconnect)
    pub async fn remove_user(&self, username: &str) -> Vec<String> {
        let handles: Vec<(String, ChannelHandle)> = {
            let channels = self.channels.read().await;
            channels
                .iter()
                .map(|(name, handle)| (name.clone(), handle.clone()))
                .collect()
        };

        let mut left = Vec::new();
        for (name, handle) in handles {
            let is_member = handle.lock().await.has_member(username);
            if is_member && self.leave(&name, username).await.is_ok() {
                left.push(name);
            }
        }
        left
    }

    /// Snapshot of one channel's state
    pub async fn details(&self, name: &str) -> Option<ChannelDetails> {
        let handle = self.lookup(name).await.ok()?;
        let channel = handle.lock().await;
        (!channel.closed).then(|| channel.clone())
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Deletes every channel idle for longer than the inactivity threshold, members or not
    pub async fn sweep_inactive(&self) -> Vec<String> {
        let mut channels = self.channels.write().await;
        let mut expired = Vec::new();

        for (name, handle) in channels.iter() {
            let mut channel = handle.lock().await;
            if channel.is_inactive(self.inactivity_threshold) {
                channel.closed = true;
                expired.push(name.clone());
            }
        }
        for name in &expired {
            channels.remove(name);
        }

        if !expired.is_empty() {
            log::info!("Swept {} inactive channels", expired.len());
        }
        expired
    }

    /// Start the periodic inactivity sweep
    pub fn start_sweep_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.sweep_inactive().await;
            }
        })
    }

    /// Apply a channel request and shape the response payload
    pub async fn handle(&self, request: &ChannelPayload) -> Result<ChannelReply> {
        let mut base = ChannelPayload::builder()
            .action(request.action())
            .requester(request.requester());
        if let Some(channel) = request.channel() {
            base = base.channel(channel);
        }

        let reply = match self.dispatch(request, base.clone()).await {
            Ok((builder, recipients)) => ChannelReply {
                response: builder.status(status::SUCCESS).build()?,
                recipients,
            },
            Err(err) => {
                log::debug!(
                    "Channel {} by {} refused: {}",
                    request.action(),
                    request.requester(),
                    err
                );
                ChannelReply {
                    response: base.status(status::FAIL).reason(err.to_string()).build()?,
                    recipients: Recipients::Requester,
                }
            }
        };
        Ok(reply)
    }

    async fn dispatch(
        &self,
        request: &ChannelPayload,
        base: ChannelPayloadBuilder,
    ) -> std::result::Result<(ChannelPayloadBuilder, Recipients), ChannelError> {
        let requester = request.requester();
        let args = request.args();
        let channel_name = || {
            request
                .channel()
                .ok_or_else(|| ChannelError::InvalidRequest("Channel name is required.".to_string()))
        };
        let target = || {
            args.target
                .as_deref()
                .ok_or_else(|| ChannelError::InvalidRequest("Target user is required.".to_string()))
        };

        match request.action() {
            ChannelAction::Create => {
                let capacity = request.size().unwrap_or(DEFAULT_CHANNEL_CAPACITY);
                let visibility = args.visibility.unwrap_or_default();
                self.create(channel_name()?, request.password(), capacity, requester, visibility)
                    .await?;
                Ok((base.size(capacity).visibility(visibility), Recipients::Requester))
            }
            ChannelAction::Join => {
                self.join(channel_name()?, request.password(), requester).await?;
                Ok((base, Recipients::Requester))
            }
            ChannelAction::Leave => {
                self.leave(channel_name()?, requester).await?;
                Ok((base, Recipients::Requester))
            }
            ChannelAction::Kick => {
                let target = target()?;
                self.kick(channel_name()?, requester, target).await?;
                Ok((
                    base.target(target),
                    Recipients::RequesterAndTarget(target.to_string()),
                ))
            }
            ChannelAction::Ban => {
                let target = target()?;
                self.ban(channel_name()?, requester, target).await?;
                Ok((
                    base.target(target),
                    Recipients::RequesterAndTarget(target.to_string()),
                ))
            }
            ChannelAction::GetUsers => {
                let users = self.get_users(channel_name()?).await?;
                Ok((base.users(users), Recipients::Requester))
            }
            ChannelAction::GetChannels => {
                let channels = self.get_channels().await?;
                Ok((base.channels(channels), Recipients::Requester))
            }
            ChannelAction::Message => {
                let text = args.message.as_deref().ok_or_else(|| {
                    ChannelError::InvalidRequest("Message text is required.".to_string())
                })?;
                let members = self.message(channel_name()?, requester).await?;
                Ok((base.message(text), Recipients::Members(members)))
            }
        }
    }
}
