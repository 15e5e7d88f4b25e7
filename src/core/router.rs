//! Message routing with block-aware fan-out
//!
//! Every decoded payload from an authenticated connection passes through
//! [`MessageRouter::route`], which decides who receives what. Deliveries are
//! best effort: a failed write to one connection never stops the others.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::core::channel::{ChannelManager, Recipients};
use crate::core::connection::Connection;
use crate::core::registry::ConnectionRegistry;
use crate::error::Result;
use crate::protocol::{
    codec, status, ChannelPayload, Codec, MessageType, Payload, PayloadKind,
};
use crate::storage::{BlockStore, HistoryStore};

/// Message types returned for history requests
const HISTORY_TYPES: [MessageType; 2] = [MessageType::Message, MessageType::Whisper];

/// Dispatches incoming payloads to their recipients
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    channels: Arc<ChannelManager>,
    blocks: Arc<dyn BlockStore>,
    history: Arc<dyn HistoryStore>,
    codec: Codec,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        channels: Arc<ChannelManager>,
        blocks: Arc<dyn BlockStore>,
        history: Arc<dyn HistoryStore>,
        codec: Codec,
    ) -> Self {
        Self {
            registry,
            channels,
            blocks,
            history,
            codec,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Route one raw line received from `sender`.
    ///
    /// Undecodable lines and failed requests produce exactly one `SYS fail`
    /// reply to the sender; the connection stays open.
    pub async fn route(&self, sender: &Connection, raw_line: &str) {
        let payload = match self.codec.decode(raw_line) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Rejected frame from {}: {}", sender.username, e);
                self.reply(sender, &Payload::system_fail(e.to_string()));
                return;
            }
        };

        let message_type = payload.message_type();
        if let Err(e) = self.dispatch(sender, payload).await {
            warn!(
                "Failed to route {} from {}: {}",
                message_type, sender.username, e
            );
            self.reply(sender, &Payload::system_fail(e.to_string()));
        }
    }

    async fn dispatch(&self, sender: &Connection, payload: Payload) -> Result<()> {
        let message_type = payload.message_type();

        match payload.kind {
            PayloadKind::Message { content, .. } => {
                self.handle_group_message(sender, content).await
            }
            PayloadKind::Whisper {
                recipient, content, ..
            } => self.handle_whisper(sender, recipient, content).await,
            PayloadKind::Encryption {
                recipient,
                key,
                status: key_status,
                ..
            } => {
                self.handle_key_exchange(sender, recipient, key, key_status)
                    .await
            }
            PayloadKind::User {
                username,
                status: request,
                ..
            } if request == status::BLOCK || request == status::UNBLOCK => {
                self.handle_block(sender, &username, request == status::BLOCK)
                    .await
            }
            PayloadKind::History {
                status: request, ..
            } if request == status::REQ => self.handle_history_request(sender).await,
            PayloadKind::ActiveUsers {
                status: request, ..
            } if request == status::REQ => {
                self.handle_active_users(sender).await
            }
            PayloadKind::Channel(mut request) => {
                request.set_requester(&sender.username);
                self.handle_channel(sender, request).await
            }
            _ => {
                debug!(
                    "Dropping unhandled {} payload from {}",
                    message_type, sender.username
                );
                Ok(())
            }
        }
    }

    /// Usernames `username` must not exchange messages with, itself included
    pub async fn exclusion_set(&self, username: &str) -> Result<HashSet<String>> {
        let mut excluded: HashSet<String> = self
            .blocks
            .get_blocked_users(username)
            .await?
            .into_iter()
            .collect();
        excluded.extend(self.blocks.get_blocker_users(username).await?);
        excluded.insert(username.to_string());
        Ok(excluded)
    }

    /// Send a payload to a single connection
    pub fn reply(&self, connection: &Connection, payload: &Payload) -> bool {
        connection.send_line(&self.codec.encode(payload))
    }

    /// Send an encoded line to every registered connection accepted by `include`
    pub async fn broadcast_where<F>(&self, line: &str, mut include: F) -> usize
    where
        F: FnMut(&Connection) -> bool,
    {
        let mut delivered = 0;
        let mut failed = 0;
        self.registry
            .for_each(|connection| {
                if include(connection.as_ref()) {
                    if connection.send_line(line) {
                        delivered += 1;
                    } else {
                        failed += 1;
                    }
                }
            })
            .await;

        if failed > 0 {
            warn!("Broadcast failed for {} connections", failed);
        }
        delivered
    }

    /// Announce a server notice to everyone except `except`
    pub async fn announce(&self, payload: &Payload, except: &str) -> usize {
        let line = self.codec.encode(payload);
        self.broadcast_where(&line, |connection| connection.username != except)
            .await
    }

    /// Deliver an encoded line to each named user that is online
    async fn send_to_users(&self, usernames: &[String], line: &str) -> usize {
        let mut delivered = 0;
        for username in usernames {
            match self.registry.find_by_owner_name(username).await {
                Some(connection) => {
                    if connection.send_line(line) {
                        delivered += 1;
                    }
                }
                None => trace!("{} is offline, skipping delivery", username),
            }
        }
        delivered
    }

    async fn record_history(&self, payload: &Payload) -> Result<()> {
        self.history.add_message(&codec::encode(payload)).await
    }

    async fn handle_group_message(&self, sender: &Connection, content: String) -> Result<()> {
        let exclusions = self.exclusion_set(&sender.username).await?;
        let outgoing = Payload::message(&sender.username, content);
        self.record_history(&outgoing).await?;

        let line = self.codec.encode(&outgoing);
        let delivered = self
            .broadcast_where(&line, |connection| {
                !exclusions.contains(&connection.username)
            })
            .await;
        debug!("Broadcast message from {} to {} users", sender.username, delivered);
        Ok(())
    }

    async fn handle_whisper(
        &self,
        sender: &Connection,
        recipient: String,
        content: String,
    ) -> Result<()> {
        let exclusions = self.exclusion_set(&sender.username).await?;
        let target = match self.registry.find_by_owner_name(&recipient).await {
            Some(target) => target,
            None => {
                self.reply(sender, &Payload::system_fail("Recipient not found."));
                return Ok(());
            }
        };

        // Blocked whispers are dropped without telling the sender
        if exclusions.contains(&recipient) {
            debug!("Dropping whisper from {} to {}", sender.username, recipient);
            return Ok(());
        }

        let outgoing = Payload::whisper(&sender.username, &recipient, content);
        self.record_history(&outgoing).await?;
        self.reply(&target, &outgoing);
        Ok(())
    }

    async fn handle_key_exchange(
        &self,
        sender: &Connection,
        recipient: String,
        key: String,
        key_status: String,
    ) -> Result<()> {
        let exclusions = self.exclusion_set(&sender.username).await?;
        let target = match self.registry.find_by_owner_name(&recipient).await {
            Some(target) => target,
            None => {
                self.reply(sender, &Payload::system_fail("Recipient not found."));
                return Ok(());
            }
        };
        if exclusions.contains(&recipient) {
            debug!("Dropping key exchange from {} to {}", sender.username, recipient);
            return Ok(());
        }

        let outgoing = Payload::new(PayloadKind::Encryption {
            sender: sender.username.clone(),
            recipient,
            key,
            status: key_status,
        });
        self.reply(&target, &outgoing);
        Ok(())
    }

    async fn handle_block(&self, sender: &Connection, target: &str, block: bool) -> Result<()> {
        let result = if block {
            self.blocks.block_user(&sender.username, target).await
        } else {
            self.blocks.unblock_user(&sender.username, target).await
        };

        let reply = match result {
            Ok(()) if block => Payload::system(format!("You blocked {}.", target), status::SUCCESS),
            Ok(()) => Payload::system(format!("You unblocked {}.", target), status::SUCCESS),
            Err(e) => Payload::system_fail(e.to_string()),
        };
        self.reply(sender, &reply);
        Ok(())
    }

    async fn handle_history_request(&self, sender: &Connection) -> Result<()> {
        let entries = self
            .history
            .get_history(&sender.username, &HISTORY_TYPES)
            .await?;
        debug!("Sending {} history entries to {}", entries.len(), sender.username);
        self.reply(
            sender,
            &Payload::history(&sender.username, entries, status::RES),
        );
        Ok(())
    }

    async fn handle_active_users(&self, sender: &Connection) -> Result<()> {
        let exclusions = self.exclusion_set(&sender.username).await?;
        let users = self
            .registry
            .list_active_usernames()
            .await
            .into_iter()
            .filter(|username| !exclusions.contains(username))
            .collect();
        self.reply(sender, &Payload::active_users(users, status::RES));
        Ok(())
    }

    async fn handle_channel(&self, sender: &Connection, request: ChannelPayload) -> Result<()> {
        let reply = self.channels.handle(&request).await?;
        let line = self.codec.encode(&Payload::channel(reply.response));

        match reply.recipients {
            Recipients::Requester => {
                sender.send_line(&line);
            }
            Recipients::Members(members) => {
                let delivered = self.send_to_users(&members, &line).await;
                debug!(
                    "Channel message from {} delivered to {}/{} members",
                    sender.username,
                    delivered,
                    members.len()
                );
            }
            Recipients::RequesterAndTarget(target) => {
                sender.send_line(&line);
                self.send_to_users(&[target], &line).await;
            }
        }
        Ok(())
    }
}
