//! In-memory storage implementation for development and testing
//!
//! This provides a complete storage implementation that keeps all data
//! in memory. Nothing survives a restart.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::*;
use crate::auth::{self, AuthError};
use crate::constants::{DEFAULT_HISTORY_CAPACITY, HISTORY_REPLY_LIMIT};
use crate::error::{Result, RustyChatError};
use crate::protocol::{decode, MessageType, PayloadKind};

/// Run an argon2 operation on the blocking pool
async fn run_blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    let outcome = tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| RustyChatError::StorageError(format!("credential task failed: {}", e)))?;
    Ok(outcome?)
}

/// In-memory accounts with argon2-hashed passwords
#[derive(Default)]
pub struct MemoryAuthStore {
    users: RwLock<HashMap<String, String>>, // username -> PHC hash
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn authenticate_user(&self, username: &str, password: &str) -> Result<bool> {
        let stored = self.users.read().await.get(username).cloned();
        match stored {
            Some(hash) => {
                let password = password.to_string();
                let verified = run_blocking(move || auth::verify_password(&password, &hash)).await?;
                Ok(verified)
            }
            None => Ok(false),
        }
    }

    async fn add_user(&self, username: &str, password: &str) -> Result<()> {
        auth::validate_username(username)?;
        auth::validate_password(password)?;

        // Hash outside the lock and off the async workers
        let owned = password.to_string();
        let hash = run_blocking(move || auth::hash_password(&owned)).await?;

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(AuthError::DuplicateUsername.into());
        }
        users.insert(username.to_string(), hash);
        log::info!("Registered user {}", username);
        Ok(())
    }
}

/// In-memory block relationships
#[derive(Default)]
pub struct MemoryBlockStore {
    blocked_by: RwLock<HashMap<String, HashSet<String>>>, // blocker -> blocked users
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn block_user(&self, blocker: &str, blocked: &str) -> Result<()> {
        if blocker == blocked {
            return Err(RustyChatError::ValidationError(
                "You cannot block yourself".to_string(),
            ));
        }
        self.blocked_by
            .write()
            .await
            .entry(blocker.to_string())
            .or_default()
            .insert(blocked.to_string());
        Ok(())
    }

    async fn unblock_user(&self, blocker: &str, blocked: &str) -> Result<()> {
        let mut blocked_by = self.blocked_by.write().await;
        let removed = blocked_by
            .get_mut(blocker)
            .map_or(false, |set| set.remove(blocked));
        if !removed {
            return Err(RustyChatError::ValidationError(format!(
                "{} is not blocked",
                blocked
            )));
        }
        if blocked_by.get(blocker).map_or(false, HashSet::is_empty) {
            blocked_by.remove(blocker);
        }
        Ok(())
    }

    async fn is_blocked(&self, blocker: &str, blocked: &str) -> Result<bool> {
        let blocked_by = self.blocked_by.read().await;
        Ok(blocked_by
            .get(blocker)
            .map_or(false, |set| set.contains(blocked)))
    }

    async fn get_blocked_users(&self, user: &str) -> Result<Vec<String>> {
        let blocked_by = self.blocked_by.read().await;
        let mut users: Vec<String> = blocked_by
            .get(user)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        Ok(users)
    }

    async fn get_blocker_users(&self, user: &str) -> Result<Vec<String>> {
        let blocked_by = self.blocked_by.read().await;
        let mut users: Vec<String> = blocked_by
            .iter()
            .filter(|(_, set)| set.contains(user))
            .map(|(blocker, _)| blocker.clone())
            .collect();
        users.sort();
        Ok(users)
    }
}

/// Bounded in-memory history of plain-encoded frames
pub struct MemoryHistoryStore {
    lines: RwLock<VecDeque<String>>,
    max_size: usize,
    blocks: Arc<dyn BlockStore>,
}

impl MemoryHistoryStore {
    pub fn new(blocks: Arc<dyn BlockStore>) -> Self {
        Self::with_capacity(blocks, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(blocks: Arc<dyn BlockStore>, capacity: usize) -> Self {
        Self {
            lines: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            max_size: capacity.max(1),
            blocks,
        }
    }

    pub async fn count(&self) -> usize {
        self.lines.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn add_message(&self, raw_line: &str) -> Result<()> {
        let line = raw_line.trim_end_matches(['\r', '\n']);
        let mut lines = self.lines.write().await;
        if lines.len() >= self.max_size {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
        Ok(())
    }

    async fn get_history(
        &self,
        requester: &str,
        message_types: &[MessageType],
    ) -> Result<Vec<String>> {
        let mut excluded: HashSet<String> = self
            .blocks
            .get_blocked_users(requester)
            .await?
            .into_iter()
            .collect();
        excluded.extend(self.blocks.get_blocker_users(requester).await?);

        let lines = self.lines.read().await;
        let mut visible: Vec<String> = lines
            .iter()
            .rev()
            .filter(|line| {
                let payload = match decode(line) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("Skipping undecodable history entry: {}", e);
                        return false;
                    }
                };
                if !message_types.contains(&payload.message_type()) {
                    return false;
                }
                if let PayloadKind::Whisper {
                    sender, recipient, ..
                } = &payload.kind
                {
                    if sender != requester && recipient != requester {
                        return false;
                    }
                }
                let involves_excluded = payload
                    .sender()
                    .into_iter()
                    .chain(payload.recipient())
                    .any(|user| excluded.contains(user));
                !involves_excluded
            })
            .take(HISTORY_REPLY_LIMIT)
            .cloned()
            .collect();

        visible.reverse();
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, Payload};

    #[tokio::test]
    async fn test_auth_store_register_and_login() {
        let store = MemoryAuthStore::new();
        store.add_user("alice", "correct horse").await.unwrap();

        assert!(store.authenticate_user("alice", "correct horse").await.unwrap());
        assert!(!store.authenticate_user("alice", "wrong horse").await.unwrap());
        assert!(!store.authenticate_user("nobody", "correct horse").await.unwrap());

        let duplicate = store.add_user("alice", "another secret").await;
        assert!(matches!(
            duplicate,
            Err(RustyChatError::Auth(AuthError::DuplicateUsername))
        ));
        assert!(matches!(
            store.add_user("bob", "short").await,
            Err(RustyChatError::Auth(AuthError::WeakPassword))
        ));
        assert!(matches!(
            store.add_user("b", "long enough").await,
            Err(RustyChatError::Auth(AuthError::InvalidUsername))
        ));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_hashing_does_not_stall_other_tasks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let store = MemoryAuthStore::new();
        store.add_user("alice", "correct horse").await.unwrap();
        assert!(store.authenticate_user("alice", "correct horse").await.unwrap());
        ticker.abort();

        // A single-threaded runtime only ticks if hashing yielded the thread
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_block_store_relationships() {
        let store = MemoryBlockStore::new();
        store.block_user("alice", "bob").await.unwrap();
        store.block_user("carol", "bob").await.unwrap();

        assert!(store.is_blocked("alice", "bob").await.unwrap());
        assert!(!store.is_blocked("bob", "alice").await.unwrap());
        assert_eq!(store.get_blocked_users("alice").await.unwrap(), vec!["bob"]);
        assert_eq!(
            store.get_blocker_users("bob").await.unwrap(),
            vec!["alice", "carol"]
        );

        store.unblock_user("alice", "bob").await.unwrap();
        assert!(!store.is_blocked("alice", "bob").await.unwrap());
        assert!(store.unblock_user("alice", "bob").await.is_err());
        assert!(store.block_user("alice", "alice").await.is_err());
    }

    #[tokio::test]
    async fn test_history_filters_and_caps() {
        let blocks: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        blocks.block_user("mallory", "alice").await.unwrap();
        let history = MemoryHistoryStore::new(blocks);

        for i in 0..(HISTORY_REPLY_LIMIT + 10) {
            let line = encode(&Payload::message("bob", format!("msg {}", i)));
            history.add_message(&line).await.unwrap();
        }
        history
            .add_message(&encode(&Payload::message("mallory", "hidden")))
            .await
            .unwrap();
        history
            .add_message(&encode(&Payload::whisper("bob", "carol", "private")))
            .await
            .unwrap();
        history
            .add_message(&encode(&Payload::system("ignored", "success")))
            .await
            .unwrap();

        let entries = history
            .get_history("alice", &[MessageType::Message, MessageType::Whisper])
            .await
            .unwrap();

        assert_eq!(entries.len(), HISTORY_REPLY_LIMIT);
        assert!(entries.first().unwrap().ends_with("msg 10"));
        assert!(entries.last().unwrap().ends_with(&format!("msg {}", HISTORY_REPLY_LIMIT + 9)));
        assert!(entries.iter().all(|e| !e.contains("mallory")));
        assert!(entries.iter().all(|e| !e.contains("private")));
    }

    #[tokio::test]
    async fn test_history_capacity_drops_oldest() {
        let history = MemoryHistoryStore::with_capacity(Arc::new(MemoryBlockStore::new()), 2);
        for text in ["one", "two", "three"] {
            history
                .add_message(&encode(&Payload::message("bob", text)))
                .await
                .unwrap();
        }
        assert_eq!(history.count().await, 2);
        let entries = history
            .get_history("alice", &[MessageType::Message])
            .await
            .unwrap();
        assert!(entries[0].ends_with("two"));
        assert!(entries[1].ends_with("three"));
    }
}
