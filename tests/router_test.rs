use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use rusty_chat::core::{ChannelManager, Connection, ConnectionRegistry, MessageRouter};
use rusty_chat::protocol::{
    decode, encode, status, ChannelAction, ChannelPayload, Codec, Payload, PayloadKind,
    Visibility,
};
use rusty_chat::storage::{BlockStore, HistoryStore, MemoryBlockStore, MemoryHistoryStore};

struct Harness {
    registry: Arc<ConnectionRegistry>,
    channels: Arc<ChannelManager>,
    blocks: Arc<dyn BlockStore>,
    router: MessageRouter,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(ChannelManager::default());
        let blocks: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new(blocks.clone()));
        let router = MessageRouter::new(
            registry.clone(),
            channels.clone(),
            blocks.clone(),
            history,
            Codec::plain(),
        );
        Self {
            registry,
            channels,
            blocks,
            router,
        }
    }

    async fn connect(&self, name: &str) -> (Arc<Connection>, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::new(name, tx));
        self.registry.add(connection.clone()).await;
        (connection, rx)
    }
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Payload> {
    let mut received = Vec::new();
    while let Ok(line) = rx.try_recv() {
        received.push(decode(&line).unwrap());
    }
    received
}

fn system_content(payload: &Payload) -> (&str, &str) {
    match &payload.kind {
        PayloadKind::System { content, status } => (content.as_str(), status.as_str()),
        other => panic!("expected SYS, got {:?}", other),
    }
}

#[tokio::test]
async fn test_group_message_honors_exclusions() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (_bob, mut bob_rx) = harness.connect("bob").await;
    let (_carol, mut carol_rx) = harness.connect("carol").await;
    let (_dave, mut dave_rx) = harness.connect("dave").await;

    harness.blocks.block_user("carol", "alice").await.unwrap();
    harness.blocks.block_user("alice", "dave").await.unwrap();

    // The claimed sender is replaced by the connection owner
    harness
        .router
        .route(&alice, "MSG|1|mallory|2|hi\r\n")
        .await;

    let bob_received = drain(&mut bob_rx);
    assert_eq!(bob_received.len(), 1);
    assert_eq!(bob_received[0].sender(), Some("alice"));
    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut carol_rx).is_empty());
    assert!(drain(&mut dave_rx).is_empty());
}

#[tokio::test]
async fn test_whisper_to_unknown_recipient() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;

    harness
        .router
        .route(&alice, &encode(&Payload::whisper("alice", "ghost", "boo")))
        .await;

    let replies = drain(&mut alice_rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(
        system_content(&replies[0]),
        ("Recipient not found.", status::FAIL)
    );
}

#[tokio::test]
async fn test_whisper_delivery_and_block_drop() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (_bob, mut bob_rx) = harness.connect("bob").await;
    let (_carol, mut carol_rx) = harness.connect("carol").await;
    harness.blocks.block_user("carol", "alice").await.unwrap();

    harness
        .router
        .route(&alice, &encode(&Payload::whisper("alice", "bob", "psst")))
        .await;
    harness
        .router
        .route(&alice, &encode(&Payload::whisper("alice", "carol", "psst")))
        .await;

    let bob_received = drain(&mut bob_rx);
    assert_eq!(bob_received.len(), 1);
    assert_eq!(bob_received[0].recipient(), Some("bob"));
    assert!(drain(&mut carol_rx).is_empty());
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_undecodable_frame_gets_one_failure() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (_bob, mut bob_rx) = harness.connect("bob").await;

    harness.router.route(&alice, "MSG|1|alice|3|hello\r\n").await;
    harness.router.route(&alice, "BOGUS|1\r\n").await;

    let replies = drain(&mut alice_rx);
    assert_eq!(replies.len(), 2);
    assert!(replies
        .iter()
        .all(|reply| system_content(reply).1 == status::FAIL));
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn test_block_request_changes_routing() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (bob, mut bob_rx) = harness.connect("bob").await;

    harness.router.route(&alice, "USR|1|bob|block\r\n").await;
    let replies = drain(&mut alice_rx);
    assert_eq!(system_content(&replies[0]).1, status::SUCCESS);
    assert!(harness.blocks.is_blocked("alice", "bob").await.unwrap());

    harness
        .router
        .route(&bob, &encode(&Payload::message("bob", "anyone?")))
        .await;
    assert!(drain(&mut alice_rx).is_empty());

    harness.router.route(&alice, "USR|1|bob|unblock\r\n").await;
    drain(&mut alice_rx);
    harness
        .router
        .route(&bob, &encode(&Payload::message("bob", "hello again")))
        .await;
    assert_eq!(drain(&mut alice_rx).len(), 1);
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn test_history_request_returns_visible_entries() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (bob, _bob_rx) = harness.connect("bob").await;
    let (carol, _carol_rx) = harness.connect("carol").await;

    harness
        .router
        .route(&bob, &encode(&Payload::message("bob", "first")))
        .await;
    harness
        .router
        .route(&bob, &encode(&Payload::whisper("bob", "carol", "not for alice")))
        .await;
    harness
        .router
        .route(&carol, &encode(&Payload::whisper("carol", "alice", "for alice")))
        .await;
    drain(&mut alice_rx);

    harness.router.route(&alice, "HSTRY|1|x||req\r\n").await;

    let replies = drain(&mut alice_rx);
    assert_eq!(replies.len(), 1);
    match &replies[0].kind {
        PayloadKind::History {
            sender,
            entries,
            status: reply_status,
        } => {
            assert_eq!(sender, "alice");
            assert_eq!(reply_status, status::RES);
            assert_eq!(entries.len(), 2);
            assert!(entries[0].ends_with("first"));
            assert!(entries[1].ends_with("for alice"));
        }
        other => panic!("expected HSTRY, got {:?}", other),
    }
}

#[tokio::test]
async fn test_active_users_hide_blocked() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    harness.connect("bob").await;
    harness.connect("carol").await;
    harness.blocks.block_user("carol", "alice").await.unwrap();

    harness.router.route(&alice, "ACT_USRS|1||req\r\n").await;

    let replies = drain(&mut alice_rx);
    assert_eq!(
        replies[0].kind,
        PayloadKind::ActiveUsers {
            users: vec!["bob".to_string()],
            status: status::RES.to_string(),
        }
    );
}

#[tokio::test]
async fn test_channel_message_reaches_members_only() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (_bob, mut bob_rx) = harness.connect("bob").await;
    let (_carol, mut carol_rx) = harness.connect("carol").await;

    harness
        .channels
        .create("rust", None, 5, "alice", Visibility::Public)
        .await
        .unwrap();
    harness.channels.join("rust", None, "bob").await.unwrap();

    let request = ChannelPayload::builder()
        .action(ChannelAction::Message)
        .requester("someone-else")
        .channel("rust")
        .message("ownership!")
        .build()
        .unwrap();
    harness
        .router
        .route(&alice, &encode(&Payload::channel(request)))
        .await;

    for received in [drain(&mut alice_rx), drain(&mut bob_rx)] {
        assert_eq!(received.len(), 1);
        match &received[0].kind {
            PayloadKind::Channel(reply) => {
                assert_eq!(reply.requester(), "alice");
                assert_eq!(reply.args().message.as_deref(), Some("ownership!"));
                assert_eq!(reply.args().status.as_deref(), Some(status::SUCCESS));
            }
            other => panic!("expected CH, got {:?}", other),
        }
    }
    assert!(drain(&mut carol_rx).is_empty());
}

#[tokio::test]
async fn test_kick_notifies_target() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("alice").await;
    let (_bob, mut bob_rx) = harness.connect("bob").await;
    harness
        .channels
        .create("rust", None, 5, "alice", Visibility::Public)
        .await
        .unwrap();
    harness.channels.join("rust", None, "bob").await.unwrap();

    let kick = ChannelPayload::builder()
        .action(ChannelAction::Kick)
        .requester("alice")
        .channel("rust")
        .target("bob")
        .build()
        .unwrap();
    harness
        .router
        .route(&alice, &encode(&Payload::channel(kick)))
        .await;

    assert_eq!(drain(&mut alice_rx).len(), 1);
    assert_eq!(drain(&mut bob_rx).len(), 1);
    assert_eq!(
        harness.channels.get_users("rust").await.unwrap(),
        vec!["alice"]
    );
}

#[tokio::test]
async fn test_plain_message_is_rebroadcast() {
    let harness = Harness::new();
    let (alice, _alice_rx) = harness.connect("Alice").await;
    let (_bob, mut bob_rx) = harness.connect("Bob").await;

    harness.router.route(&alice, "MSG|1700000000|Alice|5|Hello\r\n").await;

    let received = drain(&mut bob_rx);
    assert_eq!(
        received[0].kind,
        PayloadKind::Message {
            sender: "Alice".to_string(),
            content: "Hello".to_string(),
        }
    );
}

#[tokio::test]
async fn test_channel_capacity_over_the_wire() {
    let harness = Harness::new();
    let (alice, mut alice_rx) = harness.connect("Alice").await;
    let (bob, mut bob_rx) = harness.connect("Bob").await;
    let (carol, mut carol_rx) = harness.connect("Carol").await;

    harness
        .router
        .route(&alice, "CH|1|create|Alice|lobby|-|2|visibility=public\r\n")
        .await;
    harness.router.route(&bob, "CH|1|join|Bob|lobby|-|-\r\n").await;
    harness.router.route(&carol, "CH|1|join|Carol|lobby|-|-\r\n").await;

    let channel_reply = |payloads: Vec<Payload>| match payloads.into_iter().next().map(|p| p.kind) {
        Some(PayloadKind::Channel(reply)) => reply,
        other => panic!("expected CH, got {:?}", other),
    };

    let created = channel_reply(drain(&mut alice_rx));
    assert_eq!(created.args().status.as_deref(), Some(status::SUCCESS));
    assert_eq!(created.size(), Some(2));

    let joined = channel_reply(drain(&mut bob_rx));
    assert_eq!(joined.args().status.as_deref(), Some(status::SUCCESS));

    let refused = channel_reply(drain(&mut carol_rx));
    assert_eq!(refused.args().status.as_deref(), Some(status::FAIL));
    assert_eq!(
        refused.args().reason.as_deref(),
        Some("Channel is full. Try again later.")
    );
}
