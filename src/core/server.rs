//! Integrated server service that accepts connections and wires the core together

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::AuthError;
use crate::config::ServerConfig;
use crate::core::channel::ChannelManager;
use crate::core::connection::{Connection, FrameSender};
use crate::core::line_reader::{LineReader, ReadFrame};
use crate::core::rate_limiter::TokenBucketLimiter;
use crate::core::registry::ConnectionRegistry;
use crate::core::router::MessageRouter;
use crate::error::{Result, RustyChatError};
use crate::protocol::{status, Codec, DecodeError, Payload, PayloadKind};
use crate::storage::{
    AuthStore, BlockStore, HistoryStore, MemoryAuthStore, MemoryBlockStore, MemoryHistoryStore,
};

type FrameSource = LineReader<BufReader<OwnedReadHalf>>;

/// Aborts the periodic tasks when the accept loop is dropped
struct BackgroundTasks(Vec<JoinHandle<()>>);

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Chat server: owns the registry, channels and rate limiter and runs one task per connection
pub struct ChatServer {
    config: ServerConfig,
    codec: Codec,
    registry: Arc<ConnectionRegistry>,
    channels: Arc<ChannelManager>,
    limiter: Arc<TokenBucketLimiter>,
    router: MessageRouter,
    auth: Arc<dyn AuthStore>,
}

impl ChatServer {
    /// Create a server over the given storage collaborators
    pub fn new(
        config: ServerConfig,
        auth: Arc<dyn AuthStore>,
        history: Arc<dyn HistoryStore>,
        blocks: Arc<dyn BlockStore>,
    ) -> Self {
        let codec = Codec::new(config.wire_encoding());
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(ChannelManager::new(
            config.channel_sweep_interval,
            config.channel_inactivity_threshold,
        ));
        let limiter = Arc::new(TokenBucketLimiter::new(config.bucket));
        let router = MessageRouter::new(
            registry.clone(),
            channels.clone(),
            blocks,
            history,
            codec,
        );

        Self {
            config,
            codec,
            registry,
            channels,
            limiter,
            router,
            auth,
        }
    }

    /// Create with the in-memory storage backends
    pub fn with_memory_stores(config: ServerConfig) -> Self {
        let blocks: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new(blocks.clone()));
        Self::new(config, Arc::new(MemoryAuthStore::new()), history, blocks)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.limiter
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Bind the configured listening address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.address();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| RustyChatError::ConnectionError(format!("failed to bind {}: {}", addr, e)))
    }

    /// Accept connections until the future is dropped
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let _tasks = BackgroundTasks(vec![
            self.limiter.clone().start_refill_task(),
            self.channels.clone().start_sweep_task(),
        ]);

        if let Ok(addr) = listener.local_addr() {
            info!("Accepting connections on {}", addr);
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Authenticate, then serve one connection until it closes
    pub async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(write_half, rx));
        let mut lines = LineReader::new(BufReader::new(read_half), self.config.max_frame_bytes);

        let connection = match self.authenticate(&mut lines, &tx, peer).await {
            Some(connection) => connection,
            None => {
                // Let the writer flush the last rejection before the socket closes
                drop(tx);
                let _ = writer.await;
                return;
            }
        };
        drop(tx);

        info!(
            "{} logged in from {} ({} online)",
            connection.username,
            peer,
            self.registry.count().await
        );
        self.router
            .announce(
                &Payload::system(
                    format!("{} has joined the chat.", connection.username),
                    status::SUCCESS,
                ),
                &connection.username,
            )
            .await;

        self.serve(&connection, &mut lines).await;
        self.disconnect(&connection).await;
    }

    async fn authenticate(
        &self,
        lines: &mut FrameSource,
        tx: &FrameSender,
        peer: SocketAddr,
    ) -> Option<Arc<Connection>> {
        let mut attempts = 0;

        while attempts < self.config.max_auth_attempts {
            let frame = match lines.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => {
                    debug!("Read error from {} during login: {}", peer, e);
                    return None;
                }
            };
            let line = match frame {
                ReadFrame::Line(line) if line.trim().is_empty() => continue,
                ReadFrame::Line(line) => line,
                rejected => {
                    attempts += 1;
                    debug!("Rejected login frame from {}: {:?}", peer, rejected);
                    if let Some(err) = Self::frame_error(&rejected) {
                        let _ = tx.send(self.codec.encode(&Payload::system_fail(err.to_string())));
                    }
                    continue;
                }
            };
            attempts += 1;

            match self.try_login(&line, tx, peer).await {
                Ok(connection) => {
                    // The bucket must exist before the client learns it may send
                    self.limiter.add(connection.id).await;
                    let success = Payload::user(connection.username.clone(), status::SUCCESS);
                    connection.send_line(&self.codec.encode(&success));
                    return Some(connection);
                }
                Err(e) => {
                    info!(
                        "Login attempt {}/{} from {} failed: {}",
                        attempts, self.config.max_auth_attempts, peer, e
                    );
                    let failure = Payload::user(e.to_string(), status::FAIL);
                    let _ = tx.send(self.codec.encode(&failure));
                }
            }
        }

        warn!("{} exhausted its login attempts", peer);
        None
    }

    async fn try_login(
        &self,
        line: &str,
        tx: &FrameSender,
        peer: SocketAddr,
    ) -> Result<Arc<Connection>> {
        let payload = self.codec.decode(line)?;
        let (username, request, password) = match payload.kind {
            PayloadKind::User {
                username,
                status: request,
                password: Some(password),
            } => (username, request, password),
            _ => {
                return Err(RustyChatError::ValidationError(
                    "Expected a USR payload with username and password".to_string(),
                ))
            }
        };

        if request == status::SIGNUP {
            self.auth.add_user(&username, &password).await?;
        }
        if !self.auth.authenticate_user(&username, &password).await? {
            return Err(AuthError::AuthenticationFailed.into());
        }

        let connection = Arc::new(Connection::new(username, tx.clone()).with_peer(peer));
        if !self.registry.add_unique(connection.clone()).await {
            return Err(AuthError::AlreadyLoggedIn.into());
        }
        Ok(connection)
    }

    /// Error reported for a frame that never reaches the decoder
    fn frame_error(frame: &ReadFrame) -> Option<RustyChatError> {
        match frame {
            ReadFrame::Line(_) => None,
            ReadFrame::Oversized(size) => Some(RustyChatError::MessageTooLarge(*size)),
            ReadFrame::NotUtf8 => Some(
                DecodeError::Malformed("frame is not valid UTF-8".to_string()).into(),
            ),
        }
    }

    async fn serve(&self, connection: &Connection, lines: &mut FrameSource) {
        loop {
            let frame = match lines.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!("Read error from {}: {}", connection.username, e);
                    break;
                }
            };
            let line = match frame {
                ReadFrame::Line(line) if line.is_empty() => continue,
                ReadFrame::Line(line) => line,
                rejected => {
                    if let Some(err) = Self::frame_error(&rejected) {
                        debug!("Rejected frame from {}: {}", connection.username, err);
                        self.router
                            .reply(connection, &Payload::system_fail(err.to_string()));
                    }
                    continue;
                }
            };

            if !self.limiter.check(&connection.id).await {
                debug!("Rate limited {}", connection.username);
                self.router.reply(
                    connection,
                    &Payload::system_fail(RustyChatError::RateLimited.to_string()),
                );
                continue;
            }

            self.router.route(connection, &line).await;
        }
    }

    /// Release everything a closed connection held
    async fn disconnect(&self, connection: &Connection) {
        self.registry.delete(&connection.id).await;
        self.limiter.remove(&connection.id).await;

        let left = self.channels.remove_user(&connection.username).await;
        if !left.is_empty() {
            debug!("{} evicted from channels {:?}", connection.username, left);
        }

        info!(
            "{} disconnected after {:?} ({} online)",
            connection.username,
            connection.connection_duration(),
            self.registry.count().await
        );
        self.router
            .announce(
                &Payload::system(
                    format!("{} has left the chat.", connection.username),
                    status::SUCCESS,
                ),
                &connection.username,
            )
            .await;
    }
}

/// Sole writer of a socket: frames are written whole and in queue order
async fn write_frames(mut writer: OwnedWriteHalf, mut frames: mpsc::UnboundedReceiver<String>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            debug!("Write failed, closing writer: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
