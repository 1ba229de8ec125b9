//! WebSocket Server
//!
//! Accept loop and per-connection tasks. A connection must authenticate
//! with its first message; after that every frame is handed to the
//! [`MatchService`] and everything addressed to the player is written from
//! its outbox.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::game::participant::PlayerId;
use crate::network::admission::Identity;
use crate::network::directory::Outbound;
use crate::network::protocol::{AuthResult, ClientMessage, ErrorCode, ServerMessage};
use crate::network::service::{Flow, MatchService};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long a new connection has to authenticate.
    pub auth_timeout: Duration,
    /// How long queued messages get to flush before a socket is dropped.
    pub close_grace: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            auth_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(1),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `TYPERACE_BIND_ADDR` and `TYPERACE_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = std::env::var("TYPERACE_BIND_ADDR").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr = addr;
        }
        if let Some(max) = std::env::var("TYPERACE_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }
        config
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No auth message in time.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// Connection closed or rejected before admission.
    #[error("Connection rejected: {0}")]
    Rejected(String),
}

/// The WebSocket front end.
pub struct GameServer {
    config: ServerConfig,
    service: Arc<MatchService>,
    /// Connected clients and, once admitted, who they are.
    clients: Arc<RwLock<BTreeMap<SocketAddr, Option<PlayerId>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server in front of `service`.
    pub fn new(config: ServerConfig, service: Arc<MatchService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            service,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the accept loop until [`GameServer::shutdown`].
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(reject_full(stream));
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Register the connection and spawn its task.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.clients.write().await.insert(addr, None);

        let clients = self.clients.clone();
        let service = self.service.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = serve(stream, addr, &service, &config, &clients, shutdown_rx).await {
                debug!("Connection {} ended: {}", addr, e);
            }
            clients.write().await.remove(&addr);
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Stop accepting and tell every connection to close.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Drive one connection from handshake to cleanup.
async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    service: &Arc<MatchService>,
    config: &ServerConfig,
    clients: &RwLock<BTreeMap<SocketAddr, Option<PlayerId>>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GameServerError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (identity, outbox) = match authenticate(&mut ws_sender, &mut ws_receiver, addr, service, config).await {
        Ok(admitted) => admitted,
        Err(e) => {
            let _ = ws_sender.close().await;
            return Err(e);
        }
    };
    let id = identity.id();
    if let Some(entry) = clients.write().await.get_mut(&addr) {
        *entry = Some(id);
    }

    let mut sender_task = tokio::spawn(write_outbox(ws_sender, outbox));
    let mut writer_done = false;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg = match ClientMessage::from_json(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                service
                                    .send_to(id, ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format"))
                                    .await;
                                continue;
                            }
                        };
                        if service.handle(&identity, client_msg).await == Flow::Disconnect {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        service
                            .send_to(id, ServerMessage::error(ErrorCode::InvalidMessage, "Binary frames are not supported"))
                            .await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", addr, e);
                        break;
                    }
                    // Control frames are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }
            _ = &mut sender_task => {
                debug!("Writer for {} stopped", addr);
                writer_done = true;
                break;
            }
            _ = shutdown_rx.recv() => {
                service
                    .send_to(id, ServerMessage::Shutdown { reason: "Server shutting down".to_string() })
                    .await;
                break;
            }
        }
    }

    // Flush whatever is queued (errors included) before the socket goes
    if !writer_done
        && service.close(id).await
        && tokio::time::timeout(config.close_grace, &mut sender_task).await.is_err()
    {
        sender_task.abort();
    }
    service.disconnect(id).await;
    sender_task.abort();
    Ok(())
}

/// Wait for the auth message and admit the connection.
async fn authenticate(
    ws_sender: &mut WsSink,
    ws_receiver: &mut WsSource,
    addr: SocketAddr,
    service: &Arc<MatchService>,
    config: &ServerConfig,
) -> Result<(Identity, mpsc::Receiver<Outbound>), GameServerError> {
    let request = loop {
        let frame = tokio::time::timeout(config.auth_timeout, ws_receiver.next())
            .await
            .map_err(|_| GameServerError::AuthTimeout)?;
        match frame {
            Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                Ok(ClientMessage::Auth(request)) => break request,
                Ok(_) => {
                    let msg = ServerMessage::error(ErrorCode::NotAuthenticated, "Authenticate first");
                    send_direct(ws_sender, &msg).await?;
                    return Err(GameServerError::Rejected("message before auth".into()));
                }
                Err(e) => {
                    let msg = ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format");
                    send_direct(ws_sender, &msg).await?;
                    return Err(GameServerError::Rejected(format!("invalid auth message: {e}")));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(GameServerError::Rejected("closed before auth".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    };

    if let Some(version) = &request.client_version {
        debug!("Client {} version {}", addr, version);
    }

    match service.admit(&request, addr.ip()).await {
        Ok((identity, outbox)) => {
            let result = ServerMessage::AuthResult(AuthResult {
                success: true,
                player_id: Some(identity.id()),
                name: Some(identity.profile.name.clone()),
                guest: identity.guest,
                error: None,
                server_version: config.version.clone(),
            });
            if let Err(e) = send_direct(ws_sender, &result).await {
                service.disconnect(identity.id()).await;
                return Err(e);
            }
            Ok((identity, outbox))
        }
        Err(e) => {
            info!("Rejected {}: {}", addr, e);
            let result = ServerMessage::AuthResult(AuthResult {
                success: false,
                player_id: None,
                name: None,
                guest: false,
                error: Some(e.to_string()),
                server_version: config.version.clone(),
            });
            send_direct(ws_sender, &result).await?;
            send_direct(ws_sender, &ServerMessage::Error(e.to_server_error())).await?;
            Err(GameServerError::Rejected(e.to_string()))
        }
    }
}

/// Tell a connection over the cap why it is being turned away.
async fn reject_full(stream: TcpStream) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut ws_sender, _) = ws_stream.split();
    let msg = ServerMessage::error(ErrorCode::ServerFull, "Server is full, try again later");
    if send_direct(&mut ws_sender, &msg).await.is_ok() {
        let _ = ws_sender.close().await;
    }
}

/// Write a message straight to the socket, bypassing the outbox.
async fn send_direct(ws_sender: &mut WsSink, msg: &ServerMessage) -> Result<(), GameServerError> {
    match msg.to_json() {
        Ok(text) => ws_sender.send(Message::Text(text)).await?,
        Err(e) => error!("Failed to serialize message: {}", e),
    }
    Ok(())
}

/// Writer task: drains the outbox into the socket.
async fn write_outbox(mut ws_sender: WsSink, mut outbox: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = outbox.recv().await {
        match outbound {
            Outbound::Message(msg) => {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    // Close requested, send failed, or the outbox was dropped
    let _ = ws_sender.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::core::clock::MatchClock;
    use crate::external::{BuiltinTextProvider, InMemoryProfileStore};
    use crate::network::auth::AuthConfig;
    use crate::network::protocol::AuthRequest;

    fn service() -> Arc<MatchService> {
        MatchService::new(
            GameConfig::default(),
            AuthConfig::default(),
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(BuiltinTextProvider::default()),
            MatchClock::system(),
        )
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(local_config(), service());
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown_stops_run() {
        let server = Arc::new(GameServer::new(local_config(), service()));
        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };
        // Let the listener bind before signalling
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), runner).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_guest_session_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = service();
        let config = local_config();
        let clients = Arc::new(RwLock::new(BTreeMap::new()));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let server_side = {
            let service = service.clone();
            let clients = clients.clone();
            tokio::spawn(async move {
                let (stream, peer) = listener.accept().await.unwrap();
                clients.write().await.insert(peer, None);
                serve(stream, peer, &service, &config, &clients, shutdown_rx).await
            })
        };

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let auth = ClientMessage::Auth(AuthRequest {
            guest_seed: Some("7".into()),
            ..Default::default()
        });
        ws.send(Message::Text(auth.to_json().unwrap())).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("no auth result");
        };
        let ServerMessage::AuthResult(result) = ServerMessage::from_json(&text).unwrap() else {
            panic!("expected auth result, got {text}");
        };
        assert!(result.success);
        assert!(result.guest);

        let ping = ClientMessage::Ping { timestamp: 42 };
        ws.send(Message::Text(ping.to_json().unwrap())).await.unwrap();
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("no pong");
        };
        assert!(matches!(ServerMessage::from_json(&text).unwrap(), ServerMessage::Pong { timestamp: 42, .. }));

        ws.send(Message::Text(ClientMessage::Leave.to_json().unwrap())).await.unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), server_side).await;
        assert!(matches!(finished, Ok(Ok(Ok(())))));
    }
}
