//! Network proxy between the user interface and the servers.
//!
//! One UDP socket talks to both the lobby and, once seated, the match
//! endpoint. Requests are correlated with responses by sequence number;
//! pushes and chat are queued for the view task. A heartbeat task probes
//! the match, and any transport failure funnels into a single idempotent
//! graceful disconnection.

use crate::view::ViewEvent;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{
    EndpointAddress, GameError, GameState, LobbySummary, Packet, Position, Request, Response,
    CONNECT_RETRY_DELAY_MS, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_DATAGRAM_SIZE,
    MAX_MISSED_PONGS, REQUEST_TIMEOUT_MS,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};

/// Failures surfaced to the user interface.
#[derive(Debug, PartialEq, Error)]
pub enum ClientError {
    /// The server processed the request and refused it.
    #[error(transparent)]
    Game(#[from] GameError),
    /// The transport failed; the proxy has torn itself down.
    #[error("connection to the server was lost")]
    Connection,
}

#[derive(Debug, Clone)]
struct Timing {
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    request_timeout: Duration,
    connect_retry_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            connect_retry_delay: Duration::from_millis(CONNECT_RETRY_DELAY_MS),
        }
    }
}

struct ProxyInner {
    socket: Arc<UdpSocket>,
    lobby_addr: SocketAddr,
    match_addr: Mutex<Option<SocketAddr>>,
    online: AtomicBool,
    seq: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    pong_tx: Mutex<Option<mpsc::UnboundedSender<u64>>>,
    view_tx: mpsc::UnboundedSender<ViewEvent>,
    shutdown: watch::Sender<bool>,
    timing: Timing,
}

/// Cloneable handle to the connection; all clones share one socket and one
/// online flag.
pub struct ServerProxy {
    inner: Arc<ProxyInner>,
}

impl Clone for ServerProxy {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ServerProxy {
    /// Binds a socket and resolves the lobby, retrying forever until it
    /// answers. Pushes received at any point go to `view_tx`.
    pub async fn connect(
        lobby_addr: SocketAddr,
        service_name: &str,
        view_tx: mpsc::UnboundedSender<ViewEvent>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::connect_with(lobby_addr, service_name, view_tx, Timing::default()).await
    }

    async fn connect_with(
        lobby_addr: SocketAddr,
        service_name: &str,
        view_tx: mpsc::UnboundedSender<ViewEvent>,
        timing: Timing,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let proxy = Self {
            inner: Arc::new(ProxyInner {
                socket,
                lobby_addr,
                match_addr: Mutex::new(None),
                online: AtomicBool::new(true),
                seq: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                pong_tx: Mutex::new(None),
                view_tx,
                shutdown,
                timing,
            }),
        };
        proxy.spawn_receiver(shutdown_rx);

        loop {
            let probe = Request::Resolve {
                service: service_name.to_string(),
            };
            match proxy.request_once(probe, lobby_addr).await {
                Ok(Response::Resolved { .. }) => break,
                Ok(other) => warn!("Unexpected answer to lobby probe: {:?}", other),
                Err(_) => info!("Lobby at {} not reachable yet, retrying", lobby_addr),
            }
            sleep(proxy.inner.timing.connect_retry_delay).await;
        }
        info!("Connected to lobby at {}", lobby_addr);
        Ok(proxy)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub async fn choose_nickname(&self, nickname: &str) -> Result<(), ClientError> {
        let request = Request::ChooseNickname {
            nickname: nickname.to_string(),
        };
        match self.request(request, self.inner.lobby_addr).await? {
            Response::NicknameAccepted => Ok(()),
            Response::Error(e) => Err(ClientError::Game(e)),
            _ => Err(ClientError::Connection),
        }
    }

    pub async fn create_game(
        &self,
        capacity: usize,
        nickname: &str,
    ) -> Result<EndpointAddress, ClientError> {
        let request = Request::CreateGame {
            capacity,
            nickname: nickname.to_string(),
        };
        self.endpoint_request(request).await
    }

    pub async fn join_game(&self, nickname: &str) -> Result<EndpointAddress, ClientError> {
        self.endpoint_request(Request::JoinGame {
            nickname: nickname.to_string(),
        })
        .await
    }

    pub async fn recover_game(&self, nickname: &str) -> Result<EndpointAddress, ClientError> {
        self.endpoint_request(Request::RecoverGame {
            nickname: nickname.to_string(),
        })
        .await
    }

    pub async fn game_exists(&self, nickname: &str) -> Result<bool, ClientError> {
        let request = Request::GameExists {
            nickname: nickname.to_string(),
        };
        match self.request(request, self.inner.lobby_addr).await? {
            Response::GameExists(exists) => Ok(exists),
            Response::Error(e) => Err(ClientError::Game(e)),
            _ => Err(ClientError::Connection),
        }
    }

    pub async fn get_lobbies(&self, nickname: &str) -> Result<Vec<LobbySummary>, ClientError> {
        let request = Request::GetLobbies {
            nickname: nickname.to_string(),
        };
        match self.request(request, self.inner.lobby_addr).await? {
            Response::Lobbies(lobbies) => Ok(lobbies),
            Response::Error(e) => Err(ClientError::Game(e)),
            _ => Err(ClientError::Connection),
        }
    }

    /// Verifies the endpoint handed out by the lobby actually answers to
    /// its name, then starts heartbeating it.
    pub async fn connect_to_match(&self, endpoint: &EndpointAddress) -> Result<(), ClientError> {
        let addr = SocketAddr::new(self.inner.lobby_addr.ip(), endpoint.port);
        let probe = Request::Resolve {
            service: endpoint.name.clone(),
        };
        match self.request(probe, addr).await? {
            Response::Resolved { .. } => {}
            Response::Error(e) => return Err(ClientError::Game(e)),
            _ => return Err(ClientError::Connection),
        }

        *self.inner.match_addr.lock().unwrap() = Some(addr);
        self.start_heartbeat(addr);
        info!("Connected to match '{}' at {}", endpoint.name, addr);
        Ok(())
    }

    pub async fn make_move(
        &self,
        positions: Vec<Position>,
        column: usize,
        nickname: &str,
    ) -> Result<(), ClientError> {
        let addr = self.match_addr()?;
        let request = Request::MakeMove {
            positions,
            column,
            nickname: nickname.to_string(),
        };
        match self.request(request, addr).await? {
            Response::MoveAccepted => Ok(()),
            Response::Error(e) => Err(ClientError::Game(e)),
            _ => Err(ClientError::Connection),
        }
    }

    /// Chat is fire-and-forget: the match never acknowledges it.
    pub async fn message_all(&self, text: &str, from: &str) -> Result<(), ClientError> {
        let addr = self.match_addr()?;
        self.send_oneway(
            Request::MessageAll {
                text: text.to_string(),
                from: from.to_string(),
            },
            addr,
        )
        .await
    }

    pub async fn message_someone(
        &self,
        text: &str,
        from: &str,
        to: &str,
    ) -> Result<(), ClientError> {
        let addr = self.match_addr()?;
        self.send_oneway(
            Request::MessageSomeone {
                text: text.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            },
            addr,
        )
        .await
    }

    /// Tears the connection down exactly once: further requests fail, the
    /// receiver and heartbeat stop, and the view gets a single
    /// `GracefulDisconnection` update. Safe to call from any task.
    pub fn graceful_disconnection(&self) {
        if !self.inner.online.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Disconnecting from the server");

        *self.inner.match_addr.lock().unwrap() = None;
        *self.inner.pong_tx.lock().unwrap() = None;
        self.inner.pending.lock().unwrap().clear();
        let _ = self.inner.shutdown.send(true);
        let _ = self.inner.view_tx.send(ViewEvent::Update {
            state: GameState::GracefulDisconnection,
            info: None,
        });
    }

    /// Back to the lobby: the match is gone but the connection stays up.
    fn leave_match(&self) {
        *self.inner.match_addr.lock().unwrap() = None;
        *self.inner.pong_tx.lock().unwrap() = None;
    }

    fn match_addr(&self) -> Result<SocketAddr, ClientError> {
        self.inner
            .match_addr
            .lock()
            .unwrap()
            .ok_or(ClientError::Connection)
    }

    async fn endpoint_request(&self, request: Request) -> Result<EndpointAddress, ClientError> {
        match self.request(request, self.inner.lobby_addr).await? {
            Response::Endpoint(endpoint) => Ok(endpoint),
            Response::Error(e) => Err(ClientError::Game(e)),
            _ => Err(ClientError::Connection),
        }
    }

    /// Forwards a request and tears the proxy down on transport failure.
    async fn request(&self, request: Request, addr: SocketAddr) -> Result<Response, ClientError> {
        if !self.is_online() {
            return Err(ClientError::Connection);
        }
        match self.request_once(request, addr).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.graceful_disconnection();
                Err(e)
            }
        }
    }

    /// One request/response exchange without teardown on failure; used by
    /// the startup resolve loop as well.
    async fn request_once(
        &self,
        request: Request,
        addr: SocketAddr,
    ) -> Result<Response, ClientError> {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(seq, tx);

        let packet = Packet::Request { seq, request };
        let result = async {
            let data = serialize(&packet).map_err(|_| ClientError::Connection)?;
            self.inner
                .socket
                .send_to(&data, addr)
                .await
                .map_err(|_| ClientError::Connection)?;
            match timeout(self.inner.timing.request_timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                _ => Err(ClientError::Connection),
            }
        }
        .await;

        if result.is_err() {
            self.inner.pending.lock().unwrap().remove(&seq);
        }
        result
    }

    async fn send_oneway(&self, request: Request, addr: SocketAddr) -> Result<(), ClientError> {
        if !self.is_online() {
            return Err(ClientError::Connection);
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let packet = Packet::Request { seq, request };
        let data = serialize(&packet).map_err(|_| ClientError::Connection)?;
        match self.inner.socket.send_to(&data, addr).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to send: {}", e);
                self.graceful_disconnection();
                Err(ClientError::Connection)
            }
        }
    }

    /// Probes the match until it stops answering: after a send failure or
    /// `MAX_MISSED_PONGS` consecutive unanswered pings the proxy tears
    /// itself down. The task ends quietly when the match is left.
    fn start_heartbeat(&self, addr: SocketAddr) {
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<u64>();
        *self.inner.pong_tx.lock().unwrap() = Some(pong_tx);

        let proxy = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(proxy.inner.timing.heartbeat_interval);
            let mut misses = 0u32;
            loop {
                ticker.tick().await;
                let still_in_match = *proxy.inner.match_addr.lock().unwrap() == Some(addr);
                if !proxy.is_online() || !still_in_match {
                    break;
                }

                let nonce = rand::random::<u64>();
                let ping = match serialize(&Packet::Ping { nonce }) {
                    Ok(data) => data,
                    Err(_) => break,
                };
                if proxy.inner.socket.send_to(&ping, addr).await.is_err() {
                    warn!("Heartbeat send failed");
                    proxy.graceful_disconnection();
                    break;
                }

                let answered = timeout(proxy.inner.timing.heartbeat_timeout, async {
                    while let Some(received) = pong_rx.recv().await {
                        if received == nonce {
                            return true;
                        }
                    }
                    false
                })
                .await
                .unwrap_or(false);

                if answered {
                    misses = 0;
                } else {
                    misses += 1;
                    warn!("Missed pong {}/{}", misses, MAX_MISSED_PONGS);
                    if misses >= MAX_MISSED_PONGS {
                        proxy.graceful_disconnection();
                        break;
                    }
                }
            }
        });
    }

    fn spawn_receiver(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let proxy = self.clone();
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    result = proxy.inner.socket.recv_from(&mut buffer) => {
                        match result {
                            Ok((len, _)) => match deserialize::<Packet>(&buffer[..len]) {
                                Ok(packet) => proxy.handle_packet(packet),
                                Err(_) => warn!("Failed to deserialize datagram"),
                            },
                            Err(e) => {
                                error!("Error receiving packet: {}", e);
                                proxy.graceful_disconnection();
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    fn handle_packet(&self, packet: Packet) {
        match packet {
            Packet::Response { seq, response } => {
                if let Some(tx) = self.inner.pending.lock().unwrap().remove(&seq) {
                    let _ = tx.send(response);
                }
            }
            Packet::Pong { nonce } => {
                if let Some(tx) = self.inner.pong_tx.lock().unwrap().as_ref() {
                    let _ = tx.send(nonce);
                }
            }
            // The server asked us to tear down; the view event comes from
            // the teardown itself
            Packet::Update {
                state: GameState::GracefulDisconnection,
                ..
            } => self.graceful_disconnection(),
            Packet::Update { state, info } => {
                let _ = self.inner.view_tx.send(ViewEvent::Update { state, info });
                match state {
                    // The match ended normally; back to the lobby
                    GameState::GameOver => self.leave_match(),
                    // A dissolved match takes the whole session down
                    GameState::GameAborted => self.graceful_disconnection(),
                    _ => {}
                }
            }
            Packet::ChatMessage { text } => {
                let _ = self.inner.view_tx.send(ViewEvent::Chat { text });
            }
            Packet::Ping { .. } | Packet::Request { .. } => {
                warn!("Unexpected packet type");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn short_timing() -> Timing {
        Timing {
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(30),
            request_timeout: Duration::from_millis(300),
            connect_retry_delay: Duration::from_millis(50),
        }
    }

    /// Scripted lobby/match endpoint: answers resolves, nickname claims
    /// and, when `answer_pings` is set, heartbeat probes.
    async fn fake_server(answer_pings: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let reply = match deserialize::<Packet>(&buf[..len]) {
                    Ok(Packet::Request { seq, request }) => {
                        let response = match request {
                            Request::Resolve { service } => Response::Resolved { service },
                            Request::ChooseNickname { nickname } if nickname == "Taken" => {
                                Response::Error(GameError::ExistentNickname)
                            }
                            Request::ChooseNickname { .. } => Response::NicknameAccepted,
                            _ => Response::Error(GameError::UnknownService),
                        };
                        Some(Packet::Response { seq, response })
                    }
                    Ok(Packet::Ping { nonce }) if answer_pings => Some(Packet::Pong { nonce }),
                    _ => None,
                };
                if let Some(packet) = reply {
                    let _ = socket.send_to(&serialize(&packet).unwrap(), from).await;
                }
            }
        });
        addr
    }

    async fn proxy_for(addr: SocketAddr) -> (ServerProxy, mpsc::UnboundedReceiver<ViewEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let proxy = ServerProxy::connect_with(addr, "LobbyServer", tx, short_timing())
            .await
            .unwrap();
        (proxy, rx)
    }

    fn count_disconnections(rx: &mut mpsc::UnboundedReceiver<ViewEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(
                event,
                ViewEvent::Update {
                    state: GameState::GracefulDisconnection,
                    ..
                }
            ) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_connect_and_claim_nickname() {
        let addr = fake_server(false).await;
        let (proxy, _rx) = proxy_for(addr).await;

        proxy.choose_nickname("Alice").await.unwrap();
        assert!(proxy.is_online());
    }

    #[tokio::test]
    async fn test_refused_request_keeps_connection_up() {
        let addr = fake_server(false).await;
        let (proxy, mut rx) = proxy_for(addr).await;

        assert_eq!(
            proxy.choose_nickname("Taken").await,
            Err(ClientError::Game(GameError::ExistentNickname))
        );
        assert!(proxy.is_online());
        assert_eq!(count_disconnections(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_connect_retries_until_lobby_answers() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        // The lobby stays mute for a while before serving
        tokio::spawn(async move {
            sleep(Duration::from_millis(400)).await;
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                if let Ok(Packet::Request {
                    seq,
                    request: Request::Resolve { service },
                }) = deserialize::<Packet>(&buf[..len])
                {
                    let packet = Packet::Response {
                        seq,
                        response: Response::Resolved { service },
                    };
                    let _ = socket.send_to(&serialize(&packet).unwrap(), from).await;
                }
            }
        });

        let start = Instant::now();
        let (proxy, _rx) = proxy_for(addr).await;
        assert!(proxy.is_online());
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_silent_match_triggers_one_disconnection() {
        let addr = fake_server(false).await;
        let (proxy, mut rx) = proxy_for(addr).await;

        proxy
            .connect_to_match(&EndpointAddress {
                name: "Match1".to_string(),
                port: addr.port(),
            })
            .await
            .unwrap();

        // 3 missed pongs at 50ms intervals, plus slack
        sleep(Duration::from_millis(600)).await;
        assert!(!proxy.is_online());
        assert_eq!(count_disconnections(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_answered_pings_keep_connection_alive() {
        let addr = fake_server(true).await;
        let (proxy, mut rx) = proxy_for(addr).await;

        proxy
            .connect_to_match(&EndpointAddress {
                name: "Match1".to_string(),
                port: addr.port(),
            })
            .await
            .unwrap();

        sleep(Duration::from_millis(600)).await;
        assert!(proxy.is_online());
        assert_eq!(count_disconnections(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_disconnection_is_idempotent() {
        let addr = fake_server(false).await;
        let (proxy, mut rx) = proxy_for(addr).await;

        proxy.graceful_disconnection();
        proxy.graceful_disconnection();

        assert!(!proxy.is_online());
        assert_eq!(count_disconnections(&mut rx), 1);
        assert_eq!(
            proxy.choose_nickname("Alice").await,
            Err(ClientError::Connection)
        );
    }
}
