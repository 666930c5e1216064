//! Per-match endpoint: one UDP socket per active game.
//!
//! A match owns its `GameController` and its roster of connected clients
//! behind a single lock; the lobby only touches a match through the cloneable
//! `MatchServer` handle. Lifecycle feedback (finished, aborted) flows back to
//! the lobby over a channel so the lobby can release nicknames and drop the
//! record.

use crate::controller::GameController;
use crate::lobby::LobbyMessage;
use crate::model::GameModel;
use crate::persistence::SavedMatches;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    EndpointAddress, GameError, GameState, Packet, Position, Request, Response,
    CLIENT_TIMEOUT_SECS, MAX_DATAGRAM_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};

/// Lifecycle of a match endpoint.
///
/// `Forming → Active → Over`, with `Aborted` reachable from the first two
/// when a connected client goes silent. Recovered matches start out
/// `Active` with a partial roster; absent original participants hold
/// reserved seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Forming,
    Active,
    Over,
    Aborted,
}

#[derive(Debug)]
struct Seat {
    nickname: String,
    addr: SocketAddr,
    last_seen: Instant,
}

impl Seat {
    fn new(nickname: &str, addr: SocketAddr) -> Self {
        Self {
            nickname: nickname.to_string(),
            addr,
            last_seen: Instant::now(),
        }
    }
}

struct MatchCore<G: GameModel> {
    phase: MatchPhase,
    capacity: usize,
    controller: Option<GameController<G>>,
    roster: Vec<Seat>,
}

struct MatchInner<G: GameModel> {
    address: EndpointAddress,
    socket: Arc<UdpSocket>,
    core: RwLock<MatchCore<G>>,
    shutdown: watch::Sender<bool>,
    store: SavedMatches,
    lobby_tx: mpsc::UnboundedSender<LobbyMessage>,
    client_timeout: Duration,
}

/// Cloneable handle to a running match endpoint.
pub struct MatchServer<G: GameModel> {
    inner: Arc<MatchInner<G>>,
}

impl<G: GameModel> Clone for MatchServer<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Roster change outcome, resolved into pushes after the core lock drops.
enum JoinEffect {
    Waiting,
    Started(shared::GameInfo),
    Rejoined(shared::GameInfo),
}

impl<G: GameModel> MatchServer<G> {
    /// Binds a fresh, forming match at the given address.
    pub async fn open(
        host: &str,
        address: EndpointAddress,
        capacity: usize,
        store: SavedMatches,
        lobby_tx: mpsc::UnboundedSender<LobbyMessage>,
    ) -> io::Result<Self> {
        Self::bind(
            host,
            address,
            capacity,
            None,
            store,
            lobby_tx,
            Duration::from_secs(CLIENT_TIMEOUT_SECS),
        )
        .await
    }

    /// Binds a match reconstructed from a persisted snapshot. It is active
    /// immediately; its former participants rejoin incrementally.
    pub async fn open_recovered(
        host: &str,
        address: EndpointAddress,
        model: G,
        store: SavedMatches,
        lobby_tx: mpsc::UnboundedSender<LobbyMessage>,
    ) -> io::Result<Self> {
        let capacity = model.players().len();
        Self::bind(
            host,
            address,
            capacity,
            Some(GameController::recovered(model)),
            store,
            lobby_tx,
            Duration::from_secs(CLIENT_TIMEOUT_SECS),
        )
        .await
    }

    async fn bind(
        host: &str,
        mut address: EndpointAddress,
        capacity: usize,
        controller: Option<GameController<G>>,
        store: SavedMatches,
        lobby_tx: mpsc::UnboundedSender<LobbyMessage>,
        client_timeout: Duration,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(format!("{}:{}", host, address.port)).await?);
        if address.port == 0 {
            address.port = socket.local_addr()?.port();
        }

        let phase = if controller.is_some() {
            MatchPhase::Active
        } else {
            MatchPhase::Forming
        };
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            "Match endpoint '{}' bound on port {} ({:?}, capacity {})",
            address.name, address.port, phase, capacity
        );

        let server = Self {
            inner: Arc::new(MatchInner {
                address,
                socket,
                core: RwLock::new(MatchCore {
                    phase,
                    capacity,
                    controller,
                    roster: Vec::new(),
                }),
                shutdown,
                store,
                lobby_tx,
                client_timeout,
            }),
        };
        server.spawn_receiver(shutdown_rx.clone());
        server.spawn_liveness_sweep(shutdown_rx);
        Ok(server)
    }

    pub fn address(&self) -> EndpointAddress {
        self.inner.address.clone()
    }

    /// Seats still free for the first-fit join scan. Active and terminal
    /// matches report zero; recovery rejoins bypass this check entirely.
    pub async fn free_spaces(&self) -> usize {
        let core = self.inner.core.read().await;
        match core.phase {
            MatchPhase::Forming => core.capacity - core.roster.len(),
            _ => 0,
        }
    }

    /// `(connected, capacity)` while the match is still forming.
    pub async fn forming_summary(&self) -> Option<(usize, usize)> {
        let core = self.inner.core.read().await;
        match core.phase {
            MatchPhase::Forming => Some((core.roster.len(), core.capacity)),
            _ => None,
        }
    }

    /// Adds a player to the roster. While forming this fills ordinary
    /// seats and activates the match once capacity is reached; while active
    /// only absent original participants may (re)claim their reserved seat.
    pub async fn add_player(&self, nickname: &str, addr: SocketAddr) -> Result<(), GameError> {
        let effect = {
            let mut core = self.inner.core.write().await;
            match core.phase {
                MatchPhase::Forming => {
                    if core.roster.iter().any(|s| s.nickname == nickname) {
                        return Err(GameError::AlreadyInGame);
                    }
                    if core.roster.len() >= core.capacity {
                        return Err(GameError::LobbyFull);
                    }
                    core.roster.push(Seat::new(nickname, addr));
                    info!(
                        "Match '{}': player '{}' seated ({}/{})",
                        self.inner.address.name,
                        nickname,
                        core.roster.len(),
                        core.capacity
                    );

                    if core.roster.len() == core.capacity {
                        let players: Vec<String> =
                            core.roster.iter().map(|s| s.nickname.clone()).collect();
                        let controller = GameController::<G>::new_match(players);
                        if let Err(e) = self.inner.store.store(controller.model()) {
                            error!(
                                "Match '{}': failed to persist initial snapshot: {}",
                                self.inner.address.name, e
                            );
                        }
                        let info = controller.game_info();
                        core.controller = Some(controller);
                        core.phase = MatchPhase::Active;
                        info!("Match '{}' is now active", self.inner.address.name);
                        JoinEffect::Started(info)
                    } else {
                        JoinEffect::Waiting
                    }
                }
                MatchPhase::Active => {
                    let reserved = core
                        .controller
                        .as_ref()
                        .map(|c| c.players().iter().any(|p| p == nickname))
                        .unwrap_or(false);
                    let already_seated = core.roster.iter().any(|s| s.nickname == nickname);
                    if !reserved || already_seated {
                        return Err(GameError::LobbyFull);
                    }
                    core.roster.push(Seat::new(nickname, addr));
                    info!(
                        "Match '{}': participant '{}' rejoined",
                        self.inner.address.name, nickname
                    );
                    match core.controller.as_ref() {
                        Some(controller) => JoinEffect::Rejoined(controller.game_info()),
                        None => JoinEffect::Waiting,
                    }
                }
                MatchPhase::Over | MatchPhase::Aborted => return Err(GameError::LobbyFull),
            }
        };

        match effect {
            JoinEffect::Waiting => {
                self.broadcast(&Packet::Update {
                    state: GameState::WaitingForPlayers,
                    info: None,
                })
                .await;
            }
            JoinEffect::Started(info) => {
                self.broadcast(&Packet::Update {
                    state: GameState::Turn,
                    info: Some(info),
                })
                .await;
            }
            JoinEffect::Rejoined(info) => {
                // Only the rejoined client needs to catch up
                self.send(
                    &Packet::Update {
                        state: GameState::Turn,
                        info: Some(info),
                    },
                    addr,
                )
                .await;
            }
        }
        Ok(())
    }

    /// Nicknames entitled to a seat: the model's participants once a game
    /// exists, the forming roster before that.
    pub async fn participants(&self) -> Vec<String> {
        let core = self.inner.core.read().await;
        match &core.controller {
            Some(controller) => controller.players().to_vec(),
            None => core.roster.iter().map(|s| s.nickname.clone()).collect(),
        }
    }

    fn spawn_receiver(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let server = self.clone();
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    result = server.inner.socket.recv_from(&mut buffer) => {
                        match result {
                            Ok((len, addr)) => {
                                if let Ok(packet) = deserialize::<Packet>(&buffer[..len]) {
                                    server.handle_packet(packet, addr).await;
                                } else {
                                    warn!(
                                        "Match '{}': failed to deserialize datagram from {}",
                                        server.inner.address.name, addr
                                    );
                                }
                            }
                            Err(e) => {
                                error!(
                                    "Match '{}': error receiving packet: {}",
                                    server.inner.address.name, e
                                );
                                tokio::time::sleep(Duration::from_millis(10)).await;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Match endpoint '{}' unbound", server.inner.address.name);
                        break;
                    }
                }
            }
        });
    }

    fn spawn_liveness_sweep(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if server.sweep().await {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        match packet {
            // Liveness probe, answered before any state locking
            Packet::Ping { nonce } => {
                self.send(&Packet::Pong { nonce }, addr).await;
                self.refresh(addr).await;
            }
            Packet::Request { seq, request } => {
                self.refresh(addr).await;
                match request {
                    Request::Resolve { service } => {
                        let response = if service == self.inner.address.name {
                            Response::Resolved { service }
                        } else {
                            Response::Error(GameError::UnknownService)
                        };
                        self.send(&Packet::Response { seq, response }, addr).await;
                    }
                    Request::MakeMove {
                        positions,
                        column,
                        nickname,
                    } => {
                        let response = match self.apply_move(&positions, column, &nickname).await {
                            Ok(()) => Response::MoveAccepted,
                            Err(e) => Response::Error(e),
                        };
                        self.send(&Packet::Response { seq, response }, addr).await;
                    }
                    // Chat is fire-and-forget, no response
                    Request::MessageAll { text, from } => {
                        self.message_all(&text, &from).await;
                    }
                    Request::MessageSomeone { text, from, to } => {
                        self.message_someone(&text, &from, &to).await;
                    }
                    _ => {
                        warn!(
                            "Match '{}': lobby-level request on match socket from {}",
                            self.inner.address.name, addr
                        );
                    }
                }
            }
            _ => {
                warn!(
                    "Match '{}': unexpected packet type from {}",
                    self.inner.address.name, addr
                );
            }
        }
    }

    /// Applies a move and pushes the resulting state to every connected
    /// client. A finished game broadcasts its final update, purges its
    /// snapshot, notifies the lobby and unbinds the endpoint.
    async fn apply_move(
        &self,
        positions: &[Position],
        column: usize,
        nickname: &str,
    ) -> Result<(), GameError> {
        let (info, players, finished) = {
            let mut core = self.inner.core.write().await;
            if core.phase != MatchPhase::Active {
                return Err(GameError::InvalidMove);
            }
            let result = {
                let controller = match core.controller.as_mut() {
                    Some(controller) => controller,
                    None => return Err(GameError::InvalidMove),
                };
                controller.make_move(positions, column, nickname)?;
                let finished = controller.is_game_over();
                if !finished {
                    if let Err(e) = self.inner.store.store(controller.model()) {
                        error!(
                            "Match '{}': failed to persist snapshot: {}",
                            self.inner.address.name, e
                        );
                    }
                }
                (controller.game_info(), controller.players().to_vec(), finished)
            };
            if result.2 {
                core.phase = MatchPhase::Over;
            }
            result
        };

        if finished {
            info!("Match '{}' is over", self.inner.address.name);
            self.broadcast(&Packet::Update {
                state: GameState::GameOver,
                info: Some(info),
            })
            .await;
            if let Err(e) = self.inner.store.remove(&players) {
                error!(
                    "Match '{}': failed to purge snapshot: {}",
                    self.inner.address.name, e
                );
            }
            self.notify_lobby(LobbyMessage::Finished {
                players,
                address: self.inner.address.clone(),
            });
            let _ = self.inner.shutdown.send(true);
        } else {
            self.broadcast(&Packet::Update {
                state: GameState::Turn,
                info: Some(info),
            })
            .await;
        }
        Ok(())
    }

    /// Chat fan-out to every connected client except the sender.
    async fn message_all(&self, text: &str, from: &str) {
        let recipients: Vec<SocketAddr> = {
            let core = self.inner.core.read().await;
            core.roster
                .iter()
                .filter(|s| s.nickname != from)
                .map(|s| s.addr)
                .collect()
        };
        let packet = Packet::ChatMessage {
            text: format!("{}: {}", from, text),
        };
        for addr in recipients {
            self.send(&packet, addr).await;
        }
    }

    /// Private chat delivery; silently dropped if the recipient is not
    /// currently connected.
    async fn message_someone(&self, text: &str, from: &str, to: &str) {
        let recipient = {
            let core = self.inner.core.read().await;
            core.roster.iter().find(|s| s.nickname == to).map(|s| s.addr)
        };
        if let Some(addr) = recipient {
            let packet = Packet::ChatMessage {
                text: format!("{} (whisper): {}", from, text),
            };
            self.send(&packet, addr).await;
        }
    }

    /// Marks a client alive after any datagram from its address.
    async fn refresh(&self, addr: SocketAddr) {
        let mut core = self.inner.core.write().await;
        if let Some(seat) = core.roster.iter_mut().find(|s| s.addr == addr) {
            seat.last_seen = Instant::now();
        }
    }

    /// Aborts the match if any connected client went silent. The snapshot
    /// stays on disk as the recovery source. Returns true once the match
    /// reached a terminal phase.
    async fn sweep(&self) -> bool {
        let (dead, survivors, players) = {
            let mut core = self.inner.core.write().await;
            if !matches!(core.phase, MatchPhase::Forming | MatchPhase::Active) {
                return true;
            }
            let dead: Vec<String> = core
                .roster
                .iter()
                .filter(|s| s.last_seen.elapsed() > self.inner.client_timeout)
                .map(|s| s.nickname.clone())
                .collect();
            if dead.is_empty() {
                return false;
            }
            core.phase = MatchPhase::Aborted;
            let survivors: Vec<SocketAddr> = core
                .roster
                .iter()
                .filter(|s| !dead.contains(&s.nickname))
                .map(|s| s.addr)
                .collect();
            let players = match &core.controller {
                Some(controller) => controller.players().to_vec(),
                None => core.roster.iter().map(|s| s.nickname.clone()).collect(),
            };
            (dead, survivors, players)
        };

        warn!(
            "Match '{}': lost contact with {:?}, aborting",
            self.inner.address.name, dead
        );
        let packet = Packet::Update {
            state: GameState::GameAborted,
            info: None,
        };
        for addr in survivors {
            self.send(&packet, addr).await;
        }
        self.notify_lobby(LobbyMessage::Aborted {
            players,
            address: self.inner.address.clone(),
        });
        let _ = self.inner.shutdown.send(true);
        true
    }

    /// Push to every connected client; a failed send to one client never
    /// blocks delivery to the others.
    async fn broadcast(&self, packet: &Packet) {
        let recipients: Vec<(String, SocketAddr)> = {
            let core = self.inner.core.read().await;
            core.roster
                .iter()
                .map(|s| (s.nickname.clone(), s.addr))
                .collect()
        };
        for (nickname, addr) in recipients {
            if let Err(e) = Self::send_impl(&self.inner.socket, packet, addr).await {
                error!(
                    "Match '{}': failed to push to '{}' at {}: {}",
                    self.inner.address.name, nickname, addr, e
                );
            }
        }
    }

    async fn send(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = Self::send_impl(&self.inner.socket, packet, addr).await {
            error!(
                "Match '{}': failed to send to {}: {}",
                self.inner.address.name, addr, e
            );
        }
    }

    async fn send_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn notify_lobby(&self, message: LobbyMessage) {
        if self.inner.lobby_tx.send(message).is_err() {
            error!(
                "Match '{}': lobby feedback channel closed",
                self.inner.address.name
            );
        }
    }
}
