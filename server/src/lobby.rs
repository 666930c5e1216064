//! Lobby orchestrator: nickname claims, match creation/joining, crash
//! recovery and match lifecycle bookkeeping.
//!
//! Every received datagram is handled on its own task, so all public
//! operations are reentrant. Two locks serialize the critical sections:
//! the registry lock for nickname claims and the matches lock for
//! create/join/recover, so a slow match creation never stalls claims.
//! Lock order is always matches before registry.

use crate::config::LobbyConfig;
use crate::match_server::MatchServer;
use crate::model::GameModel;
use crate::persistence::SavedMatches;
use crate::registry::{BanList, SessionRegistry};
use bincode::deserialize;
use log::{error, info, warn};
use shared::{
    EndpointAddress, GameError, LobbySummary, Packet, Request, Response, MAX_DATAGRAM_SIZE,
    MAX_PLAYERS, MIN_PLAYERS,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Lifecycle feedback from a match endpoint back to the lobby.
#[derive(Debug)]
pub enum LobbyMessage {
    /// The game ended normally; its snapshot is already purged.
    Finished {
        players: Vec<String>,
        address: EndpointAddress,
    },
    /// The match dissolved; its snapshot stays as the recovery source.
    Aborted {
        players: Vec<String>,
        address: EndpointAddress,
    },
}

struct MatchRecord<G: GameModel> {
    server: MatchServer<G>,
}

/// Match bookkeeping guarded by the matches lock: active records in
/// creation order, pending-recovery seats and the endpoint sequence.
struct MatchTable<G: GameModel> {
    records: Vec<MatchRecord<G>>,
    pending: HashMap<String, EndpointAddress>,
    next_seq: u64,
}

/// The lobby server. One per process; owns the session registry and the
/// match table exclusively.
pub struct Lobby<G: GameModel> {
    config: LobbyConfig,
    ban_list: BanList,
    socket: Arc<UdpSocket>,
    registry: Mutex<SessionRegistry>,
    matches: Mutex<MatchTable<G>>,
    store: SavedMatches,
    lobby_tx: mpsc::UnboundedSender<LobbyMessage>,
    feedback_rx: Mutex<Option<mpsc::UnboundedReceiver<LobbyMessage>>>,
}

impl<G: GameModel> Lobby<G> {
    /// Binds the lobby socket and runs startup housekeeping: every
    /// persisted snapshot whose game already ended is deleted before the
    /// lobby accepts its first request.
    pub async fn bind(config: LobbyConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let ban_list = BanList::compile(&config.banned_patterns)?;
        let store = SavedMatches::new(&config.saved_matches_dir)?;

        info!("Cleaning the directory {:?} ...", store.dir());
        let purged = store.purge_finished::<G>()?;
        info!("Cleaning done, {} finished snapshot(s) removed", purged);

        let socket =
            Arc::new(UdpSocket::bind(format!("{}:{}", config.host, config.server_port)).await?);
        info!(
            "Lobby '{}' listening on {}",
            config.service_name,
            socket.local_addr()?
        );

        let (lobby_tx, feedback_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            config,
            ban_list,
            socket,
            registry: Mutex::new(SessionRegistry::new()),
            matches: Mutex::new(MatchTable {
                records: Vec::new(),
                pending: HashMap::new(),
                next_seq: 1,
            }),
            store,
            lobby_tx,
            feedback_rx: Mutex::new(Some(feedback_rx)),
        }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Serves requests until the process ends. Each datagram is dispatched
    /// on its own task; match lifecycle feedback is consumed inline.
    pub async fn serve(self: Arc<Self>) {
        let mut feedback_rx = match self.feedback_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                error!("Lobby::serve called twice");
                return;
            }
        };

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                            Ok(packet) => {
                                let lobby = Arc::clone(&self);
                                tokio::spawn(async move {
                                    lobby.handle_packet(packet, addr).await;
                                });
                            }
                            Err(_) => warn!("Failed to deserialize datagram from {}", addr),
                        },
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
                message = feedback_rx.recv() => {
                    match message {
                        Some(message) => self.handle_feedback(message).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        let Packet::Request { seq, request } = packet else {
            warn!("Unexpected packet type on lobby socket from {}", addr);
            return;
        };

        let response = match request {
            Request::Resolve { service } => {
                if service == self.config.service_name {
                    Response::Resolved { service }
                } else {
                    Response::Error(GameError::UnknownService)
                }
            }
            Request::ChooseNickname { nickname } => match self.choose_nickname(&nickname).await {
                Ok(()) => Response::NicknameAccepted,
                Err(e) => Response::Error(e),
            },
            Request::CreateGame { capacity, nickname } => {
                endpoint_response(self.create_game(capacity, &nickname, addr).await)
            }
            Request::JoinGame { nickname } => {
                endpoint_response(self.join_game(&nickname, addr).await)
            }
            Request::RecoverGame { nickname } => {
                endpoint_response(self.recover_game(&nickname, addr).await)
            }
            Request::GameExists { nickname } => {
                Response::GameExists(self.is_game_existent(&nickname).await)
            }
            Request::GetLobbies { nickname } => match self.get_lobbies(&nickname).await {
                Ok(lobbies) => Response::Lobbies(lobbies),
                Err(e) => Response::Error(e),
            },
            _ => {
                warn!("Match-level request on lobby socket from {}", addr);
                return;
            }
        };

        self.send(&Packet::Response { seq, response }, addr).await;
    }

    /// Claims a nickname for the caller. Exactly one of any number of
    /// concurrent claimers of the same name succeeds.
    pub async fn choose_nickname(&self, nickname: &str) -> Result<(), GameError> {
        let mut registry = self.registry.lock().await;
        registry.claim(&self.ban_list, nickname)
    }

    /// Creates a new match with the caller as its first player and binds
    /// it at a fresh, deterministically named endpoint.
    pub async fn create_game(
        &self,
        capacity: usize,
        nickname: &str,
        client: SocketAddr,
    ) -> Result<EndpointAddress, GameError> {
        let requested = capacity;
        let capacity = capacity.clamp(MIN_PLAYERS, MAX_PLAYERS);
        if capacity != requested {
            warn!(
                "Capacity {} out of range, clamped to {}",
                requested, capacity
            );
        }

        let mut table = self.matches.lock().await;
        self.registry
            .lock()
            .await
            .check_available_for_game(nickname)?;

        let seq = table.next_seq;
        table.next_seq += 1;
        let address = self.endpoint_for(seq);
        let server = MatchServer::open(
            &self.config.host,
            address,
            capacity,
            self.store.clone(),
            self.lobby_tx.clone(),
        )
        .await
        .map_err(|e| {
            error!("Failed to bind match endpoint: {}", e);
            GameError::NoGamesAvailable
        })?;
        let address = server.address();

        server.add_player(nickname, client).await?;
        self.registry.lock().await.mark_in_game(nickname)?;
        table.records.push(MatchRecord { server });

        info!(
            "Game '{}' created by '{}' (capacity {})",
            address.name, nickname, capacity
        );
        Ok(address)
    }

    /// Seats the caller in a match. A pending recovery entry wins over the
    /// first-fit scan and carries a reserved seat, so it skips the
    /// capacity check; otherwise the first match with a free seat, in
    /// creation order, takes the player.
    pub async fn join_game(
        &self,
        nickname: &str,
        client: SocketAddr,
    ) -> Result<EndpointAddress, GameError> {
        let mut table = self.matches.lock().await;
        self.registry
            .lock()
            .await
            .check_available_for_game(nickname)?;

        if let Some(address) = table.pending.remove(nickname) {
            let record = table
                .records
                .iter()
                .find(|r| r.server.address() == address);
            match record {
                Some(record) => match record.server.add_player(nickname, client).await {
                    Ok(()) => {
                        self.registry.lock().await.mark_in_game(nickname)?;
                        info!("Player '{}' reclaimed a seat in '{}'", nickname, address.name);
                        return Ok(address);
                    }
                    Err(e) => warn!(
                        "Pending seat for '{}' in '{}' unusable ({}), falling back",
                        nickname, address.name, e
                    ),
                },
                None => warn!(
                    "Pending recovery for '{}' points at a dissolved match",
                    nickname
                ),
            }
        }

        for record in &table.records {
            if record.server.free_spaces().await == 0 {
                continue;
            }
            let address = record.server.address();
            match record.server.add_player(nickname, client).await {
                Ok(()) => {
                    self.registry.lock().await.mark_in_game(nickname)?;
                    info!("Player '{}' joined '{}'", nickname, address.name);
                    return Ok(address);
                }
                // Raced with a concurrent abort; try the next match
                Err(GameError::LobbyFull) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(GameError::NoGamesAvailable)
    }

    /// Reconstructs the caller's interrupted match from its snapshot,
    /// binds it at a fresh endpoint and reserves a seat for every other
    /// former participant.
    pub async fn recover_game(
        &self,
        nickname: &str,
        client: SocketAddr,
    ) -> Result<EndpointAddress, GameError> {
        let mut table = self.matches.lock().await;
        self.registry
            .lock()
            .await
            .check_available_for_game(nickname)?;

        let file_name = self
            .store
            .find_for(nickname)
            .map_err(|e| {
                error!("Failed to scan saved matches: {}", e);
                GameError::NonExistentNickname
            })?
            .ok_or(GameError::NonExistentNickname)?;
        let model: G = self.store.load(&file_name).map_err(|e| {
            error!("Failed to load snapshot {}: {}", file_name, e);
            GameError::NonExistentNickname
        })?;

        let seq = table.next_seq;
        table.next_seq += 1;
        let address = self.endpoint_for(seq);
        let server = MatchServer::open_recovered(
            &self.config.host,
            address,
            model,
            self.store.clone(),
            self.lobby_tx.clone(),
        )
        .await
        .map_err(|e| {
            error!("Failed to bind recovered match endpoint: {}", e);
            GameError::NoGamesAvailable
        })?;
        let address = server.address();

        server.add_player(nickname, client).await?;
        self.registry.lock().await.mark_in_game(nickname)?;

        for participant in SavedMatches::participants(&file_name) {
            if participant != nickname {
                table.pending.insert(participant, address.clone());
            }
        }
        table.records.push(MatchRecord { server });

        info!(
            "Game '{}' recovered by '{}' from {}",
            address.name, nickname, file_name
        );
        Ok(address)
    }

    /// True iff a persisted snapshot's participant set contains the
    /// nickname.
    pub async fn is_game_existent(&self, nickname: &str) -> bool {
        match self.store.find_for(nickname) {
            Ok(found) => found.is_some(),
            Err(e) => {
                error!("Failed to scan saved matches: {}", e);
                false
            }
        }
    }

    /// Matches still forming, in creation order.
    pub async fn get_lobbies(&self, nickname: &str) -> Result<Vec<LobbySummary>, GameError> {
        if self.registry.lock().await.state_of(nickname).is_none() {
            return Err(GameError::NonExistentNickname);
        }

        let table = self.matches.lock().await;
        let mut lobbies = Vec::new();
        for record in &table.records {
            if let Some((connected, capacity)) = record.server.forming_summary().await {
                lobbies.push(LobbySummary {
                    name: record.server.address().name,
                    connected,
                    capacity,
                });
            }
        }

        if lobbies.is_empty() {
            return Err(GameError::NoGamesAvailable);
        }
        Ok(lobbies)
    }

    /// Pending-recovery seat reserved for a nickname, if any.
    pub async fn pending_recovery_for(&self, nickname: &str) -> Option<EndpointAddress> {
        self.matches.lock().await.pending.get(nickname).cloned()
    }

    pub async fn active_match_count(&self) -> usize {
        self.matches.lock().await.records.len()
    }

    pub fn store(&self) -> &SavedMatches {
        &self.store
    }

    /// Deterministic endpoint naming: base name plus sequence number, base
    /// port plus `2*seq - 1`. A base port of 0 delegates port allocation
    /// to the OS instead.
    fn endpoint_for(&self, seq: u64) -> EndpointAddress {
        let port = if self.config.match_base_port == 0 {
            0
        } else {
            self.config
                .match_base_port
                .saturating_add((2 * seq - 1) as u16)
        };
        EndpointAddress {
            name: format!("{}{}", self.config.match_base_name, seq),
            port,
        }
    }

    /// Releases the participants of a finished or aborted match and drops
    /// its record and any pending seats pointing at it.
    async fn handle_feedback(&self, message: LobbyMessage) {
        let (players, address, reason) = match message {
            LobbyMessage::Finished { players, address } => (players, address, "finished"),
            LobbyMessage::Aborted { players, address } => (players, address, "aborted"),
        };
        info!(
            "Match '{}' {}, releasing players {:?}",
            address.name, reason, players
        );

        {
            let mut table = self.matches.lock().await;
            table.records.retain(|r| r.server.address() != address);
            table.pending.retain(|_, a| *a != address);
        }
        self.registry.lock().await.release(&players);
    }

    async fn send(&self, packet: &Packet, addr: SocketAddr) {
        match bincode::serialize(packet) {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    error!("Failed to send response to {}: {}", addr, e);
                }
            }
            Err(e) => error!("Failed to serialize response: {}", e),
        }
    }
}

fn endpoint_response(result: Result<EndpointAddress, GameError>) -> Response {
    match result {
        Ok(address) => Response::Endpoint(address),
        Err(e) => Response::Error(e),
    }
}
