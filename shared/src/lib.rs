//! Wire protocol and domain types shared between the lobby server,
//! the per-match endpoints and the client proxy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interval between two heartbeat probes sent by a connected client.
pub const HEARTBEAT_INTERVAL_MS: u64 = 2000;
/// How long a client waits for the matching pong before counting a miss.
pub const HEARTBEAT_TIMEOUT_MS: u64 = 500;
/// Consecutive missed pongs after which a client tears itself down.
pub const MAX_MISSED_PONGS: u32 = 3;
/// Delay between two attempts to resolve the lobby at startup.
pub const CONNECT_RETRY_DELAY_MS: u64 = 5000;
/// How long a client waits for the response to a forwarded request.
pub const REQUEST_TIMEOUT_MS: u64 = 2000;
/// Seconds of datagram silence after which a match considers a client dead.
pub const CLIENT_TIMEOUT_SECS: u64 = 10;
/// Upper bound for a single serialized datagram.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Separator used to join participant nicknames into a snapshot file name.
pub const NAME_SEPARATOR: &str = "_";
/// Extension of persisted match snapshots.
pub const SAVE_EXTENSION: &str = ".json";

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

/// Failure kinds crossing the wire. Every fallible lobby or match operation
/// reports one of these; transport failures are represented client-side only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum GameError {
    #[error("nickname matches a banned pattern or is malformed")]
    IllegalNickname,
    #[error("nickname already claimed by another player")]
    ExistentNickname,
    #[error("nickname was never claimed on this server")]
    NonExistentNickname,
    #[error("player is already part of an active game")]
    AlreadyInGame,
    #[error("no game with a free seat is available")]
    NoGamesAvailable,
    #[error("the game roster is already full")]
    LobbyFull,
    #[error("it is not this player's turn")]
    InvalidId,
    #[error("the move violates the placement rules")]
    InvalidMove,
    #[error("no service with that name is bound here")]
    UnknownService,
}

/// A board coordinate referenced by a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub row: u8,
    pub col: u8,
}

/// State tag carried by every push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    /// The match is still forming, seats are free.
    WaitingForPlayers,
    /// A move was applied, play continues.
    Turn,
    /// The model reported game over; this is the final update.
    GameOver,
    /// The match dissolved because a participant dropped.
    GameAborted,
    /// Server-initiated request for the client to tear itself down.
    GracefulDisconnection,
}

/// Snapshot of the public match state pushed alongside every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub players: Vec<String>,
    pub current_player: Option<String>,
    pub turn: u32,
    pub game_over: bool,
}

/// Wire-visible address of a bound endpoint: a discovery name plus the UDP
/// port it listens on. The host is implied by the lobby the client resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub name: String,
    pub port: u16,
}

/// One row of the forming-games listing returned by `GetLobbies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub name: String,
    pub connected: usize,
    pub capacity: usize,
}

/// Client-to-server request bodies. The datagram source address doubles as
/// the client handle: pushes go back to wherever the request came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Service-discovery probe: "is `service` bound at this socket?"
    Resolve { service: String },

    // Lobby operations
    ChooseNickname { nickname: String },
    CreateGame { capacity: usize, nickname: String },
    JoinGame { nickname: String },
    RecoverGame { nickname: String },
    GameExists { nickname: String },
    GetLobbies { nickname: String },

    // Match operations
    MakeMove {
        positions: Vec<Position>,
        column: usize,
        nickname: String,
    },
    MessageAll { text: String, from: String },
    MessageSomeone {
        text: String,
        from: String,
        to: String,
    },
}

/// Server-to-client response bodies, matched to requests by sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Resolved { service: String },
    NicknameAccepted,
    Endpoint(EndpointAddress),
    GameExists(bool),
    Lobbies(Vec<LobbySummary>),
    MoveAccepted,
    Error(GameError),
}

/// Every datagram on the wire is exactly one bincode-encoded `Packet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    Request { seq: u64, request: Request },
    Response { seq: u64, response: Response },
    Ping { nonce: u64 },
    Pong { nonce: u64 },

    // Pushes, never acknowledged
    Update { state: GameState, info: Option<GameInfo> },
    ChatMessage { text: String },
}
