//! # Lobby Server Library
//!
//! This library provides the server side of the networked board game: a
//! lobby that owns nicknames and match placement, plus one dynamically
//! bound UDP endpoint per running match.
//!
//! ## Core Responsibilities
//!
//! ### Session Orchestration
//! The lobby is the single authority over which nicknames exist and where
//! each player is seated. Claims, joins and recoveries are serialized so
//! that concurrent clients can never end up sharing a nickname or a seat.
//!
//! ### Match Hosting
//! Every created game gets its own socket, named and numbered
//! deterministically from the server configuration. The lobby hands the
//! endpoint address to clients; from then on all gameplay traffic flows
//! directly between the clients and their match.
//!
//! ### Crash Recovery
//! Ongoing matches are snapshotted to disk after every move. When a match
//! dissolves because a client dropped, the snapshot stays behind and any
//! former participant can ask the lobby to rebuild the match from it.
//!
//! ## Module Organization
//!
//! - [`config`]: server configuration file and ban-list loading
//! - [`registry`]: nickname claims and per-player session state
//! - [`model`]: the `GameModel` capability and the bundled board game
//! - [`controller`]: turn gating on top of a model
//! - [`persistence`]: snapshot files for interrupted matches
//! - [`match_server`]: the per-match UDP endpoint
//! - [`lobby`]: the lobby socket tying all of the above together

pub mod config;
pub mod controller;
pub mod lobby;
pub mod match_server;
pub mod model;
pub mod persistence;
pub mod registry;
