//! # Game Client Library
//!
//! This library provides the client side of the networked board game: a
//! proxy that hides the UDP wire from the user interface, and the view
//! seam the proxy pushes server notifications through.
//!
//! ## Architecture Overview
//!
//! The proxy owns one socket for the whole session. Lobby requests
//! (nickname, create, join, recover, listings) and match requests (moves,
//! chat) are forwarded over it and awaited by sequence number, while
//! server pushes arrive on the same socket at any time and are replayed to
//! the view on a dedicated task.
//!
//! Once seated in a match the proxy heartbeats it continuously. A match
//! that stops answering, or any transport failure on a forwarded request,
//! triggers exactly one graceful disconnection: the proxy goes offline,
//! background tasks stop and the view is told once.
//!
//! ## Module Organization
//!
//! - [`network`]: the server proxy, request correlation and the heartbeat
//! - [`view`]: the `View` trait, the event dispatcher and the console view

pub mod network;
pub mod view;
