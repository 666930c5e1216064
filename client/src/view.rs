//! Client-side presentation seam.
//!
//! The network proxy never calls a view directly: pushes are queued as
//! `ViewEvent`s and replayed on a dedicated task, so a slow or blocking
//! view can never stall the transport.

use log::info;
use shared::{GameInfo, GameState};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What a user interface must be able to display.
pub trait View: Send + Sync + 'static {
    /// A state push from the match or the proxy itself.
    fn update(&self, state: GameState, info: Option<GameInfo>);

    /// An incoming chat line, already formatted by the sender's match.
    fn display_chat_message(&self, text: &str);
}

/// Push notification queued for the view task.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Update {
        state: GameState,
        info: Option<GameInfo>,
    },
    Chat {
        text: String,
    },
}

/// Spawns the view task and returns the sender the proxy pushes into.
/// The task ends when the last sender is dropped.
pub fn spawn_dispatcher(view: Arc<dyn View>) -> mpsc::UnboundedSender<ViewEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ViewEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ViewEvent::Update { state, info } => view.update(state, info),
                ViewEvent::Chat { text } => view.display_chat_message(&text),
            }
        }
    });
    tx
}

/// Line-oriented view for the terminal client.
pub struct ConsoleView;

impl View for ConsoleView {
    fn update(&self, state: GameState, info: Option<GameInfo>) {
        match state {
            GameState::WaitingForPlayers => println!("Waiting for more players..."),
            GameState::Turn => {
                if let Some(info) = info {
                    match info.current_player {
                        Some(player) => {
                            println!("Turn {}: it is {}'s turn", info.turn, player)
                        }
                        None => println!("Turn {}", info.turn),
                    }
                }
            }
            GameState::GameOver => println!("Game over!"),
            GameState::GameAborted => println!("The game was aborted: a player disconnected"),
            GameState::GracefulDisconnection => {
                println!("Disconnected from the server");
                info!("Connection torn down");
            }
        }
    }

    fn display_chat_message(&self, text: &str) {
        println!("[chat] {}", text);
    }
}
