//! Turn-gated move application on top of a `GameModel`.

use crate::model::GameModel;
use shared::{GameError, GameInfo, Position};

/// Wraps a model and enforces the wrong-player / illegal-move gate before
/// any state mutation. One controller per match, serialized by the match.
#[derive(Debug)]
pub struct GameController<G: GameModel> {
    model: G,
}

impl<G: GameModel> GameController<G> {
    /// Starts a fresh game for the given participants.
    pub fn new_match(players: Vec<String>) -> Self {
        Self {
            model: G::new_match(players),
        }
    }

    /// Resumes play from a recovered snapshot.
    pub fn recovered(model: G) -> Self {
        Self { model }
    }

    /// Applies a move for `nickname`. Fails with `InvalidId` when it is not
    /// that player's turn, `InvalidMove` when the placement is illegal; the
    /// model is untouched on failure.
    pub fn make_move(
        &mut self,
        positions: &[Position],
        column: usize,
        nickname: &str,
    ) -> Result<(), GameError> {
        if self.model.current_player() != Some(nickname) {
            return Err(GameError::InvalidId);
        }
        if !self.model.check_valid_move(positions)
            || !self.model.check_valid_column(column, positions.len())
        {
            return Err(GameError::InvalidMove);
        }

        self.model.make_move(positions, column);
        self.model.next_turn();
        Ok(())
    }

    pub fn players(&self) -> &[String] {
        self.model.players()
    }

    pub fn is_game_over(&self) -> bool {
        self.model.is_game_over()
    }

    pub fn game_info(&self) -> GameInfo {
        self.model.game_info()
    }

    pub fn model(&self) -> &G {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoardModel;

    fn controller() -> GameController<BoardModel> {
        GameController::new_match(vec!["Alice".to_string(), "Bob".to_string()])
    }

    fn pick(row: u8, col: u8) -> Vec<Position> {
        vec![Position { row, col }]
    }

    #[test]
    fn test_wrong_player_rejected() {
        let mut controller = controller();
        let result = controller.make_move(&pick(0, 0), 0, "Bob");
        assert_eq!(result, Err(GameError::InvalidId));
        // State unchanged: Alice still to move
        assert_eq!(controller.game_info().current_player.as_deref(), Some("Alice"));
        assert_eq!(controller.game_info().turn, 0);
    }

    #[test]
    fn test_illegal_move_leaves_state_unchanged() {
        let mut controller = controller();
        let result = controller.make_move(&[], 0, "Alice");
        assert_eq!(result, Err(GameError::InvalidMove));
        assert_eq!(controller.game_info().turn, 0);
        assert_eq!(controller.game_info().current_player.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_invalid_column_rejected() {
        let mut controller = controller();
        let result = controller.make_move(&pick(0, 0), 99, "Alice");
        assert_eq!(result, Err(GameError::InvalidMove));
    }

    #[test]
    fn test_valid_move_advances_turn() {
        let mut controller = controller();
        controller.make_move(&pick(0, 0), 0, "Alice").unwrap();
        assert_eq!(controller.game_info().current_player.as_deref(), Some("Bob"));
        assert_eq!(controller.game_info().turn, 1);

        controller.make_move(&pick(4, 4), 1, "Bob").unwrap();
        assert_eq!(controller.game_info().current_player.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_unknown_nickname_is_invalid_id() {
        let mut controller = controller();
        assert_eq!(
            controller.make_move(&pick(0, 0), 0, "Mallory"),
            Err(GameError::InvalidId)
        );
    }
}
