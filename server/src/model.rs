//! The `GameModel` capability consumed by the orchestration layer, plus the
//! bundled baseline board model.
//!
//! The orchestration core never inspects rules internals: everything it
//! needs from a game is expressed by the trait below, and recovered games
//! are reconstructed purely through serde.

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::{GameInfo, Position};

/// Square board side length.
pub const BOARD_SIZE: usize = 9;
/// Rows of a player shelf (capacity of each shelf column).
pub const SHELF_ROWS: usize = 6;
/// Columns of a player shelf.
pub const SHELF_COLS: usize = 5;
/// Maximum number of tiles picked in one move.
pub const MAX_PICK: usize = 3;
/// Distinct tile kinds on the board.
pub const TILE_KINDS: u8 = 6;

/// Capability surface of a board game consumed by match endpoints.
///
/// Serde bounds exist because snapshots are persisted as opaque blobs and
/// recovered matches are rebuilt from them without any rules knowledge.
pub trait GameModel: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// Builds a fresh game for the given participants, first player first.
    fn new_match(players: Vec<String>) -> Self;

    /// Participant nicknames in seating order.
    fn players(&self) -> &[String];

    /// Nickname expected to move next, `None` once the game is over.
    fn current_player(&self) -> Option<&str>;

    /// Structural validation of a pick, without applying it.
    fn check_valid_move(&self, positions: &[Position]) -> bool;

    /// Whether `picked` tiles fit into the given shelf column.
    fn check_valid_column(&self, column: usize, picked: usize) -> bool;

    /// Applies a previously validated move for the current player.
    fn make_move(&mut self, positions: &[Position], column: usize);

    /// Advances to the next player, unless the game ended.
    fn next_turn(&mut self);

    fn is_game_over(&self) -> bool;

    /// Public snapshot pushed to clients with every update.
    fn game_info(&self) -> GameInfo;
}

/// Baseline tile-placement model: a shared board of tiles and one shelf per
/// player, filled bottom-up one column at a time. The game ends when a
/// player completes their shelf or the board runs out of tiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardModel {
    players: Vec<String>,
    current: usize,
    turn: u32,
    board: Vec<Vec<Option<u8>>>,
    /// One shelf per player, each a stack of tiles per column.
    shelves: Vec<Vec<Vec<u8>>>,
    game_over: bool,
}

impl BoardModel {
    fn in_bounds(position: &Position) -> bool {
        (position.row as usize) < BOARD_SIZE && (position.col as usize) < BOARD_SIZE
    }

    fn tile_at(&self, position: &Position) -> Option<u8> {
        self.board[position.row as usize][position.col as usize]
    }

    /// Picked positions must form a contiguous line on one row or column.
    fn aligned(positions: &[Position]) -> bool {
        if positions.len() == 1 {
            return true;
        }

        let same_row = positions.iter().all(|p| p.row == positions[0].row);
        let same_col = positions.iter().all(|p| p.col == positions[0].col);
        if !same_row && !same_col {
            return false;
        }

        let mut coords: Vec<u8> = positions
            .iter()
            .map(|p| if same_row { p.col } else { p.row })
            .collect();
        coords.sort_unstable();
        coords.windows(2).all(|w| w[1] == w[0] + 1)
    }

    fn shelf_full(shelf: &[Vec<u8>]) -> bool {
        shelf.iter().all(|column| column.len() == SHELF_ROWS)
    }

    fn board_empty(&self) -> bool {
        self.board
            .iter()
            .all(|row| row.iter().all(|cell| cell.is_none()))
    }
}

impl GameModel for BoardModel {
    fn new_match(players: Vec<String>) -> Self {
        let mut rng = rand::thread_rng();
        let board = (0..BOARD_SIZE)
            .map(|_| {
                (0..BOARD_SIZE)
                    .map(|_| Some(rng.gen_range(0..TILE_KINDS)))
                    .collect()
            })
            .collect();
        let shelves = vec![vec![Vec::new(); SHELF_COLS]; players.len()];

        Self {
            players,
            current: 0,
            turn: 0,
            board,
            shelves,
            game_over: false,
        }
    }

    fn players(&self) -> &[String] {
        &self.players
    }

    fn current_player(&self) -> Option<&str> {
        if self.game_over {
            None
        } else {
            self.players.get(self.current).map(String::as_str)
        }
    }

    fn check_valid_move(&self, positions: &[Position]) -> bool {
        if positions.is_empty() || positions.len() > MAX_PICK {
            return false;
        }
        if positions
            .iter()
            .any(|p| !Self::in_bounds(p) || self.tile_at(p).is_none())
        {
            return false;
        }
        // No picking the same cell twice
        for (i, a) in positions.iter().enumerate() {
            if positions[i + 1..].contains(a) {
                return false;
            }
        }
        Self::aligned(positions)
    }

    fn check_valid_column(&self, column: usize, picked: usize) -> bool {
        column < SHELF_COLS
            && self.shelves[self.current][column].len() + picked <= SHELF_ROWS
    }

    fn make_move(&mut self, positions: &[Position], column: usize) {
        for position in positions {
            if let Some(tile) = self.board[position.row as usize][position.col as usize].take() {
                self.shelves[self.current][column].push(tile);
            }
        }

        if Self::shelf_full(&self.shelves[self.current]) || self.board_empty() {
            self.game_over = true;
        }
    }

    fn next_turn(&mut self) {
        if !self.game_over {
            self.current = (self.current + 1) % self.players.len();
            self.turn += 1;
        }
    }

    fn is_game_over(&self) -> bool {
        self.game_over
    }

    fn game_info(&self) -> GameInfo {
        GameInfo {
            players: self.players.clone(),
            current_player: self.current_player().map(str::to_string),
            turn: self.turn,
            game_over: self.game_over,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> BoardModel {
        BoardModel::new_match(vec!["Alice".to_string(), "Bob".to_string()])
    }

    fn pos(row: u8, col: u8) -> Position {
        Position { row, col }
    }

    #[test]
    fn test_new_match_starts_with_first_player() {
        let model = model();
        assert_eq!(model.current_player(), Some("Alice"));
        assert_eq!(model.players(), &["Alice".to_string(), "Bob".to_string()]);
        assert!(!model.is_game_over());
    }

    #[test]
    fn test_valid_single_and_line_picks() {
        let model = model();
        assert!(model.check_valid_move(&[pos(0, 0)]));
        assert!(model.check_valid_move(&[pos(3, 2), pos(3, 3), pos(3, 4)]));
        assert!(model.check_valid_move(&[pos(5, 1), pos(4, 1)]));
    }

    #[test]
    fn test_invalid_picks_rejected() {
        let model = model();
        // empty, too many, out of bounds
        assert!(!model.check_valid_move(&[]));
        assert!(!model.check_valid_move(&[pos(0, 0), pos(0, 1), pos(0, 2), pos(0, 3)]));
        assert!(!model.check_valid_move(&[pos(0, BOARD_SIZE as u8)]));
        // duplicate cell
        assert!(!model.check_valid_move(&[pos(1, 1), pos(1, 1)]));
        // diagonal and gapped lines
        assert!(!model.check_valid_move(&[pos(1, 1), pos(2, 2)]));
        assert!(!model.check_valid_move(&[pos(3, 1), pos(3, 3)]));
    }

    #[test]
    fn test_emptied_cell_cannot_be_picked_again() {
        let mut model = model();
        model.make_move(&[pos(0, 0)], 0);
        assert!(!model.check_valid_move(&[pos(0, 0)]));
    }

    #[test]
    fn test_column_capacity() {
        let mut model = model();
        assert!(model.check_valid_column(0, 3));
        assert!(!model.check_valid_column(SHELF_COLS, 1));

        model.shelves[0][2] = vec![0; SHELF_ROWS - 1];
        assert!(model.check_valid_column(2, 1));
        assert!(!model.check_valid_column(2, 2));
    }

    #[test]
    fn test_turn_rotation() {
        let mut model = model();
        assert_eq!(model.current_player(), Some("Alice"));
        model.next_turn();
        assert_eq!(model.current_player(), Some("Bob"));
        model.next_turn();
        assert_eq!(model.current_player(), Some("Alice"));
        assert_eq!(model.game_info().turn, 2);
    }

    #[test]
    fn test_game_over_on_full_shelf() {
        let mut model = model();
        for column in model.shelves[0].iter_mut() {
            *column = vec![0; SHELF_ROWS];
        }
        model.shelves[0][4].pop();

        model.make_move(&[pos(0, 0)], 4);
        assert!(model.is_game_over());
        assert_eq!(model.current_player(), None);

        let turn_before = model.game_info().turn;
        model.next_turn();
        assert_eq!(model.game_info().turn, turn_before);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_state() {
        let mut model = model();
        model.make_move(&[pos(2, 2)], 1);
        model.next_turn();

        let blob = serde_json::to_string(&model).unwrap();
        let recovered: BoardModel = serde_json::from_str(&blob).unwrap();

        assert_eq!(recovered.current_player(), Some("Bob"));
        assert_eq!(recovered.shelves[0][1].len(), 1);
        assert!(recovered.board[2][2].is_none());
    }

    #[test]
    fn test_game_info_snapshot() {
        let model = model();
        let info = model.game_info();
        assert_eq!(info.players.len(), 2);
        assert_eq!(info.current_player.as_deref(), Some("Alice"));
        assert_eq!(info.turn, 0);
        assert!(!info.game_over);
    }
}
