//! Snapshot store for interrupted matches.
//!
//! One JSON file per match, named by the participant nicknames joined with
//! the reserved separator ("Alice_Bob_Carol.json"); contents are the
//! serialized `GameModel`, treated as an opaque blob by everything but the
//! model itself.

use crate::model::GameModel;
use log::warn;
use shared::{NAME_SEPARATOR, SAVE_EXTENSION};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Directory-backed store of persisted match snapshots.
#[derive(Debug, Clone)]
pub struct SavedMatches {
    dir: PathBuf,
}

impl SavedMatches {
    /// Opens the store, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Snapshot file name for a participant set, in seating order.
    pub fn file_name(players: &[String]) -> String {
        format!("{}{}", players.join(NAME_SEPARATOR), SAVE_EXTENSION)
    }

    /// Participant nicknames embedded in a snapshot file name.
    pub fn participants(file_name: &str) -> Vec<String> {
        let stem = file_name.strip_suffix(SAVE_EXTENSION).unwrap_or(file_name);
        stem.split(NAME_SEPARATOR).map(str::to_string).collect()
    }

    fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Writes the snapshot for a match, overwriting any previous one.
    pub fn store<G: GameModel>(&self, model: &G) -> io::Result<()> {
        let path = self.path_for(&Self::file_name(model.players()));
        let file = File::create(path)?;
        serde_json::to_writer(file, model)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Reads a snapshot back by file name.
    pub fn load<G: GameModel>(&self, file_name: &str) -> io::Result<G> {
        let file = File::open(self.path_for(file_name))?;
        serde_json::from_reader(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Deletes the snapshot for a participant set, if present.
    pub fn remove(&self, players: &[String]) -> io::Result<()> {
        let path = self.path_for(&Self::file_name(players));
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Finds the snapshot whose participant set contains `nickname`,
    /// matching whole name segments only.
    pub fn find_for(&self, nickname: &str) -> io::Result<Option<String>> {
        for file_name in self.list()? {
            if Self::participants(&file_name).iter().any(|p| p == nickname) {
                return Ok(Some(file_name));
            }
        }
        Ok(None)
    }

    /// Snapshot file names currently in the store.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(SAVE_EXTENSION) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Startup housekeeping: deletes every snapshot whose game already
    /// ended. Unreadable snapshots are kept and logged. Returns the number
    /// of files deleted.
    pub fn purge_finished<G: GameModel>(&self) -> io::Result<usize> {
        let mut purged = 0;
        for file_name in self.list()? {
            match self.load::<G>(&file_name) {
                Ok(model) if model.is_game_over() => {
                    fs::remove_file(self.path_for(&file_name))?;
                    purged += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", file_name, e),
            }
        }
        Ok(purged)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoardModel, GameModel};
    use shared::Position;

    fn store() -> (tempfile::TempDir, SavedMatches) {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedMatches::new(dir.path()).unwrap();
        (dir, store)
    }

    fn players(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_file_name_layout() {
        assert_eq!(
            SavedMatches::file_name(&players(&["Alice", "Bob", "Carol"])),
            "Alice_Bob_Carol.json"
        );
        assert_eq!(
            SavedMatches::participants("Alice_Bob_Carol.json"),
            players(&["Alice", "Bob", "Carol"])
        );
    }

    #[test]
    fn test_store_load_roundtrip() {
        let (_dir, store) = store();
        let model = BoardModel::new_match(players(&["Alice", "Bob"]));
        store.store(&model).unwrap();

        let loaded: BoardModel = store.load("Alice_Bob.json").unwrap();
        assert_eq!(loaded.players(), model.players());
        assert_eq!(loaded.current_player(), Some("Alice"));
    }

    #[test]
    fn test_find_for_matches_whole_segments() {
        let (_dir, store) = store();
        store
            .store(&BoardModel::new_match(players(&["Alice", "Bob"])))
            .unwrap();

        assert_eq!(
            store.find_for("Alice").unwrap(),
            Some("Alice_Bob.json".to_string())
        );
        assert_eq!(
            store.find_for("Bob").unwrap(),
            Some("Alice_Bob.json".to_string())
        );
        // "Al" is a prefix of a participant, not a participant
        assert_eq!(store.find_for("Al").unwrap(), None);
        assert_eq!(store.find_for("Carol").unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, store) = store();
        let model = BoardModel::new_match(players(&["Alice", "Bob"]));
        store.store(&model).unwrap();

        store.remove(model.players()).unwrap();
        assert_eq!(store.find_for("Alice").unwrap(), None);
        // Removing again is a no-op
        store.remove(model.players()).unwrap();
    }

    #[test]
    fn test_purge_finished_keeps_ongoing_games() {
        let (_dir, store) = store();

        let ongoing = BoardModel::new_match(players(&["Alice", "Bob"]));
        store.store(&ongoing).unwrap();

        let mut finished = BoardModel::new_match(players(&["Carol", "Dave"]));
        force_game_over(&mut finished);
        store.store(&finished).unwrap();

        let purged = store.purge_finished::<BoardModel>().unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.list().unwrap(), vec!["Alice_Bob.json".to_string()]);
    }

    #[test]
    fn test_purge_skips_unreadable_snapshots() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("broken_blob.json"), b"not json").unwrap();

        let purged = store.purge_finished::<BoardModel>().unwrap();
        assert_eq!(purged, 0);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    fn force_game_over(model: &mut BoardModel) {
        // Fill the current player's shelf column by column through moves
        loop {
            let mut moved = false;
            'outer: for row in 0..9u8 {
                for col in 0..9u8 {
                    let pick = [Position { row, col }];
                    for column in 0..5 {
                        if model.check_valid_move(&pick) && model.check_valid_column(column, 1) {
                            model.make_move(&pick, column);
                            moved = true;
                            break 'outer;
                        }
                    }
                }
            }
            if model.is_game_over() {
                return;
            }
            assert!(moved, "Could not drive the model to game over");
        }
    }
}
