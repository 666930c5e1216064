//! Session registry: which nicknames exist and whether they are in a game.
//!
//! The registry is owned by the lobby and only ever mutated behind its
//! nickname lock, so a plain map is enough; claim atomicity comes from the
//! lock, not from this type.

use log::info;
use regex::Regex;
use shared::{GameError, NAME_SEPARATOR};
use std::collections::HashMap;

/// Liveness state of a claimed nickname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The nickname exists but its owner is not playing.
    Claimed,
    /// The nickname is seated in exactly one match.
    InGame,
}

/// Compiled nickname ban list. Patterns match the whole nickname.
#[derive(Debug, Default)]
pub struct BanList {
    patterns: Vec<Regex>,
}

impl BanList {
    /// Compiles the given patterns, anchoring each one so that a pattern
    /// must cover the entire nickname to ban it.
    pub fn compile(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_banned(&self, nickname: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(nickname))
    }
}

/// Map from nickname to its session state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: HashMap<String, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a nickname. Exactly one of any number of concurrent callers
    /// succeeds for a given name; the caller must hold the registry lock.
    ///
    /// The separator character is reserved for snapshot file names, so
    /// nicknames containing it are structurally illegal.
    pub fn claim(&mut self, ban_list: &BanList, nickname: &str) -> Result<(), GameError> {
        if nickname.is_empty() || nickname.contains(NAME_SEPARATOR) {
            return Err(GameError::IllegalNickname);
        }
        if ban_list.is_banned(nickname) {
            return Err(GameError::IllegalNickname);
        }
        if self.entries.contains_key(nickname) {
            return Err(GameError::ExistentNickname);
        }

        self.entries
            .insert(nickname.to_string(), SessionState::Claimed);
        info!("Nickname '{}' claimed", nickname);
        Ok(())
    }

    /// Precondition gate for create/join/recover: the nickname must be
    /// claimed and not currently seated in a match.
    pub fn check_available_for_game(&self, nickname: &str) -> Result<(), GameError> {
        match self.entries.get(nickname) {
            None => Err(GameError::NonExistentNickname),
            Some(SessionState::InGame) => Err(GameError::AlreadyInGame),
            Some(SessionState::Claimed) => Ok(()),
        }
    }

    /// Marks a claimed nickname as seated in a match.
    pub fn mark_in_game(&mut self, nickname: &str) -> Result<(), GameError> {
        match self.entries.get_mut(nickname) {
            None => Err(GameError::NonExistentNickname),
            Some(state) => {
                *state = SessionState::InGame;
                Ok(())
            }
        }
    }

    /// Returns the given nicknames to the claimed state once their match
    /// finished or dissolved, so they can enter another game.
    pub fn release(&mut self, nicknames: &[String]) {
        for nickname in nicknames {
            if let Some(state) = self.entries.get_mut(nickname) {
                *state = SessionState::Claimed;
            }
        }
    }

    pub fn state_of(&self, nickname: &str) -> Option<SessionState> {
        self.entries.get(nickname).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban_list(patterns: &[&str]) -> BanList {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        BanList::compile(&patterns).unwrap()
    }

    #[test]
    fn test_claim_succeeds_once() {
        let mut registry = SessionRegistry::new();
        let ban = ban_list(&[]);

        assert!(registry.claim(&ban, "Alice").is_ok());
        assert_eq!(
            registry.claim(&ban, "Alice"),
            Err(GameError::ExistentNickname)
        );
        assert_eq!(registry.state_of("Alice"), Some(SessionState::Claimed));
    }

    #[test]
    fn test_banned_nickname_rejected_and_not_registered() {
        let mut registry = SessionRegistry::new();
        let ban = ban_list(&["admin", "server.*"]);

        assert_eq!(
            registry.claim(&ban, "admin"),
            Err(GameError::IllegalNickname)
        );
        assert_eq!(
            registry.claim(&ban, "server42"),
            Err(GameError::IllegalNickname)
        );
        assert_eq!(registry.state_of("admin"), None);
    }

    #[test]
    fn test_ban_patterns_are_anchored() {
        let mut registry = SessionRegistry::new();
        let ban = ban_list(&["admin"]);

        // "admin" only bans the exact word, not names containing it
        assert!(registry.claim(&ban, "administrator").is_ok());
    }

    #[test]
    fn test_structurally_invalid_nicknames() {
        let mut registry = SessionRegistry::new();
        let ban = ban_list(&[]);

        assert_eq!(registry.claim(&ban, ""), Err(GameError::IllegalNickname));
        assert_eq!(
            registry.claim(&ban, "al_ice"),
            Err(GameError::IllegalNickname)
        );
    }

    #[test]
    fn test_game_availability_gate() {
        let mut registry = SessionRegistry::new();
        let ban = ban_list(&[]);

        assert_eq!(
            registry.check_available_for_game("Ghost"),
            Err(GameError::NonExistentNickname)
        );

        registry.claim(&ban, "Alice").unwrap();
        assert!(registry.check_available_for_game("Alice").is_ok());

        registry.mark_in_game("Alice").unwrap();
        assert_eq!(
            registry.check_available_for_game("Alice"),
            Err(GameError::AlreadyInGame)
        );
    }

    #[test]
    fn test_mark_unknown_nickname_fails() {
        let mut registry = SessionRegistry::new();
        assert_eq!(
            registry.mark_in_game("Ghost"),
            Err(GameError::NonExistentNickname)
        );
    }

    #[test]
    fn test_release_returns_players_to_claimed() {
        let mut registry = SessionRegistry::new();
        let ban = ban_list(&[]);

        registry.claim(&ban, "Alice").unwrap();
        registry.claim(&ban, "Bob").unwrap();
        registry.mark_in_game("Alice").unwrap();
        registry.mark_in_game("Bob").unwrap();

        registry.release(&["Alice".to_string(), "Bob".to_string(), "Ghost".to_string()]);

        assert!(registry.check_available_for_game("Alice").is_ok());
        assert!(registry.check_available_for_game("Bob").is_ok());
    }
}
