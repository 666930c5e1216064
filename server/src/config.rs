//! Lobby server configuration, loadable from a JSON file with CLI overrides.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Setup information for the lobby server and the matches it creates.
///
/// Match endpoints are addressed deterministically from this config:
/// the n-th match is bound as `match_base_name + n` on port
/// `match_base_port + 2n - 1`. A `match_base_port` of 0 lets the OS pick
/// each port instead, with the bound port reported back to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// Interface the lobby and every match socket bind to.
    pub host: String,
    /// UDP port of the lobby socket.
    pub server_port: u16,
    /// Discovery name the lobby answers `Resolve` probes for.
    pub service_name: String,
    /// Name prefix for dynamically created match endpoints.
    pub match_base_name: String,
    /// First port of the range reserved for match endpoints.
    pub match_base_port: u16,
    /// Directory holding one snapshot file per interrupted match.
    pub saved_matches_dir: PathBuf,
    /// Anchored regex patterns rejected at nickname-claim time.
    #[serde(default)]
    pub banned_patterns: Vec<String>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            server_port: 9090,
            service_name: "LobbyServer".to_string(),
            match_base_name: "MatchServer".to_string(),
            match_base_port: 9100,
            saved_matches_dir: PathBuf::from("savedMatches"),
            banned_patterns: Vec::new(),
        }
    }
}

impl LobbyConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Loads a ban list: a JSON array of regex patterns.
pub fn load_ban_list(path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LobbyConfig::default();
        assert_eq!(config.server_port, 9090);
        assert_eq!(config.service_name, "LobbyServer");
        assert!(config.banned_patterns.is_empty());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "host": "0.0.0.0",
                "server_port": 4000,
                "service_name": "Lobby",
                "match_base_name": "Match",
                "match_base_port": 4100,
                "saved_matches_dir": "/tmp/saves",
                "banned_patterns": ["admin.*"]
            }}"#
        )
        .unwrap();

        let config = LobbyConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.match_base_port, 4100);
        assert_eq!(config.banned_patterns, vec!["admin.*".to_string()]);
    }

    #[test]
    fn test_load_ban_list_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["admin", "server.*"]"#).unwrap();

        let patterns = load_ban_list(file.path()).unwrap();
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(LobbyConfig::load(Path::new("/nonexistent/server.json")).is_err());
    }
}
