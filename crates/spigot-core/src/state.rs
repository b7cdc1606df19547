use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ServerState::Stopped)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "stopped" => Ok(ServerState::Stopped),
            "starting" => Ok(ServerState::Starting),
            "running" => Ok(ServerState::Running),
            other => Err(format!("Unknown server state: {other}")),
        }
    }
}

/// Diagnostic scalars for the current server run. Reset on every spawn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostics {
    #[serde(default)]
    pub startup_time: Option<f64>,
}

/// Insertion-ordered set of connected players.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Roster {
    players: Vec<String>,
}

impl Roster {
    /// Returns false when the player was already present.
    pub fn join(&mut self, player: &str) -> bool {
        if self.contains(player) {
            return false;
        }
        self.players.push(player.to_string());
        true
    }

    /// Returns false when the player was not on the roster.
    pub fn leave(&mut self, player: &str) -> bool {
        match self.players.iter().position(|entry| entry == player) {
            Some(idx) => {
                self.players.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, player: &str) -> bool {
        self.players.iter().any(|entry| entry == player)
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn players(&self) -> &[String] {
        &self.players
    }
}

/// Everything the supervisor owns and the front end reads as one snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerSnapshot {
    pub status: ServerState,
    pub roster: Roster,
    pub diagnostics: Diagnostics,
    #[serde(default)]
    pub pid: Option<u32>,
    /// Worker sessions spawned since the monitor started.
    #[serde(default)]
    pub sessions_started: u64,
}
