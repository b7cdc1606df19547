//! Best-effort classification of server console lines.
//!
//! Console lines look like `[12:00:00] [Server thread/INFO]: Steve left the game`.
//! Everything up to and including the first token ending in `]:` is the log
//! header; rule positions below are offsets into the message tokens after it.
//! Lines without a recognizable header are treated as bare messages.
//!
//! Rules live in [`PATTERNS`] and are tried in order; the first matching rule
//! decides the line. Adding a new console format means adding a row there.

use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Death rules only apply to messages with at least this many tokens after
/// the log header.
const MIN_DEATH_MESSAGE_TOKENS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Fall,
    Explosion,
    Melee,
}

impl DeathCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeathCause::Fall => "fall",
            DeathCause::Explosion => "explosion",
            DeathCause::Melee => "melee",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineEvent {
    /// Player chat. Never changes server state.
    Chat { sender: String },
    StartupComplete { seconds: f64 },
    PlayerJoined { player: String },
    PlayerLeft { player: String },
    PlayerDied {
        player: String,
        cause: DeathCause,
        attacker: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{rule} line is missing message token {index}")]
    MissingToken { rule: &'static str, index: usize },
    #[error("invalid startup duration '{raw}'")]
    InvalidDuration { raw: String },
}

struct LinePattern {
    name: &'static str,
    min_tokens: usize,
    matches: fn(&[&str]) -> bool,
    build: fn(&[&str]) -> Result<LineEvent, ParseError>,
}

const PATTERNS: &[LinePattern] = &[
    LinePattern {
        name: "chat",
        min_tokens: 0,
        matches: |msg| msg.first().is_some_and(|token| is_angle_wrapped(token)),
        build: |msg| {
            let sender = msg[0];
            Ok(LineEvent::Chat {
                sender: sender[1..sender.len() - 1].to_string(),
            })
        },
    },
    LinePattern {
        name: "startup",
        min_tokens: 0,
        matches: |msg| token_is(msg, 0, "done"),
        build: |msg| {
            let raw = token(msg, 1, "startup")?;
            let seconds = raw
                .get(1..raw.len().saturating_sub(2))
                .and_then(|trimmed| trimmed.parse::<f64>().ok())
                .ok_or_else(|| ParseError::InvalidDuration {
                    raw: raw.to_string(),
                })?;
            Ok(LineEvent::StartupComplete { seconds })
        },
    },
    LinePattern {
        name: "join",
        min_tokens: 0,
        matches: |msg| token_is(msg, 1, "logged"),
        build: |msg| {
            let player = msg[0].split('[').next().unwrap_or_default();
            Ok(LineEvent::PlayerJoined {
                player: player.to_string(),
            })
        },
    },
    LinePattern {
        name: "leave",
        min_tokens: 0,
        matches: |msg| token_is(msg, 1, "left"),
        build: |msg| {
            Ok(LineEvent::PlayerLeft {
                player: msg[0].to_string(),
            })
        },
    },
    LinePattern {
        name: "fall",
        min_tokens: MIN_DEATH_MESSAGE_TOKENS,
        matches: |msg| token_is(msg, 1, "fell"),
        build: |msg| Ok(death(msg, DeathCause::Fall, None)),
    },
    LinePattern {
        name: "explosion",
        min_tokens: MIN_DEATH_MESSAGE_TOKENS,
        matches: |msg| token_is(msg, 2, "blown"),
        build: |msg| Ok(death(msg, DeathCause::Explosion, Some(5))),
    },
    LinePattern {
        name: "melee",
        min_tokens: MIN_DEATH_MESSAGE_TOKENS,
        matches: |msg| token_is(msg, 2, "slain"),
        build: |msg| Ok(death(msg, DeathCause::Melee, Some(4))),
    },
];

/// Classifies one console line.
///
/// `Ok(None)` for lines no rule recognizes. A rule that matches but cannot
/// extract its data returns an error; callers log it and keep the line.
pub fn classify(line: &str) -> Result<Option<LineEvent>, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let msg = message_tokens(&tokens);
    if msg.is_empty() {
        return Ok(None);
    }
    for pattern in PATTERNS {
        if msg.len() < pattern.min_tokens {
            continue;
        }
        if (pattern.matches)(msg) {
            trace!(event = "line_classified", rule = pattern.name);
            return (pattern.build)(msg).map(Some);
        }
    }
    Ok(None)
}

fn message_tokens<'a>(tokens: &'a [&'a str]) -> &'a [&'a str] {
    match tokens.iter().position(|token| token.ends_with("]:")) {
        Some(idx) => &tokens[idx + 1..],
        None => tokens,
    }
}

fn token<'a>(msg: &[&'a str], index: usize, rule: &'static str) -> Result<&'a str, ParseError> {
    msg.get(index)
        .copied()
        .ok_or(ParseError::MissingToken { rule, index })
}

fn token_is(msg: &[&str], index: usize, word: &str) -> bool {
    msg.get(index)
        .is_some_and(|token| token.eq_ignore_ascii_case(word))
}

fn is_angle_wrapped(token: &str) -> bool {
    token.len() >= 2 && token.starts_with('<') && token.ends_with('>')
}

fn death(msg: &[&str], cause: DeathCause, attacker_at: Option<usize>) -> LineEvent {
    LineEvent::PlayerDied {
        player: msg[0].to_string(),
        cause,
        attacker: attacker_at
            .and_then(|idx| msg.get(idx))
            .map(|attacker| attacker.to_string()),
    }
}
