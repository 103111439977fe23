use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::game::{Color, Game};
use crate::models::move_record::{BanRecord, MoveRecord};

/// Clock state as seen by the server at `server_time` (epoch ms).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub white_time_remaining: u64,
    pub black_time_remaining: u64,
    pub active_color: Option<Color>,
    pub increment_applied: bool,
    pub server_time: i64,
}

impl ClockSnapshot {
    /// Live remaining times, with the running clock's elapsed time deducted.
    pub fn from_game(game: &Game, now_ms: i64) -> Self {
        ClockSnapshot {
            white_time_remaining: game.live_time_remaining(Color::White, now_ms),
            black_time_remaining: game.live_time_remaining(Color::Black, now_ms),
            active_color: game.running_clock(),
            increment_applied: false,
            server_time: now_ms,
        }
    }

    pub fn remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_time_remaining,
            Color::Black => self.black_time_remaining,
        }
    }
}

/// Payload published on a game's topic after every committed change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Move {
        game: Game,
        record: MoveRecord,
        clock: ClockSnapshot,
    },
    Ban {
        game: Game,
        record: BanRecord,
        clock: ClockSnapshot,
    },
    GameUpdate {
        game: Game,
        clock: ClockSnapshot,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    Malformed(String),
    Inconsistent(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Malformed(msg) => write!(f, "Malformed event: {}", msg),
            EventError::Inconsistent(msg) => write!(f, "Inconsistent event: {}", msg),
        }
    }
}

impl std::error::Error for EventError {}

impl GameEvent {
    pub fn game(&self) -> &Game {
        match self {
            GameEvent::Move { game, .. }
            | GameEvent::Ban { game, .. }
            | GameEvent::GameUpdate { game, .. } => game,
        }
    }

    pub fn clock(&self) -> &ClockSnapshot {
        match self {
            GameEvent::Move { clock, .. }
            | GameEvent::Ban { clock, .. }
            | GameEvent::GameUpdate { clock, .. } => clock,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game().game_id
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::Move { .. } => "move",
            GameEvent::Ban { .. } => "ban",
            GameEvent::GameUpdate { .. } => "game_update",
        }
    }

    /// Parses and validates a payload received from the broadcast channel.
    pub fn from_json(payload: &str) -> Result<Self, EventError> {
        let event: GameEvent =
            serde_json::from_str(payload).map_err(|e| EventError::Malformed(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), EventError> {
        let game = self.game();
        if game.game_id.is_empty() {
            return Err(EventError::Malformed("missing game_id".to_string()));
        }
        if game.current_fen.split_whitespace().count() != 6 {
            return Err(EventError::Malformed(format!(
                "invalid fen: {}",
                game.current_fen
            )));
        }

        match self {
            GameEvent::Move { game, record, .. } => {
                if record.game_id != game.game_id {
                    return Err(EventError::Inconsistent(
                        "move record belongs to another game".to_string(),
                    ));
                }
                if record.ply != game.ply || record.fen_after != game.current_fen {
                    return Err(EventError::Inconsistent(format!(
                        "move record for ply {} does not match game at ply {}",
                        record.ply, game.ply
                    )));
                }
            }
            GameEvent::Ban { game, record, .. } => {
                if record.game_id != game.game_id {
                    return Err(EventError::Inconsistent(
                        "ban record belongs to another game".to_string(),
                    ));
                }
                if record.ply != game.ply + 1 {
                    return Err(EventError::Inconsistent(format!(
                        "ban for ply {} does not precede game ply {}",
                        record.ply, game.ply
                    )));
                }
                if game.is_active() && game.current_banned_move != Some(record.banned_move()) {
                    return Err(EventError::Inconsistent(
                        "ban record does not match the banned move in force".to_string(),
                    ));
                }
            }
            GameEvent::GameUpdate { .. } => {}
        }
        Ok(())
    }
}
