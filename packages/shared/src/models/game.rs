use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::pgn::MoveText;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

impl From<chess::Color> for Color {
    fn from(color: chess::Color) -> Self {
        match color {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }
}

impl From<Color> for chess::Color {
    fn from(color: Color) -> Self {
        match color {
            Color::White => chess::Color::White,
            Color::Black => chess::Color::Black,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameResult {
    White,
    Black,
    Draw,
}

impl GameResult {
    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => GameResult::White,
            Color::Black => GameResult::Black,
        }
    }

    /// Result token as written at the end of the move text.
    pub fn as_pgn(&self) -> &'static str {
        match self {
            GameResult::White => "1-0",
            GameResult::Black => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Resignation,
    DrawAgreement,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    Timeout,
}

/// Milliseconds for both fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeControl {
    pub initial_time: u64,
    pub increment: u64,
}

impl TimeControl {
    pub fn new(initial_time: u64, increment: u64) -> Self {
        TimeControl {
            initial_time,
            increment,
        }
    }
}

impl Default for TimeControl {
    fn default() -> Self {
        // 10+0 rapid
        TimeControl::new(600_000, 0)
    }
}

/// A `{from, to}` pair forbidden for the upcoming move. Covers every promotion
/// variant of the pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BannedMove {
    pub from: String,
    pub to: String,
}

impl BannedMove {
    pub fn new(from: &str, to: &str) -> Self {
        BannedMove {
            from: from.to_ascii_lowercase(),
            to: to.to_ascii_lowercase(),
        }
    }

    /// Parses the four character coordinate form, e.g. `e2e4`.
    pub fn from_uci(uci: &str) -> Option<Self> {
        let uci = uci.trim();
        if uci.len() != 4 || !uci.is_ascii() {
            return None;
        }
        let (from, to) = uci.split_at(2);
        if is_square_name(from) && is_square_name(to) {
            Some(BannedMove::new(from, to))
        } else {
            None
        }
    }

    pub fn uci(&self) -> String {
        format!("{}{}", self.from, self.to)
    }
}

impl fmt::Display for BannedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)
    }
}

fn is_square_name(name: &str) -> bool {
    let bytes = name.to_ascii_lowercase().into_bytes();
    bytes.len() == 2 && (b'a'..=b'h').contains(&bytes[0]) && (b'1'..=b'8').contains(&bytes[1])
}

/// Which action the game is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    AwaitingBan(Color),
    AwaitingMove(Color),
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub game_id: String,
    pub white_player_id: String,
    pub black_player_id: String,
    pub current_fen: String,
    pub pgn: String,
    pub turn: Color,
    pub banning_player: Option<Color>,
    pub current_banned_move: Option<BannedMove>,
    pub status: GameStatus,
    pub result: Option<GameResult>,
    pub end_reason: Option<EndReason>,
    pub draw_offered_by: Option<Color>,
    pub rematch_offered_by: Option<Color>,
    pub rematch_game_id: Option<String>,
    pub white_time_remaining: u64,
    pub black_time_remaining: u64,
    pub white_turn_start_time: Option<i64>,
    pub black_turn_start_time: Option<i64>,
    pub time_control: TimeControl,
    pub ply: u32,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn new(
        white_player_id: &str,
        black_player_id: &str,
        time_control: TimeControl,
        now: DateTime<Utc>,
    ) -> Self {
        Game::from_position(
            white_player_id,
            black_player_id,
            STARTING_FEN,
            time_control,
            now,
        )
    }

    /// Creates a game from an arbitrary start position. The side not to move
    /// owes the first ban and its clock starts immediately.
    pub fn from_position(
        white_player_id: &str,
        black_player_id: &str,
        fen: &str,
        time_control: TimeControl,
        now: DateTime<Utc>,
    ) -> Self {
        let fen = normalize_fen(fen);
        let turn = match fen.split_whitespace().nth(1) {
            Some("b") => Color::Black,
            _ => Color::White,
        };
        let pgn = if fen == STARTING_FEN {
            String::new()
        } else {
            MoveText::from_position(&fen).render()
        };
        let banning_player = turn.opponent();

        let mut game = Game {
            game_id: Uuid::new_v4().to_string(),
            white_player_id: white_player_id.to_string(),
            black_player_id: black_player_id.to_string(),
            current_fen: fen,
            pgn,
            turn,
            banning_player: Some(banning_player),
            current_banned_move: None,
            status: GameStatus::Active,
            result: None,
            end_reason: None,
            draw_offered_by: None,
            rematch_offered_by: None,
            rematch_game_id: None,
            white_time_remaining: time_control.initial_time,
            black_time_remaining: time_control.initial_time,
            white_turn_start_time: None,
            black_turn_start_time: None,
            time_control,
            ply: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        game.set_turn_start_time(banning_player, Some(now.timestamp_millis()));
        game
    }

    pub fn phase(&self) -> GamePhase {
        if self.status == GameStatus::Finished {
            return GamePhase::Finished;
        }
        match self.banning_player {
            Some(color) => GamePhase::AwaitingBan(color),
            None => GamePhase::AwaitingMove(self.turn),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }

    pub fn color_of(&self, user_id: &str) -> Option<Color> {
        if self.white_player_id == user_id {
            Some(Color::White)
        } else if self.black_player_id == user_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn player_id(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white_player_id,
            Color::Black => &self.black_player_id,
        }
    }

    pub fn time_remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_time_remaining,
            Color::Black => self.black_time_remaining,
        }
    }

    pub fn set_time_remaining(&mut self, color: Color, remaining: u64) {
        match color {
            Color::White => self.white_time_remaining = remaining,
            Color::Black => self.black_time_remaining = remaining,
        }
    }

    pub fn turn_start_time(&self, color: Color) -> Option<i64> {
        match color {
            Color::White => self.white_turn_start_time,
            Color::Black => self.black_turn_start_time,
        }
    }

    pub fn set_turn_start_time(&mut self, color: Color, start: Option<i64>) {
        match color {
            Color::White => self.white_turn_start_time = start,
            Color::Black => self.black_turn_start_time = start,
        }
    }

    /// The color whose clock is currently ticking, if exactly one is.
    pub fn running_clock(&self) -> Option<Color> {
        match (self.white_turn_start_time, self.black_turn_start_time) {
            (Some(_), None) => Some(Color::White),
            (None, Some(_)) => Some(Color::Black),
            _ => None,
        }
    }

    /// The color that must act next, and therefore the only clock that may run.
    pub fn acting_color(&self) -> Option<Color> {
        match self.phase() {
            GamePhase::AwaitingBan(color) | GamePhase::AwaitingMove(color) => Some(color),
            GamePhase::Finished => None,
        }
    }

    /// Remaining time for `color` as of `now_ms`, counting the running turn.
    pub fn live_time_remaining(&self, color: Color, now_ms: i64) -> u64 {
        let remaining = self.time_remaining(color);
        match self.turn_start_time(color) {
            Some(start) => {
                let elapsed = now_ms.saturating_sub(start).max(0) as u64;
                remaining.saturating_sub(elapsed)
            }
            None => remaining,
        }
    }

    /// Full move number of the position in `current_fen`.
    pub fn move_number(&self) -> u32 {
        self.current_fen
            .split_whitespace()
            .nth(5)
            .and_then(|n| n.parse().ok())
            .unwrap_or(1)
    }

    /// Marks the game finished and clears every pending obligation. Clocks are
    /// the caller's responsibility.
    pub fn finish(&mut self, result: GameResult, reason: EndReason) {
        self.status = GameStatus::Finished;
        self.result = Some(result);
        self.end_reason = Some(reason);
        self.banning_player = None;
        self.current_banned_move = None;
        self.draw_offered_by = None;

        if let Ok(mut text) = MoveText::parse(&self.pgn) {
            text.set_result(result);
            self.pgn = text.render();
        }
    }
}

/// Collapses runs of whitespace so FEN comparisons are textual.
pub fn normalize_fen(fen: &str) -> String {
    fen.split_whitespace().collect::<Vec<_>>().join(" ")
}
