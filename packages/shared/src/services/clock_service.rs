use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    models::{
        events::ClockSnapshot,
        game::{Color, EndReason, Game, GameResult},
    },
    services::{
        errors::clock_service_errors::ClockServiceError,
        time_provider::{SystemTimeProvider, TimeProvider},
    },
};

/// Server side clock accounting. Every operation mutates the game record in
/// memory only; the caller persists the record in the same write as the rest
/// of the turn.
#[derive(Clone)]
pub struct ClockService {
    time: Arc<dyn TimeProvider>,
}

impl Default for ClockService {
    fn default() -> Self {
        ClockService::new(Arc::new(SystemTimeProvider))
    }
}

impl ClockService {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        ClockService { time }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn now_millis(&self) -> i64 {
        self.time.now_millis()
    }

    /// Starts `color`'s clock and stops the other one without charging it.
    pub fn start_clock(&self, game: &mut Game, color: Color) -> i64 {
        let now = self.now_millis();
        game.set_turn_start_time(color, Some(now));
        game.set_turn_start_time(color.opponent(), None);
        now
    }

    /// Charges the running turn to `color` and returns the new remaining time.
    /// A clock that is not running is left untouched apart from the increment.
    pub fn stop_clock(&self, game: &mut Game, color: Color, apply_increment: bool) -> u64 {
        let now = self.now_millis();
        let mut remaining = game.live_time_remaining(color, now);
        if apply_increment {
            remaining += game.time_control.increment;
        }
        game.set_time_remaining(color, remaining);
        game.set_turn_start_time(color, None);
        remaining
    }

    /// Hands the clock from `moving_color` to its opponent. The increment is
    /// earned on every handover except the opening ban, which precedes the
    /// first move.
    pub fn handle_move_clock_update(&self, game: &mut Game, moving_color: Color) -> ClockSnapshot {
        let apply_increment = game.ply > 0 && game.time_control.increment > 0;
        self.stop_clock(game, moving_color, apply_increment);
        self.start_clock(game, moving_color.opponent());

        let mut snapshot = self.snapshot(game);
        snapshot.increment_applied = apply_increment;
        snapshot
    }

    /// Stops whichever clock runs, without increment. Used when a game ends.
    pub fn stop_all(&self, game: &mut Game) {
        for color in [Color::White, Color::Black] {
            if game.turn_start_time(color).is_some() {
                self.stop_clock(game, color, false);
            }
        }
    }

    pub fn snapshot(&self, game: &Game) -> ClockSnapshot {
        ClockSnapshot::from_game(game, self.now_millis())
    }

    /// Checks that exactly the acting color's clock runs.
    pub fn verify(&self, game: &Game) -> Result<(), ClockServiceError> {
        let expected = game.acting_color();
        let white_running = game.white_turn_start_time.is_some();
        let black_running = game.black_turn_start_time.is_some();

        let consistent = match expected {
            Some(color) => game.running_clock() == Some(color),
            None => !white_running && !black_running,
        };
        if consistent {
            Ok(())
        } else {
            Err(ClockServiceError::ClockInconsistency {
                expected,
                white_running,
                black_running,
            })
        }
    }

    /// Restores the single-running-clock invariant from `turn` and
    /// `banning_player`. A stray start time is dropped without charging the
    /// player; a missing one starts now. Returns whether anything changed.
    pub fn repair(&self, game: &mut Game) -> bool {
        let err = match self.verify(game) {
            Ok(()) => return false,
            Err(err) => err,
        };
        warn!(game_id = %game.game_id, "Repairing clocks: {}", err);

        match game.acting_color() {
            Some(color) => {
                game.set_turn_start_time(color.opponent(), None);
                if game.turn_start_time(color).is_none() {
                    game.set_turn_start_time(color, Some(self.now_millis()));
                }
            }
            None => {
                game.white_turn_start_time = None;
                game.black_turn_start_time = None;
            }
        }
        true
    }

    /// Ends the game on time if the running clock has reached zero. Returns
    /// the flagged color.
    pub fn check_time_violation(&self, game: &mut Game) -> Option<Color> {
        if !game.is_active() {
            return None;
        }
        self.repair(game);

        let color = game.running_clock()?;
        if game.live_time_remaining(color, self.now_millis()) > 0 {
            return None;
        }

        info!(game_id = %game.game_id, "{} flagged", color);
        game.set_time_remaining(color, 0);
        game.white_turn_start_time = None;
        game.black_turn_start_time = None;
        game.finish(GameResult::win_for(color.opponent()), EndReason::Timeout);
        Some(color)
    }
}
