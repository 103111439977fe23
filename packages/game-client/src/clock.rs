use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use shared::models::events::ClockSnapshot;
use shared::models::game::{Color, Game};
use shared::services::time_provider::TimeProvider;

/// What the UI shows for both clocks at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockDisplay {
    pub white_ms: u64,
    pub black_ms: u64,
    pub active: Option<Color>,
}

impl ClockDisplay {
    pub fn remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_ms,
            Color::Black => self.black_ms,
        }
    }
}

/// Local countdown between authoritative snapshots. Elapsed time is measured
/// from when the snapshot arrived, so client and server clocks never have to
/// agree. A prediction reaching zero never ends the game.
#[derive(Clone)]
pub struct ClockPredictor {
    time: Arc<dyn TimeProvider>,
    snapshot: ClockSnapshot,
    received_at: i64,
    running: bool,
    tick_interval: Duration,
    fast_tick_interval: Duration,
    fast_tick_threshold: Duration,
}

impl ClockPredictor {
    pub fn new(time: Arc<dyn TimeProvider>, snapshot: ClockSnapshot) -> Self {
        let received_at = time.now_millis();
        ClockPredictor {
            time,
            snapshot,
            received_at,
            running: true,
            tick_interval: Duration::from_secs(1),
            fast_tick_interval: Duration::from_millis(100),
            fast_tick_threshold: Duration::from_secs(10),
        }
    }

    pub fn with_intervals(mut self, normal: Duration, fast: Duration, threshold: Duration) -> Self {
        self.tick_interval = normal;
        self.fast_tick_interval = fast;
        self.fast_tick_threshold = threshold;
        self
    }

    /// Seeds a predictor from a game record when no snapshot was pushed.
    pub fn from_game(time: Arc<dyn TimeProvider>, game: &Game) -> Self {
        let snapshot = ClockSnapshot::from_game(game, time.now_millis());
        let mut predictor = Self::new(time, snapshot);
        predictor.running = game.is_active();
        predictor
    }

    /// Replaces the prediction with an authoritative snapshot.
    pub fn sync(&mut self, snapshot: ClockSnapshot, game_active: bool) {
        self.snapshot = snapshot;
        self.received_at = self.time.now_millis();
        self.running = game_active;
    }

    pub fn display(&self) -> ClockDisplay {
        let active = self.snapshot.active_color.filter(|_| self.running);
        let elapsed = (self.time.now_millis() - self.received_at).max(0) as u64;
        let live = |color: Color| {
            let remaining = self.snapshot.remaining(color);
            if active == Some(color) {
                remaining.saturating_sub(elapsed)
            } else {
                remaining
            }
        };
        ClockDisplay {
            white_ms: live(Color::White),
            black_ms: live(Color::Black),
            active,
        }
    }

    /// Color whose predicted time has run out, so the server can be asked to
    /// check.
    pub fn predicted_flag(&self) -> Option<Color> {
        let display = self.display();
        display
            .active
            .filter(|color| display.remaining(*color) == 0)
    }

    pub fn next_tick(&self) -> Duration {
        let display = self.display();
        match display.active {
            Some(color)
                if Duration::from_millis(display.remaining(color)) < self.fast_tick_threshold =>
            {
                self.fast_tick_interval
            }
            _ => self.tick_interval,
        }
    }
}
