use serde::Serialize;

use shared::models::game::{BannedMove, Game, STARTING_FEN};
use shared::models::move_record::MoveRecord;
use shared::models::pgn::MoveText;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Start,
    /// The ban for this ply is known but the move is not yet played.
    AfterBan,
    AfterMove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastMove {
    pub from: String,
    pub to: String,
    pub san: String,
}

/// One position in the replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryStep {
    pub ply: u32,
    pub phase: StepPhase,
    pub fen: String,
    /// The ban in force for this ply's move.
    pub banned_move: Option<BannedMove>,
    pub last_move: Option<LastMove>,
}

/// Cursor over a game's plies. Each ply contributes an optional after-ban
/// step followed by an after-move step; a ban chosen for the ply not yet
/// played shows up as a trailing after-ban step.
///
/// `steps` is never empty: index 0 is always the `Start` step, and `cursor`
/// is always a valid index into `steps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigator {
    steps: Vec<HistoryStep>,
    cursor: usize,
}

impl Navigator {
    /// Builds the step list and places the cursor on the latest step.
    pub fn new(start_fen: &str, moves: &[MoveRecord], pending_ban: Option<&BannedMove>) -> Self {
        let mut steps = vec![HistoryStep {
            ply: 0,
            phase: StepPhase::Start,
            fen: start_fen.to_string(),
            banned_move: None,
            last_move: None,
        }];

        let mut fen = start_fen.to_string();
        let mut last_move: Option<LastMove> = None;
        for record in moves {
            let banned = record.banned_move();
            if banned.is_some() {
                steps.push(HistoryStep {
                    ply: record.ply,
                    phase: StepPhase::AfterBan,
                    fen: fen.clone(),
                    banned_move: banned.clone(),
                    last_move: last_move.clone(),
                });
            }
            let played = LastMove {
                from: record.from.clone(),
                to: record.to.clone(),
                san: record.san.clone(),
            };
            fen = record.fen_after.clone();
            steps.push(HistoryStep {
                ply: record.ply,
                phase: StepPhase::AfterMove,
                fen: fen.clone(),
                banned_move: banned,
                last_move: Some(played.clone()),
            });
            last_move = Some(played);
        }

        if let Some(ban) = pending_ban {
            let next_ply = moves.last().map_or(1, |record| record.ply + 1);
            steps.push(HistoryStep {
                ply: next_ply,
                phase: StepPhase::AfterBan,
                fen,
                banned_move: Some(ban.clone()),
                last_move,
            });
        }

        // steps holds at least the start step
        let cursor = steps.len() - 1;
        Navigator { steps, cursor }
    }

    pub fn from_game(game: &Game, moves: &[MoveRecord]) -> Self {
        let start_fen = MoveText::parse(&game.pgn)
            .map(|text| text.start_fen().to_string())
            .unwrap_or_else(|_| STARTING_FEN.to_string());
        let pending = if game.is_active() {
            game.current_banned_move.as_ref()
        } else {
            None
        };
        Navigator::new(&start_fen, moves, pending)
    }

    /// Rebuilds from fresh data. A cursor on the latest step follows the game;
    /// otherwise it stays on the same step when that step still exists.
    pub fn rebuild(&mut self, game: &Game, moves: &[MoveRecord]) {
        let was_at_end = self.is_at_end();
        let current = self.current().clone();
        let mut rebuilt = Navigator::from_game(game, moves);
        if !was_at_end {
            if let Some(index) = rebuilt.index_of(current.ply, current.phase) {
                rebuilt.cursor = index;
            }
        }
        *self = rebuilt;
    }

    fn index_of(&self, ply: u32, phase: StepPhase) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.ply == ply && step.phase == phase)
    }

    pub fn steps(&self) -> &[HistoryStep] {
        &self.steps
    }

    pub fn current(&self) -> &HistoryStep {
        &self.steps[self.cursor]
    }

    pub fn is_at_start(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor + 1 == self.steps.len()
    }

    pub fn first(&mut self) -> &HistoryStep {
        self.cursor = 0;
        self.current()
    }

    pub fn last(&mut self) -> &HistoryStep {
        self.cursor = self.steps.len() - 1;
        self.current()
    }

    pub fn next(&mut self) -> &HistoryStep {
        if !self.is_at_end() {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn previous(&mut self) -> &HistoryStep {
        if !self.is_at_start() {
            self.cursor -= 1;
        }
        self.current()
    }

    /// Moves to the given step. A ply without a ban has no after-ban step;
    /// jumping there lands on the position before the move instead.
    pub fn jump_to(&mut self, ply: u32, phase: StepPhase) -> Option<&HistoryStep> {
        let index = match (ply, phase) {
            (0, _) | (_, StepPhase::Start) => Some(0),
            (_, StepPhase::AfterBan) => self.index_of(ply, StepPhase::AfterBan).or_else(|| {
                self.index_of(ply, StepPhase::AfterMove)
                    .map(|index| index - 1)
            }),
            (_, StepPhase::AfterMove) => self.index_of(ply, StepPhase::AfterMove),
        }?;
        self.cursor = index;
        Some(self.current())
    }
}
