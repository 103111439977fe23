use serde::Serialize;
use tracing::{debug, info, warn};

use shared::models::actions::ActionResult;
use shared::models::events::GameEvent;
use shared::models::game::{BannedMove, Game};
use shared::models::move_record::{BanRecord, MoveRecord};
use shared::services::ban_protocol::BanProtocol;

use crate::errors::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    Move {
        from: String,
        to: String,
        promotion: Option<String>,
    },
    Ban {
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub request_id: String,
    pub action: PendingAction,
    /// Ply the action plays or restricts.
    pub ply: u32,
}

impl PendingEntry {
    fn matches_move(&self, record: &MoveRecord) -> bool {
        match &self.action {
            PendingAction::Move {
                from,
                to,
                promotion,
            } => self.ply == record.ply && record.is_same_move(from, to, promotion.as_deref()),
            PendingAction::Ban { .. } => false,
        }
    }

    fn matches_ban(&self, record: &BanRecord) -> bool {
        match &self.action {
            PendingAction::Ban { from, to } => {
                self.ply == record.ply && record.from == *from && record.to == *to
            }
            PendingAction::Move { .. } => false,
        }
    }
}

/// Lifecycle of the latest optimistic action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    Pending(PendingEntry),
    Confirmed { request_id: String },
    RolledBack { request_id: String, error: SyncError },
}

/// What the caller has to do after feeding a server message in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Stale, duplicate or unrelated; nothing changed.
    Ignored,
    Applied,
    /// The server confirmed exactly what was predicted.
    QuietMerge,
    /// State was patched but the move list must be fetched again.
    Refetch,
    RolledBack { error: SyncError, refetch: bool },
}

impl Reconciliation {
    pub fn needs_refetch(&self) -> bool {
        match self {
            Reconciliation::Refetch => true,
            Reconciliation::RolledBack { refetch, .. } => *refetch,
            _ => false,
        }
    }
}

/// Local copy of one game: the last authoritative record, the view shown to
/// the player (authoritative plus at most one optimistic action) and the
/// known move list. Server records are only adopted when their version is
/// newer than the one held, so arrival order does not matter.
#[derive(Clone)]
pub struct SyncLayer {
    player_id: String,
    protocol: BanProtocol,
    confirmed: Game,
    view: Game,
    state: ActionState,
    moves: Vec<MoveRecord>,
}

impl SyncLayer {
    pub fn new(player_id: &str, protocol: BanProtocol, game: Game) -> Self {
        SyncLayer {
            player_id: player_id.to_string(),
            protocol,
            view: game.clone(),
            confirmed: game,
            state: ActionState::Idle,
            moves: Vec::new(),
        }
    }

    pub fn game_id(&self) -> &str {
        &self.confirmed.game_id
    }

    pub fn view(&self) -> &Game {
        &self.view
    }

    pub fn confirmed(&self) -> &Game {
        &self.confirmed
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    pub fn pending(&self) -> Option<&PendingEntry> {
        match &self.state {
            ActionState::Pending(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn set_moves(&mut self, moves: Vec<MoveRecord>) {
        self.moves = moves;
    }

    fn ensure_idle(&self) -> Result<(), SyncError> {
        match self.state {
            ActionState::Pending(_) => Err(SyncError::ActionInFlight),
            _ => Ok(()),
        }
    }

    /// Runs `action` through the same rules the server applies, on a copy of
    /// `base`.
    fn apply(&self, base: &Game, action: &PendingAction) -> Result<(Game, u32), SyncError> {
        let mut game = base.clone();
        let ply = match action {
            PendingAction::Move {
                from,
                to,
                promotion,
            } => {
                self.protocol
                    .make_move(&mut game, &self.player_id, from, to, promotion.as_deref())?
                    .record
                    .ply
            }
            PendingAction::Ban { from, to } => {
                self.protocol
                    .ban(&mut game, &self.player_id, &BannedMove::new(from, to))?
                    .record
                    .ply
            }
        };
        Ok((game, ply))
    }

    fn begin(&mut self, request_id: &str, action: PendingAction) -> Result<(), SyncError> {
        self.ensure_idle()?;
        let (view, ply) = self.apply(&self.view, &action)?;
        debug!("Optimistically applied {:?} at ply {}", action, ply);
        self.view = view;
        self.state = ActionState::Pending(PendingEntry {
            request_id: request_id.to_string(),
            action,
            ply,
        });
        Ok(())
    }

    /// Applies a move locally before it is sent. Illegal moves are rejected
    /// here and never reach the server.
    pub fn begin_move(
        &mut self,
        request_id: &str,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> Result<(), SyncError> {
        let promotion = promotion.map(str::to_ascii_lowercase).or_else(|| {
            // the engine defaults to a queen; record it so the echo compares equal
            self.protocol
                .chess()
                .apply_move(&self.view.current_fen, &self.view.pgn, from, to, None)
                .ok()
                .and_then(|applied| applied.promotion)
        });
        self.begin(
            request_id,
            PendingAction::Move {
                from: from.to_ascii_lowercase(),
                to: to.to_ascii_lowercase(),
                promotion,
            },
        )
    }

    pub fn begin_ban(&mut self, request_id: &str, from: &str, to: &str) -> Result<(), SyncError> {
        self.begin(
            request_id,
            PendingAction::Ban {
                from: from.to_ascii_lowercase(),
                to: to.to_ascii_lowercase(),
            },
        )
    }

    fn rollback(&mut self, entry: PendingEntry, error: SyncError) -> Reconciliation {
        info!("Rolling back {} ({})", entry.request_id, error);
        self.view = self.confirmed.clone();
        let refetch = error.requires_refresh();
        self.state = ActionState::RolledBack {
            request_id: entry.request_id,
            error: error.clone(),
        };
        Reconciliation::RolledBack { error, refetch }
    }

    /// Reverts a request that could not be delivered.
    pub fn abandon(&mut self, request_id: &str, error: SyncError) -> Reconciliation {
        match self.pending() {
            Some(entry) if entry.request_id == request_id => {
                let entry = entry.clone();
                self.rollback(entry, error)
            }
            _ => Reconciliation::Ignored,
        }
    }

    fn merge_record(&mut self, record: &MoveRecord) {
        let index = record.ply as usize;
        if index == self.moves.len() + 1 {
            self.moves.push(record.clone());
        } else if index >= 1 && index <= self.moves.len() {
            self.moves[index - 1] = record.clone();
        }
    }

    /// Adopts `game` as the authoritative record if it is newer, replaying
    /// any pending action on top of it.
    fn adopt(&mut self, game: Game) -> Result<bool, Reconciliation> {
        if game.game_id != self.confirmed.game_id || game.version <= self.confirmed.version {
            return Ok(false);
        }
        self.confirmed = game;

        let Some(entry) = self.pending().cloned() else {
            self.view = self.confirmed.clone();
            return Ok(true);
        };
        match self.apply(&self.confirmed, &entry.action) {
            Ok((view, ply)) if ply == entry.ply => {
                self.view = view;
                Ok(true)
            }
            _ => {
                warn!(
                    "Pending {} no longer applies at version {}",
                    entry.request_id, self.confirmed.version
                );
                let error = SyncError::Conflict(format!(
                    "the game moved on before {} was confirmed",
                    entry.request_id
                ));
                Err(self.rollback(entry, error))
            }
        }
    }

    fn confirm(&mut self, entry: &PendingEntry) {
        self.view = self.confirmed.clone();
        self.state = ActionState::Confirmed {
            request_id: entry.request_id.clone(),
        };
    }

    fn was_confirmed(&self, request_id: &str) -> bool {
        matches!(&self.state, ActionState::Confirmed { request_id: id } if id == request_id)
    }

    /// Reconciles the direct response to a request sent by this client.
    pub fn on_response(&mut self, request_id: &str, result: &ActionResult) -> Reconciliation {
        let pending = self
            .pending()
            .filter(|entry| entry.request_id == request_id)
            .cloned();

        match result {
            ActionResult::Error { category, message } => match pending {
                Some(entry) => {
                    let error = SyncError::from_category(*category, message.clone());
                    self.rollback(entry, error)
                }
                None => Reconciliation::Ignored,
            },
            ActionResult::Moved { game, record } => {
                let confirmed = pending.as_ref().map(|entry| entry.matches_move(record));
                self.merge_record(record);
                self.reconcile_success(request_id, pending, confirmed, game.clone())
            }
            ActionResult::Banned { game, record } => {
                let confirmed = pending.as_ref().map(|entry| entry.matches_ban(record));
                self.reconcile_success(request_id, pending, confirmed, game.clone())
            }
            ActionResult::Game { game } => self.on_snapshot(game.clone()),
            ActionResult::Moves { moves } => {
                self.moves = moves.clone();
                Reconciliation::Applied
            }
            ActionResult::LegalMoves { .. } | ActionResult::Ack => Reconciliation::Ignored,
        }
    }

    fn reconcile_success(
        &mut self,
        request_id: &str,
        pending: Option<PendingEntry>,
        matches: Option<bool>,
        game: Game,
    ) -> Reconciliation {
        match (pending, matches) {
            (Some(entry), Some(true)) => {
                if game.version > self.confirmed.version {
                    self.confirmed = game;
                }
                self.confirm(&entry);
                Reconciliation::QuietMerge
            }
            (Some(entry), _) => {
                if game.version > self.confirmed.version {
                    self.confirmed = game;
                }
                self.confirm(&entry);
                Reconciliation::Refetch
            }
            (None, _) if self.was_confirmed(request_id) => Reconciliation::Ignored,
            (None, _) => {
                // late success for a request already rolled back: still authoritative
                info!("Late confirmation for {}", request_id);
                match self.adopt(game) {
                    Ok(_) => Reconciliation::Refetch,
                    Err(rolled_back) => rolled_back,
                }
            }
        }
    }

    /// Reconciles a pushed event. Events for this client's pending action
    /// confirm it; anything else is the other player's doing.
    pub fn on_event(&mut self, event: &GameEvent) -> Reconciliation {
        let game = event.game();
        if game.game_id != self.confirmed.game_id || game.version <= self.confirmed.version {
            debug!(
                "Ignoring {} event at version {} (holding {})",
                event.kind(),
                game.version,
                self.confirmed.version
            );
            return Reconciliation::Ignored;
        }

        if let GameEvent::Move { record, .. } = event {
            self.merge_record(record);
        }

        if let Some(entry) = self.pending().cloned() {
            let echoed = match event {
                GameEvent::Move { record, .. } => entry.matches_move(record),
                GameEvent::Ban { record, .. } => entry.matches_ban(record),
                GameEvent::GameUpdate { .. } => false,
            };
            if echoed {
                self.confirmed = game.clone();
                self.confirm(&entry);
                return Reconciliation::QuietMerge;
            }
        }

        match self.adopt(game.clone()) {
            Err(rolled_back) => rolled_back,
            Ok(_) => match event {
                GameEvent::Move { .. } | GameEvent::Ban { .. } => Reconciliation::Refetch,
                GameEvent::GameUpdate { .. } => Reconciliation::Applied,
            },
        }
    }

    /// Reconciles a fetched record, e.g. from polling.
    pub fn on_snapshot(&mut self, game: Game) -> Reconciliation {
        match self.adopt(game) {
            Ok(true) => Reconciliation::Applied,
            Ok(false) => Reconciliation::Ignored,
            Err(rolled_back) => rolled_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::models::events::ClockSnapshot;
    use shared::models::game::{Color, GamePhase, TimeControl};
    use shared::services::chess_service::ChessService;
    use shared::services::clock_service::ClockService;
    use shared::services::time_provider::ManualTimeProvider;
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn protocol() -> BanProtocol {
        BanProtocol::new(
            ChessService::new(),
            ClockService::new(Arc::new(ManualTimeProvider::new(START))),
        )
    }

    fn new_game() -> Game {
        Game::new(
            "alice",
            "bob",
            TimeControl::default(),
            Utc.timestamp_millis_opt(START).unwrap(),
        )
    }

    /// Server side of the exchange: applies the action and bumps the version
    /// the way a commit would.
    struct Server {
        protocol: BanProtocol,
        game: Game,
    }

    impl Server {
        fn new(game: Game) -> Self {
            Server {
                protocol: protocol(),
                game,
            }
        }

        fn ban(&mut self, user: &str, from: &str, to: &str) -> (Game, BanRecord) {
            let outcome = self
                .protocol
                .ban(&mut self.game, user, &BannedMove::new(from, to))
                .unwrap();
            self.game.version += 1;
            (self.game.clone(), outcome.record)
        }

        fn play(&mut self, user: &str, from: &str, to: &str) -> (Game, MoveRecord) {
            let outcome = self
                .protocol
                .make_move(&mut self.game, user, from, to, None)
                .unwrap();
            self.game.version += 1;
            (self.game.clone(), outcome.record)
        }

        fn event_for_move(game: Game, record: MoveRecord) -> GameEvent {
            let clock = ClockSnapshot::from_game(&game, START);
            GameEvent::Move {
                game,
                record,
                clock,
            }
        }
    }

    /// Alice to move after Bob banned e2e4.
    fn alice_to_move() -> (SyncLayer, Server) {
        let mut server = Server::new(new_game());
        let (game, _) = server.ban("bob", "e2", "e4");
        let sync = SyncLayer::new("alice", protocol(), game);
        (sync, server)
    }

    #[test]
    fn test_optimistic_move_is_applied_immediately() {
        let (mut sync, _) = alice_to_move();

        sync.begin_move("r-1", "d2", "d4", None).unwrap();

        assert_eq!(sync.view().ply, 1);
        assert_eq!(sync.view().phase(), GamePhase::AwaitingBan(Color::White));
        assert_eq!(sync.confirmed().ply, 0);
        assert!(matches!(sync.state(), ActionState::Pending(entry) if entry.ply == 1));
    }

    #[test]
    fn test_banned_move_is_rejected_locally() {
        let (mut sync, _) = alice_to_move();

        let result = sync.begin_move("r-1", "e2", "e4", None);

        assert!(matches!(result, Err(SyncError::InvalidMove(_))));
        assert_eq!(sync.state(), &ActionState::Idle);
        assert_eq!(sync.view(), sync.confirmed());
    }

    #[test]
    fn test_second_action_while_pending() {
        let (mut sync, _) = alice_to_move();
        sync.begin_move("r-1", "d2", "d4", None).unwrap();

        let result = sync.begin_ban("r-2", "d7", "d5");

        assert_eq!(result, Err(SyncError::ActionInFlight));
    }

    #[test]
    fn test_identical_echo_is_quiet_merge() {
        let (mut sync, mut server) = alice_to_move();
        sync.begin_move("r-1", "d2", "d4", None).unwrap();

        let (game, record) = server.play("alice", "d2", "d4");
        let outcome = sync.on_event(&Server::event_for_move(game.clone(), record.clone()));

        assert_eq!(outcome, Reconciliation::QuietMerge);
        assert!(!outcome.needs_refetch());
        assert_eq!(sync.view(), &game);
        assert_eq!(sync.moves(), &[record.clone()]);

        // the direct response arriving afterwards changes nothing
        let late = sync.on_response("r-1", &ActionResult::Moved { game, record });
        assert_eq!(late, Reconciliation::Ignored);
    }

    #[test]
    fn test_different_move_for_same_ply_rolls_back() {
        let (mut sync, mut server) = alice_to_move();
        sync.begin_move("r-1", "d2", "d4", None).unwrap();

        // another session of the same player won the race
        let (game, record) = server.play("alice", "c2", "c4");
        let outcome = sync.on_event(&Server::event_for_move(game.clone(), record));

        assert!(matches!(
            outcome,
            Reconciliation::RolledBack {
                error: SyncError::Conflict(_),
                refetch: true
            }
        ));
        assert_eq!(sync.view(), &game);
        assert!(matches!(sync.state(), ActionState::RolledBack { .. }));
    }

    #[test]
    fn test_error_response_rolls_back_to_confirmed() {
        let (mut sync, _) = alice_to_move();
        let before = sync.confirmed().clone();
        sync.begin_move("r-1", "d2", "d4", None).unwrap();

        let outcome = sync.on_response(
            "r-1",
            &ActionResult::error(
                shared::models::actions::ErrorCategory::InvalidMove,
                "not legal",
            ),
        );

        assert_eq!(
            outcome,
            Reconciliation::RolledBack {
                error: SyncError::InvalidMove("not legal".to_string()),
                refetch: false
            }
        );
        assert_eq!(sync.view(), &before);
    }

    #[test]
    fn test_late_success_after_rollback_is_authoritative() {
        let (mut sync, mut server) = alice_to_move();
        sync.begin_move("r-1", "d2", "d4", None).unwrap();
        sync.abandon(
            "r-1",
            SyncError::Transport(crate::errors::TransportError::Closed),
        );
        assert_eq!(sync.view().ply, 0);

        let (game, record) = server.play("alice", "d2", "d4");
        let outcome = sync.on_response("r-1", &ActionResult::Moved { game: game.clone(), record });

        assert_eq!(outcome, Reconciliation::Refetch);
        assert_eq!(sync.view(), &game);
    }

    #[test]
    fn test_opponent_event_patches_and_refetches() {
        let mut server = Server::new(new_game());
        let mut sync = SyncLayer::new("alice", protocol(), server.game.clone());

        let (game, record) = server.ban("bob", "e2", "e4");
        let clock = ClockSnapshot::from_game(&game, START);
        let outcome = sync.on_event(&GameEvent::Ban {
            game: game.clone(),
            record,
            clock,
        });

        assert_eq!(outcome, Reconciliation::Refetch);
        assert_eq!(sync.view().current_banned_move, Some(BannedMove::new("e2", "e4")));
    }

    #[test]
    fn test_stale_events_are_ignored_regardless_of_order() {
        let mut server = Server::new(new_game());
        let mut sync = SyncLayer::new("alice", protocol(), server.game.clone());
        let (ban_game, ban_record) = server.ban("bob", "e2", "e4");
        let (move_game, move_record) = server.play("alice", "d2", "d4");

        // the move event overtakes the ban event
        let first = sync.on_event(&Server::event_for_move(move_game.clone(), move_record));
        let clock = ClockSnapshot::from_game(&ban_game, START);
        let second = sync.on_event(&GameEvent::Ban {
            game: ban_game,
            record: ban_record,
            clock,
        });

        assert_eq!(first, Reconciliation::Refetch);
        assert_eq!(second, Reconciliation::Ignored);
        assert_eq!(sync.view(), &move_game);
    }

    #[test]
    fn test_unrelated_update_keeps_pending_action() {
        let (mut sync, mut server) = alice_to_move();
        sync.begin_move("r-1", "d2", "d4", None).unwrap();

        server.protocol.offer_draw(&mut server.game, "bob").unwrap();
        server.game.version += 1;
        let clock = ClockSnapshot::from_game(&server.game, START);
        let outcome = sync.on_event(&GameEvent::GameUpdate {
            game: server.game.clone(),
            clock,
        });

        assert_eq!(outcome, Reconciliation::Applied);
        assert!(sync.pending().is_some());
        assert_eq!(sync.view().ply, 1);
        assert_eq!(sync.confirmed().draw_offered_by, Some(Color::Black));
        // moving on declines the offer in the predicted view as well
        assert_eq!(sync.view().draw_offered_by, None);
    }
}
