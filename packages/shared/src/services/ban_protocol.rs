//! Turn structure of Ban Chess.
//!
//! A game alternates `AwaitingBan(X)` and `AwaitingMove(opponent of X)`. The
//! player who just moved bans one of the opponent's replies, and the ban hands
//! the clock over. Black bans once before White's first move.

use tracing::{debug, info};

use crate::{
    models::{
        events::ClockSnapshot,
        game::{BannedMove, Color, EndReason, Game, GamePhase, GameResult},
        move_record::{BanRecord, MoveRecord},
    },
    services::{
        chess_service::{ChessService, GameOverStatus},
        clock_service::ClockService,
        errors::ban_protocol_errors::BanProtocolError,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct BanOutcome {
    pub record: BanRecord,
    pub clock: ClockSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub record: MoveRecord,
    pub clock: ClockSnapshot,
}

#[derive(Clone, Default)]
pub struct BanProtocol {
    chess: ChessService,
    clock: ClockService,
}

impl BanProtocol {
    pub fn new(chess: ChessService, clock: ClockService) -> Self {
        BanProtocol { chess, clock }
    }

    pub fn clock(&self) -> &ClockService {
        &self.clock
    }

    pub fn chess(&self) -> &ChessService {
        &self.chess
    }

    fn player_color(game: &Game, user_id: &str) -> Result<Color, BanProtocolError> {
        game.color_of(user_id).ok_or_else(|| {
            BanProtocolError::UnauthorizedAction(format!(
                "{} is not a player in game {}",
                user_id, game.game_id
            ))
        })
    }

    fn active_player_color(game: &Game, user_id: &str) -> Result<Color, BanProtocolError> {
        let color = Self::player_color(game, user_id)?;
        if !game.is_active() {
            return Err(BanProtocolError::UnauthorizedAction(
                "Game is finished".to_string(),
            ));
        }
        Ok(color)
    }

    pub fn authorize_ban(game: &Game, user_id: &str) -> Result<Color, BanProtocolError> {
        let color = Self::active_player_color(game, user_id)?;
        match game.phase() {
            GamePhase::AwaitingBan(banning) if banning == color => Ok(color),
            GamePhase::AwaitingBan(_) => Err(BanProtocolError::UnauthorizedAction(
                "It is not your turn to ban".to_string(),
            )),
            _ => Err(BanProtocolError::UnauthorizedAction(
                "No ban is pending".to_string(),
            )),
        }
    }

    pub fn authorize_move(game: &Game, user_id: &str) -> Result<Color, BanProtocolError> {
        let color = Self::active_player_color(game, user_id)?;
        match game.phase() {
            GamePhase::AwaitingMove(mover) if mover == color => Ok(color),
            GamePhase::AwaitingBan(_) => Err(BanProtocolError::UnauthorizedAction(
                "A ban must be selected before moving".to_string(),
            )),
            _ => Err(BanProtocolError::UnauthorizedAction(
                "Not your turn".to_string(),
            )),
        }
    }

    fn finish(&self, game: &mut Game, status: GameOverStatus) {
        if let (Some(result), Some(reason)) = (status.result, status.reason) {
            self.clock.stop_all(game);
            game.finish(result, reason);
            info!(game_id = %game.game_id, ?result, ?reason, "Game over");
        }
    }

    /// Records a ban by `user_id`, hands the clock to the banned side and
    /// ends the game if the ban leaves it without a legal reply.
    pub fn ban(
        &self,
        game: &mut Game,
        user_id: &str,
        banned: &BannedMove,
    ) -> Result<BanOutcome, BanProtocolError> {
        let color = Self::authorize_ban(game, user_id)?;
        let pgn = self
            .chess
            .apply_ban_annotation(&game.current_fen, &game.pgn, banned)?;
        let status = self.chess.is_game_over(&game.current_fen, &pgn)?;

        let record = BanRecord {
            game_id: game.game_id.clone(),
            ply: game.ply + 1,
            move_number: game.move_number(),
            color,
            from: banned.from.clone(),
            to: banned.to.clone(),
            created_at: self.clock.now(),
        };

        game.pgn = pgn;
        game.current_banned_move = Some(banned.clone());
        game.banning_player = None;
        let mut clock = self.clock.handle_move_clock_update(game, color);
        debug!(game_id = %game.game_id, %color, ban = %banned, "Ban recorded");

        if status.is_over {
            self.finish(game, status);
            let increment_applied = clock.increment_applied;
            clock = self.clock.snapshot(game);
            clock.increment_applied = increment_applied;
        }
        game.updated_at = self.clock.now();

        Ok(BanOutcome { record, clock })
    }

    /// Plays a move by `user_id`. The mover's clock keeps running while they
    /// pick the ban for the opponent's reply.
    pub fn make_move(
        &self,
        game: &mut Game,
        user_id: &str,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> Result<MoveOutcome, BanProtocolError> {
        let color = Self::authorize_move(game, user_id)?;
        let applied = self
            .chess
            .apply_move(&game.current_fen, &game.pgn, from, to, promotion)?;
        let status = self.chess.is_game_over(&applied.fen, &applied.pgn)?;

        let now = self.clock.now_millis();
        let time_taken_ms = game
            .turn_start_time(color)
            .map_or(0, |start| now.saturating_sub(start).max(0) as u64);
        let move_number = game.move_number();

        game.current_fen = applied.fen.clone();
        game.pgn = applied.pgn;
        game.ply += 1;
        game.turn = color.opponent();
        game.current_banned_move = None;
        if game.draw_offered_by == Some(color.opponent()) {
            // moving on declines the offer
            game.draw_offered_by = None;
        }

        if status.is_over {
            self.finish(game, status);
        } else {
            game.banning_player = Some(color);
        }
        game.updated_at = self.clock.now();

        let banned_by = applied.banned_move.as_ref().map(|_| color.opponent());
        let record = MoveRecord {
            game_id: game.game_id.clone(),
            ply: game.ply,
            move_number,
            color,
            from: applied.from,
            to: applied.to,
            promotion: applied.promotion,
            san: applied.san,
            fen_after: applied.fen,
            banned_from: applied.banned_move.as_ref().map(|ban| ban.from.clone()),
            banned_to: applied.banned_move.as_ref().map(|ban| ban.to.clone()),
            banned_by,
            time_taken_ms,
            created_at: game.updated_at,
        };
        debug!(game_id = %game.game_id, %color, san = %record.san, "Move played");

        Ok(MoveOutcome {
            record,
            clock: self.clock.snapshot(game),
        })
    }

    pub fn resign(&self, game: &mut Game, user_id: &str) -> Result<(), BanProtocolError> {
        let color = Self::active_player_color(game, user_id)?;
        self.clock.stop_all(game);
        game.finish(GameResult::win_for(color.opponent()), EndReason::Resignation);
        game.updated_at = self.clock.now();
        info!(game_id = %game.game_id, %color, "Resigned");
        Ok(())
    }

    pub fn offer_draw(&self, game: &mut Game, user_id: &str) -> Result<(), BanProtocolError> {
        let color = Self::active_player_color(game, user_id)?;
        if let Some(offered_by) = game.draw_offered_by {
            return Err(BanProtocolError::UnauthorizedAction(format!(
                "A draw offer by {} is already pending",
                offered_by
            )));
        }
        game.draw_offered_by = Some(color);
        game.updated_at = self.clock.now();
        Ok(())
    }

    fn pending_draw_offer_to(game: &Game, color: Color) -> Result<(), BanProtocolError> {
        if game.draw_offered_by == Some(color.opponent()) {
            Ok(())
        } else {
            Err(BanProtocolError::UnauthorizedAction(
                "No draw offer from your opponent".to_string(),
            ))
        }
    }

    pub fn accept_draw(&self, game: &mut Game, user_id: &str) -> Result<(), BanProtocolError> {
        let color = Self::active_player_color(game, user_id)?;
        Self::pending_draw_offer_to(game, color)?;
        self.clock.stop_all(game);
        game.finish(GameResult::Draw, EndReason::DrawAgreement);
        game.updated_at = self.clock.now();
        Ok(())
    }

    pub fn decline_draw(&self, game: &mut Game, user_id: &str) -> Result<(), BanProtocolError> {
        let color = Self::active_player_color(game, user_id)?;
        Self::pending_draw_offer_to(game, color)?;
        game.draw_offered_by = None;
        game.updated_at = self.clock.now();
        Ok(())
    }

    fn finished_player_color(game: &Game, user_id: &str) -> Result<Color, BanProtocolError> {
        let color = Self::player_color(game, user_id)?;
        if game.is_active() {
            return Err(BanProtocolError::UnauthorizedAction(
                "Rematch is only possible once the game is over".to_string(),
            ));
        }
        if game.rematch_game_id.is_some() {
            return Err(BanProtocolError::UnauthorizedAction(
                "Rematch already started".to_string(),
            ));
        }
        Ok(color)
    }

    pub fn offer_rematch(&self, game: &mut Game, user_id: &str) -> Result<(), BanProtocolError> {
        let color = Self::finished_player_color(game, user_id)?;
        if game.rematch_offered_by.is_some() {
            return Err(BanProtocolError::UnauthorizedAction(
                "A rematch offer is already pending".to_string(),
            ));
        }
        game.rematch_offered_by = Some(color);
        game.updated_at = self.clock.now();
        Ok(())
    }

    /// Accepts the opponent's rematch offer and returns the new game, with
    /// colors swapped and the same time control.
    pub fn accept_rematch(&self, game: &mut Game, user_id: &str) -> Result<Game, BanProtocolError> {
        let color = Self::finished_player_color(game, user_id)?;
        if game.rematch_offered_by != Some(color.opponent()) {
            return Err(BanProtocolError::UnauthorizedAction(
                "No rematch offer from your opponent".to_string(),
            ));
        }

        let now = self.clock.now();
        let rematch = Game::new(
            &game.black_player_id,
            &game.white_player_id,
            game.time_control,
            now,
        );
        game.rematch_offered_by = None;
        game.rematch_game_id = Some(rematch.game_id.clone());
        game.updated_at = now;
        Ok(rematch)
    }

    pub fn decline_rematch(&self, game: &mut Game, user_id: &str) -> Result<(), BanProtocolError> {
        let color = Self::finished_player_color(game, user_id)?;
        if game.rematch_offered_by != Some(color.opponent()) {
            return Err(BanProtocolError::UnauthorizedAction(
                "No rematch offer from your opponent".to_string(),
            ));
        }
        game.rematch_offered_by = None;
        game.updated_at = self.clock.now();
        Ok(())
    }

    pub fn check_time(&self, game: &mut Game) -> Option<Color> {
        let flagged = self.clock.check_time_violation(game);
        if flagged.is_some() {
            game.updated_at = self.clock.now();
        }
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::{GameStatus, TimeControl, STARTING_FEN};
    use crate::services::time_provider::ManualTimeProvider;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn setup() -> (BanProtocol, ManualTimeProvider, Game) {
        let time = ManualTimeProvider::new(START);
        let protocol = BanProtocol::new(
            ChessService::new(),
            ClockService::new(Arc::new(time.clone())),
        );
        let game = Game::new(
            "white",
            "black",
            TimeControl::new(60_000, 1_000),
            Utc.timestamp_millis_opt(START).unwrap(),
        );
        (protocol, time, game)
    }

    fn from_position(fen: &str) -> (BanProtocol, Game) {
        let (protocol, _, _) = setup();
        let game = Game::from_position(
            "white",
            "black",
            fen,
            TimeControl::new(60_000, 0),
            Utc.timestamp_millis_opt(START).unwrap(),
        );
        (protocol, game)
    }

    fn ban(uci: &str) -> BannedMove {
        BannedMove::from_uci(uci).unwrap()
    }

    #[test]
    fn test_opening_sequence() {
        let (protocol, time, mut game) = setup();
        assert_eq!(game.phase(), GamePhase::AwaitingBan(Color::Black));

        time.advance(2_000);
        let outcome = protocol.ban(&mut game, "black", &ban("e2e4")).unwrap();
        assert_eq!(game.phase(), GamePhase::AwaitingMove(Color::White));
        assert_eq!(game.current_banned_move, Some(ban("e2e4")));
        assert_eq!(outcome.record.ply, 1);
        assert_eq!(outcome.record.color, Color::Black);
        assert_eq!(outcome.clock.active_color, Some(Color::White));
        assert_eq!(game.black_time_remaining, 58_000);

        time.advance(3_000);
        let outcome = protocol
            .make_move(&mut game, "white", "d2", "d4", None)
            .unwrap();
        assert_eq!(game.phase(), GamePhase::AwaitingBan(Color::White));
        assert_eq!(game.turn, Color::Black);
        assert_eq!(game.ply, 1);
        assert_eq!(game.current_banned_move, None);
        assert_eq!(outcome.record.san, "d4");
        assert_eq!(outcome.record.time_taken_ms, 3_000);
        assert_eq!(outcome.record.banned_move(), Some(ban("e2e4")));
        assert_eq!(outcome.record.banned_by, Some(Color::Black));
        // white keeps the clock while choosing the ban
        assert_eq!(game.running_clock(), Some(Color::White));

        time.advance(1_000);
        let outcome = protocol.ban(&mut game, "white", &ban("d7d5")).unwrap();
        assert!(outcome.clock.increment_applied);
        assert_eq!(game.white_time_remaining, 60_000 - 4_000 + 1_000);
        assert_eq!(game.phase(), GamePhase::AwaitingMove(Color::Black));
        assert_eq!(game.pgn, "{banning: e2e4} 1. d4 {banning: d7d5}");
    }

    #[test]
    fn test_banner_never_moves_next() {
        let (protocol, _, mut game) = setup();
        protocol.ban(&mut game, "black", &ban("e2e4")).unwrap();

        let result = protocol.make_move(&mut game, "black", "e7", "e5", None);
        assert!(matches!(result, Err(BanProtocolError::UnauthorizedAction(_))));

        let result = protocol.ban(&mut game, "white", &ban("e7e5"));
        assert!(matches!(result, Err(BanProtocolError::UnauthorizedAction(_))));
    }

    #[test]
    fn test_move_before_ban_is_rejected() {
        let (protocol, _, mut game) = setup();

        let result = protocol.make_move(&mut game, "white", "e2", "e4", None);

        assert!(matches!(result, Err(BanProtocolError::UnauthorizedAction(_))));
        assert_eq!(game.ply, 0);
    }

    #[test]
    fn test_banned_move_is_invalid() {
        let (protocol, _, mut game) = setup();
        protocol.ban(&mut game, "black", &ban("e2e4")).unwrap();

        let result = protocol.make_move(&mut game, "white", "e2", "e4", None);

        assert!(matches!(result, Err(BanProtocolError::InvalidMove(_))));
        assert_eq!(game.current_fen, STARTING_FEN);
    }

    #[test]
    fn test_invalid_ban_target() {
        let (protocol, _, mut game) = setup();

        let result = protocol.ban(&mut game, "black", &ban("e7e5"));

        assert!(matches!(result, Err(BanProtocolError::InvalidBan(_))));
        assert_eq!(game.phase(), GamePhase::AwaitingBan(Color::Black));
    }

    #[test]
    fn test_spectator_is_unauthorized() {
        let (protocol, _, mut game) = setup();

        let result = protocol.ban(&mut game, "someone", &ban("e2e4"));

        assert!(matches!(result, Err(BanProtocolError::UnauthorizedAction(_))));
    }

    #[test]
    fn test_ban_of_only_move_ends_game_immediately() {
        let (protocol, mut game) = from_position("k6R/2K5/8/8/8/8/8/8 b - - 0 1");

        let outcome = protocol.ban(&mut game, "white", &ban("a8a7")).unwrap();

        assert_eq!(game.phase(), GamePhase::Finished);
        assert_eq!(game.result, Some(GameResult::White));
        assert_eq!(game.end_reason, Some(EndReason::Checkmate));
        assert_eq!(game.running_clock(), None);
        assert_eq!(outcome.clock.active_color, None);
        assert!(game.pgn.contains("{banning: a8a7} 1-0"));
    }

    #[test]
    fn test_ban_of_only_quiet_move_is_stalemate() {
        let (protocol, mut game) = from_position("k7/2K5/8/8/8/8/7P/8 b - - 0 1");

        protocol.ban(&mut game, "white", &ban("a8a7")).unwrap();

        assert_eq!(game.result, Some(GameResult::Draw));
        assert_eq!(game.end_reason, Some(EndReason::Stalemate));
    }

    #[test]
    fn test_finished_game_rejects_everything() {
        let (protocol, _, mut game) = setup();
        protocol.resign(&mut game, "white").unwrap();
        assert_eq!(game.result, Some(GameResult::Black));
        assert_eq!(game.end_reason, Some(EndReason::Resignation));
        let snapshot = game.clone();

        for _ in 0..3 {
            let ban_result = protocol.ban(&mut game, "black", &ban("e2e4"));
            assert!(matches!(ban_result, Err(BanProtocolError::UnauthorizedAction(_))));
            let move_result = protocol.make_move(&mut game, "white", "e2", "e4", None);
            assert!(matches!(move_result, Err(BanProtocolError::UnauthorizedAction(_))));
        }
        assert_eq!(game, snapshot);
    }

    #[test]
    fn test_draw_offer_flow() {
        let (protocol, _, mut game) = setup();
        protocol.offer_draw(&mut game, "white").unwrap();
        assert_eq!(game.draw_offered_by, Some(Color::White));

        let own = protocol.accept_draw(&mut game, "white");
        assert!(matches!(own, Err(BanProtocolError::UnauthorizedAction(_))));

        protocol.decline_draw(&mut game, "black").unwrap();
        assert_eq!(game.draw_offered_by, None);

        protocol.offer_draw(&mut game, "black").unwrap();
        protocol.accept_draw(&mut game, "white").unwrap();
        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.result, Some(GameResult::Draw));
        assert_eq!(game.end_reason, Some(EndReason::DrawAgreement));
        assert_eq!(game.running_clock(), None);
    }

    #[test]
    fn test_move_declines_pending_draw_offer() {
        let (protocol, _, mut game) = setup();
        protocol.offer_draw(&mut game, "black").unwrap();
        protocol.ban(&mut game, "black", &ban("e2e4")).unwrap();

        protocol
            .make_move(&mut game, "white", "d2", "d4", None)
            .unwrap();

        assert_eq!(game.draw_offered_by, None);
    }

    #[test]
    fn test_rematch_flow() {
        let (protocol, _, mut game) = setup();
        let early = protocol.offer_rematch(&mut game, "white");
        assert!(matches!(early, Err(BanProtocolError::UnauthorizedAction(_))));

        protocol.resign(&mut game, "black").unwrap();
        protocol.offer_rematch(&mut game, "black").unwrap();
        let rematch = protocol.accept_rematch(&mut game, "white").unwrap();

        assert_eq!(rematch.white_player_id, "black");
        assert_eq!(rematch.black_player_id, "white");
        assert_eq!(rematch.time_control, game.time_control);
        assert_eq!(game.rematch_game_id, Some(rematch.game_id.clone()));

        let again = protocol.offer_rematch(&mut game, "black");
        assert!(matches!(again, Err(BanProtocolError::UnauthorizedAction(_))));
    }

    #[test]
    fn test_decline_rematch() {
        let (protocol, _, mut game) = setup();
        protocol.resign(&mut game, "black").unwrap();
        protocol.offer_rematch(&mut game, "white").unwrap();

        protocol.decline_rematch(&mut game, "black").unwrap();

        assert_eq!(game.rematch_offered_by, None);
        assert_eq!(game.rematch_game_id, None);
    }

    #[test]
    fn test_check_time_flags_banning_player() {
        let (protocol, time, mut game) = setup();
        time.advance(60_001);

        assert_eq!(protocol.check_time(&mut game), Some(Color::Black));
        assert_eq!(game.result, Some(GameResult::White));
        assert_eq!(game.end_reason, Some(EndReason::Timeout));
    }
}
