use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    models::{
        actions::LegalMoveMap,
        events::{ClockSnapshot, GameEvent},
        game::{Game, GamePhase, TimeControl},
        move_record::{BanRecord, MoveRecord},
        move_request::{BanRequest, MoveRequest},
    },
    repositories::game_repository::{GameCommit, GameRepository},
    services::{
        ban_protocol::BanProtocol,
        broadcaster::GameBroadcaster,
        chess_service::Position,
        errors::{ban_protocol_errors::BanProtocolError, game_service_errors::GameServiceError},
    },
};

/// Entry point for every game operation. Each call reads the latest record,
/// applies one validated change and writes it back conditioned on the version
/// it read, so concurrent writers cannot interleave.
#[derive(Clone)]
pub struct GameService {
    repository: Arc<dyn GameRepository>,
    broadcaster: Arc<dyn GameBroadcaster>,
    protocol: BanProtocol,
    default_time_control: TimeControl,
}

impl GameService {
    pub fn new(
        repository: Arc<dyn GameRepository>,
        broadcaster: Arc<dyn GameBroadcaster>,
        protocol: BanProtocol,
        default_time_control: TimeControl,
    ) -> Self {
        GameService {
            repository,
            broadcaster,
            protocol,
            default_time_control,
        }
    }

    fn validate_players(white: &str, black: &str) -> Result<(), GameServiceError> {
        if white.is_empty() || black.is_empty() {
            return Err(GameServiceError::ValidationError(
                "Player ids cannot be empty".to_string(),
            ));
        }
        if white == black {
            return Err(GameServiceError::ValidationError(
                "A player cannot play against themselves".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates a game from the standard start. Black owes the first ban.
    pub async fn create_game(
        &self,
        white_player_id: &str,
        black_player_id: &str,
        time_control: Option<TimeControl>,
    ) -> Result<Game, GameServiceError> {
        Self::validate_players(white_player_id, black_player_id)?;
        let game = Game::new(
            white_player_id,
            black_player_id,
            time_control.unwrap_or(self.default_time_control),
            self.protocol.clock().now(),
        );
        self.repository.create_game(&game).await?;
        info!(
            "Created game {} ({} vs {})",
            game.game_id, white_player_id, black_player_id
        );
        Ok(game)
    }

    pub async fn create_game_from_position(
        &self,
        white_player_id: &str,
        black_player_id: &str,
        fen: &str,
        time_control: Option<TimeControl>,
    ) -> Result<Game, GameServiceError> {
        Self::validate_players(white_player_id, black_player_id)?;
        Position::from_fen(fen).map_err(|e| GameServiceError::ValidationError(e.to_string()))?;

        let game = Game::from_position(
            white_player_id,
            black_player_id,
            fen,
            time_control.unwrap_or(self.default_time_control),
            self.protocol.clock().now(),
        );
        self.repository.create_game(&game).await?;
        info!("Created game {} from position {}", game.game_id, game.current_fen);
        Ok(game)
    }

    /// Pairing contract for matchmaking: colors are assigned at random.
    pub async fn create_game_for_pair(
        &self,
        player_1: &str,
        player_2: &str,
        time_control: Option<TimeControl>,
    ) -> Result<Game, GameServiceError> {
        let (white, black) = if rand::random::<bool>() {
            (player_1, player_2)
        } else {
            (player_2, player_1)
        };
        self.create_game(white, black, time_control).await
    }

    async fn load(&self, game_id: &str) -> Result<Game, GameServiceError> {
        self.repository
            .get_game(game_id)
            .await?
            .ok_or_else(|| GameServiceError::NotFound(game_id.to_string()))
    }

    async fn commit(&self, commit: GameCommit) -> Result<Game, GameServiceError> {
        let game_id = commit.game.game_id.clone();
        self.repository.commit(commit).await.map_err(|e| {
            let err = GameServiceError::from(e);
            if let GameServiceError::Conflict(_) = err {
                warn!("Lost write race on game {}", game_id);
            }
            err
        })
    }

    async fn publish(&self, event: GameEvent) {
        if let Err(e) = self.broadcaster.publish(&event).await {
            warn!(
                "Failed to publish {} event for game {}: {}",
                event.kind(),
                event.game_id(),
                e
            );
        }
    }

    async fn publish_update(&self, game: &Game) {
        let clock = self.protocol.clock().snapshot(game);
        self.publish(GameEvent::GameUpdate {
            game: game.clone(),
            clock,
        })
        .await;
    }

    /// Flags an expired clock and repairs inconsistent start times, persisting
    /// the result. A lost race returns whatever the winner stored.
    async fn settle_clock(&self, game: Game) -> Result<Game, GameServiceError> {
        let mut settled = game.clone();
        let flagged = self.protocol.check_time(&mut settled);
        if settled == game {
            return Ok(game);
        }

        match self.commit(GameCommit::new(settled)).await {
            Ok(committed) => {
                if let Some(color) = flagged {
                    info!("Game {} ended on time, {} flagged", committed.game_id, color);
                    self.publish_update(&committed).await;
                }
                Ok(committed)
            }
            Err(GameServiceError::Conflict(_)) => self.load(&game.game_id).await,
            Err(e) => Err(e),
        }
    }

    async fn load_for_action(&self, game_id: &str) -> Result<Game, GameServiceError> {
        let game = self.load(game_id).await?;
        self.settle_clock(game).await
    }

    /// Applies a change that produces no history row and broadcasts the new
    /// state.
    async fn update<F>(&self, game_id: &str, action: &str, apply: F) -> Result<Game, GameServiceError>
    where
        F: FnOnce(&BanProtocol, &mut Game) -> Result<(), BanProtocolError> + Send,
    {
        let mut game = self.load_for_action(game_id).await?;
        apply(&self.protocol, &mut game)?;
        let game = self.commit(GameCommit::new(game)).await?;
        info!("Applied {} to game {}", action, game_id);
        self.publish_update(&game).await;
        Ok(game)
    }

    /// Latest state of a game, with an expired clock flagged on the way.
    pub async fn get_game(&self, game_id: &str) -> Result<Game, GameServiceError> {
        self.load_for_action(game_id).await
    }

    pub async fn get_moves(&self, game_id: &str) -> Result<Vec<MoveRecord>, GameServiceError> {
        self.load(game_id).await?;
        Ok(self.repository.get_moves(game_id).await?)
    }

    pub async fn get_bans(&self, game_id: &str) -> Result<Vec<BanRecord>, GameServiceError> {
        self.load(game_id).await?;
        Ok(self.repository.get_bans(game_id).await?)
    }

    /// Moves the player can act on right now: their own legal moves when they
    /// are to move, or the opponent's candidates when they owe a ban.
    pub async fn get_legal_moves(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<LegalMoveMap, GameServiceError> {
        let game = self.get_game(game_id).await?;
        let color = game.color_of(user_id).ok_or_else(|| {
            GameServiceError::UnauthorizedAction(format!("{} is not a player", user_id))
        })?;

        let chess = self.protocol.chess();
        match game.phase() {
            GamePhase::AwaitingMove(mover) if mover == color => {
                Ok(chess.legal_moves(&game.current_fen, &game.pgn, color)?)
            }
            GamePhase::AwaitingBan(banner) if banner == color => {
                Ok(chess.legal_moves(&game.current_fen, &game.pgn, color.opponent())?)
            }
            _ => Ok(LegalMoveMap::new()),
        }
    }

    pub async fn make_move(
        &self,
        user_id: &str,
        request: &MoveRequest,
    ) -> Result<(Game, MoveRecord), GameServiceError> {
        let mut game = self.load_for_action(&request.game_id).await?;
        let outcome = self.protocol.make_move(
            &mut game,
            user_id,
            &request.from_square,
            &request.to_square,
            request.promotion_piece.as_deref(),
        )?;

        let game = self
            .commit(GameCommit::new(game).with_move(outcome.record.clone()))
            .await?;
        info!(
            "Game {}: {} played {}",
            game.game_id, outcome.record.color, outcome.record.san
        );

        self.publish(GameEvent::Move {
            game: game.clone(),
            record: outcome.record.clone(),
            clock: outcome.clock,
        })
        .await;
        Ok((game, outcome.record))
    }

    pub async fn ban_move(
        &self,
        user_id: &str,
        request: &BanRequest,
    ) -> Result<(Game, BanRecord), GameServiceError> {
        let mut game = self.load_for_action(&request.game_id).await?;
        let outcome = self
            .protocol
            .ban(&mut game, user_id, &request.banned_move())?;

        let game = self
            .commit(GameCommit::new(game).with_ban(outcome.record.clone()))
            .await?;
        info!(
            "Game {}: {} banned {}",
            game.game_id,
            outcome.record.color,
            outcome.record.banned_move()
        );

        self.publish(GameEvent::Ban {
            game: game.clone(),
            record: outcome.record.clone(),
            clock: outcome.clock,
        })
        .await;
        Ok((game, outcome.record))
    }

    pub async fn resign(&self, game_id: &str, user_id: &str) -> Result<Game, GameServiceError> {
        self.update(game_id, "resign", |protocol, game| {
            protocol.resign(game, user_id)
        })
        .await
    }

    pub async fn offer_draw(&self, game_id: &str, user_id: &str) -> Result<Game, GameServiceError> {
        self.update(game_id, "offer_draw", |protocol, game| {
            protocol.offer_draw(game, user_id)
        })
        .await
    }

    pub async fn accept_draw(&self, game_id: &str, user_id: &str) -> Result<Game, GameServiceError> {
        self.update(game_id, "accept_draw", |protocol, game| {
            protocol.accept_draw(game, user_id)
        })
        .await
    }

    pub async fn decline_draw(&self, game_id: &str, user_id: &str) -> Result<Game, GameServiceError> {
        self.update(game_id, "decline_draw", |protocol, game| {
            protocol.decline_draw(game, user_id)
        })
        .await
    }

    pub async fn offer_rematch(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<Game, GameServiceError> {
        self.update(game_id, "offer_rematch", |protocol, game| {
            protocol.offer_rematch(game, user_id)
        })
        .await
    }

    pub async fn decline_rematch(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<Game, GameServiceError> {
        self.update(game_id, "decline_rematch", |protocol, game| {
            protocol.decline_rematch(game, user_id)
        })
        .await
    }

    /// Returns the finished game, now pointing at its rematch, and the new game.
    pub async fn accept_rematch(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<(Game, Game), GameServiceError> {
        let mut game = self.load(game_id).await?;
        let rematch = self.protocol.accept_rematch(&mut game, user_id)?;

        let game = self
            .commit(GameCommit::new(game).with_created_game(rematch.clone()))
            .await?;
        info!("Game {} rematched as {}", game.game_id, rematch.game_id);
        self.publish_update(&game).await;
        Ok((game, rematch))
    }

    /// Explicit flag check, for clients whose predicted clock hit zero.
    pub async fn check_time(&self, game_id: &str) -> Result<Game, GameServiceError> {
        let game = self.get_game(game_id).await?;
        debug!(
            "Checked time for game {}: {:?}",
            game_id,
            ClockSnapshot::from_game(&game, self.protocol.clock().now_millis())
        );
        Ok(game)
    }
}
