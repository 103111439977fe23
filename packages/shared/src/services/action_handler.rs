use std::sync::Arc;
use tracing::{info, warn};

use crate::models::actions::{ActionResult, ClientAction, ClientRequest};
use crate::models::move_request::{BanRequest, MoveRequest};
use crate::services::errors::game_service_errors::GameServiceError;
use crate::services::game_service::GameService;

/// Maps client requests onto game operations. Transport concerns such as
/// topic subscription are left to the caller; `subscribe` here only returns
/// the snapshot the subscriber starts from.
#[derive(Clone)]
pub struct ActionHandler {
    game_service: Arc<GameService>,
}

impl ActionHandler {
    pub fn new(game_service: Arc<GameService>) -> Self {
        Self { game_service }
    }

    pub fn game_service(&self) -> &GameService {
        &self.game_service
    }

    pub async fn handle(&self, user_id: &str, request: ClientRequest) -> ActionResult {
        let action = request.action.name();
        info!(
            "Handling {} from {} for game {}",
            action, user_id, request.game_id
        );

        match self.dispatch(user_id, request).await {
            Ok(result) => result,
            Err(e) => {
                warn!("{} by {} rejected: {}", action, user_id, e);
                ActionResult::error(e.category(), e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        user_id: &str,
        request: ClientRequest,
    ) -> Result<ActionResult, GameServiceError> {
        let service = &self.game_service;
        let game_id = request.game_id.as_str();

        let result = match request.action {
            ClientAction::Subscribe | ClientAction::GetGame | ClientAction::CheckTime => {
                ActionResult::Game {
                    game: service.get_game(game_id).await?,
                }
            }
            ClientAction::Unsubscribe => ActionResult::Ack,
            ClientAction::GetMoves => ActionResult::Moves {
                moves: service.get_moves(game_id).await?,
            },
            ClientAction::GetLegalMoves => ActionResult::LegalMoves {
                moves: service.get_legal_moves(game_id, user_id).await?,
            },
            ClientAction::MakeMove {
                from,
                to,
                promotion,
            } => {
                let request = MoveRequest {
                    game_id: request.game_id.clone(),
                    from_square: from,
                    to_square: to,
                    promotion_piece: promotion,
                };
                let (game, record) = service.make_move(user_id, &request).await?;
                ActionResult::Moved { game, record }
            }
            ClientAction::BanMove { from, to } => {
                let request = BanRequest::new(request.game_id.clone(), from, to);
                let (game, record) = service.ban_move(user_id, &request).await?;
                ActionResult::Banned { game, record }
            }
            ClientAction::Resign => ActionResult::Game {
                game: service.resign(game_id, user_id).await?,
            },
            ClientAction::OfferDraw => ActionResult::Game {
                game: service.offer_draw(game_id, user_id).await?,
            },
            ClientAction::AcceptDraw => ActionResult::Game {
                game: service.accept_draw(game_id, user_id).await?,
            },
            ClientAction::DeclineDraw => ActionResult::Game {
                game: service.decline_draw(game_id, user_id).await?,
            },
            ClientAction::OfferRematch => ActionResult::Game {
                game: service.offer_rematch(game_id, user_id).await?,
            },
            ClientAction::AcceptRematch => {
                let (_, rematch) = service.accept_rematch(game_id, user_id).await?;
                ActionResult::Game { game: rematch }
            }
            ClientAction::DeclineRematch => ActionResult::Game {
                game: service.decline_rematch(game_id, user_id).await?,
            },
        };
        Ok(result)
    }
}
