use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::game::Game;
use crate::models::move_record::{BanRecord, MoveRecord};
use crate::repositories::errors::game_repository_errors::GameRepositoryError;
use crate::repositories::game_repository::{GameCommit, GameRepository};

#[derive(Default)]
struct Store {
    games: HashMap<String, Game>,
    moves: HashMap<String, Vec<MoveRecord>>,
    bans: HashMap<String, Vec<BanRecord>>,
}

/// Process-local repository with the same conditional-write semantics as the
/// DynamoDB one. Used by local play and tests.
#[derive(Default)]
pub struct InMemoryGameRepository {
    store: RwLock<Store>,
}

impl InMemoryGameRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameRepository for InMemoryGameRepository {
    async fn create_game(&self, game: &Game) -> Result<(), GameRepositoryError> {
        let mut store = self.store.write().await;
        if store.games.contains_key(&game.game_id) {
            return Err(GameRepositoryError::ConditionFailed(format!(
                "game {} already exists",
                game.game_id
            )));
        }
        store.games.insert(game.game_id.clone(), game.clone());
        Ok(())
    }

    async fn get_game(&self, game_id: &str) -> Result<Option<Game>, GameRepositoryError> {
        Ok(self.store.read().await.games.get(game_id).cloned())
    }

    async fn commit(&self, commit: GameCommit) -> Result<Game, GameRepositoryError> {
        let mut store = self.store.write().await;

        let stored_version = store
            .games
            .get(&commit.game.game_id)
            .map(|game| game.version)
            .ok_or_else(|| GameRepositoryError::NotFound(commit.game.game_id.clone()))?;
        if stored_version != commit.expected_version {
            return Err(GameRepositoryError::ConditionFailed(format!(
                "game {} is at version {}, expected {}",
                commit.game.game_id, stored_version, commit.expected_version
            )));
        }
        if let Some(created) = &commit.created_game {
            if store.games.contains_key(&created.game_id) {
                return Err(GameRepositoryError::ConditionFailed(format!(
                    "game {} already exists",
                    created.game_id
                )));
            }
        }

        let mut game = commit.game;
        game.version = commit.expected_version + 1;
        let game_id = game.game_id.clone();

        if let Some(record) = commit.move_record {
            store.moves.entry(game_id.clone()).or_default().push(record);
        }
        if let Some(record) = commit.ban_record {
            store.bans.entry(game_id.clone()).or_default().push(record);
        }
        if let Some(created) = commit.created_game {
            store.games.insert(created.game_id.clone(), created);
        }
        store.games.insert(game_id, game.clone());

        Ok(game)
    }

    async fn get_moves(&self, game_id: &str) -> Result<Vec<MoveRecord>, GameRepositoryError> {
        let mut moves = self
            .store
            .read()
            .await
            .moves
            .get(game_id)
            .cloned()
            .unwrap_or_default();
        moves.sort_by_key(|record| record.ply);
        Ok(moves)
    }

    async fn get_bans(&self, game_id: &str) -> Result<Vec<BanRecord>, GameRepositoryError> {
        let mut bans = self
            .store
            .read()
            .await
            .bans
            .get(game_id)
            .cloned()
            .unwrap_or_default();
        bans.sort_by_key(|record| record.ply);
        Ok(bans)
    }
}
