use async_trait::async_trait;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::models::game::Game;
use crate::models::move_record::{BanRecord, MoveRecord};
use crate::repositories::errors::game_repository_errors::GameRepositoryError;

type Item = HashMap<String, AttributeValue>;

const MOVE_PREFIX: &str = "move#";
const BAN_PREFIX: &str = "ban#";

/// One atomic write: the updated game plus the history rows it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GameCommit {
    pub game: Game,
    /// Version the update was computed from; the write fails if the stored
    /// record has moved on.
    pub expected_version: u64,
    pub move_record: Option<MoveRecord>,
    pub ban_record: Option<BanRecord>,
    /// A follow-up game created in the same write (rematch).
    pub created_game: Option<Game>,
}

impl GameCommit {
    pub fn new(game: Game) -> Self {
        GameCommit {
            expected_version: game.version,
            game,
            move_record: None,
            ban_record: None,
            created_game: None,
        }
    }

    pub fn with_move(mut self, record: MoveRecord) -> Self {
        self.move_record = Some(record);
        self
    }

    pub fn with_ban(mut self, record: BanRecord) -> Self {
        self.ban_record = Some(record);
        self
    }

    pub fn with_created_game(mut self, game: Game) -> Self {
        self.created_game = Some(game);
        self
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait GameRepository: Send + Sync {
    async fn create_game(&self, game: &Game) -> Result<(), GameRepositoryError>;

    async fn get_game(&self, game_id: &str) -> Result<Option<Game>, GameRepositoryError>;

    /// Writes the commit if the stored version still equals
    /// `expected_version`, and returns the stored game with its new version.
    async fn commit(&self, commit: GameCommit) -> Result<Game, GameRepositoryError>;

    /// Moves of a game ordered by ply.
    async fn get_moves(&self, game_id: &str) -> Result<Vec<MoveRecord>, GameRepositoryError>;

    async fn get_bans(&self, game_id: &str) -> Result<Vec<BanRecord>, GameRepositoryError>;
}

pub struct DynamoDbGameRepository {
    pub client: Client,
    pub games_table: String,
    pub moves_table: String,
}

impl DynamoDbGameRepository {
    pub fn new(client: Client, games_table: &str, moves_table: &str) -> Self {
        Self {
            client,
            games_table: games_table.to_string(),
            moves_table: moves_table.to_string(),
        }
    }

    fn record_item<T: Serialize>(record: &T, record_key: String) -> Result<Item, GameRepositoryError> {
        let mut item: Item = serde_dynamo::to_item(record)
            .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
        item.insert("record_key".to_string(), AttributeValue::S(record_key));
        Ok(item)
    }

    fn put_item(
        table: &str,
        item: Item,
        condition: &str,
        expected_version: Option<u64>,
    ) -> Result<TransactWriteItem, GameRepositoryError> {
        let mut put = Put::builder()
            .table_name(table)
            .set_item(Some(item))
            .condition_expression(condition);
        if let Some(version) = expected_version {
            put = put.expression_attribute_values(":expected", AttributeValue::N(version.to_string()));
        }
        let put = put
            .build()
            .map_err(|e| GameRepositoryError::DynamoDb(format!("Failed to build put: {:?}", e)))?;

        Ok(TransactWriteItem::builder().put(put).build())
    }

    async fn query_records<T: DeserializeOwned>(
        &self,
        game_id: &str,
        prefix: &str,
    ) -> Result<Vec<T>, GameRepositoryError> {
        let mut records = Vec::new();
        let mut start_key = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.moves_table)
                .key_condition_expression("game_id = :game_id AND begins_with(record_key, :prefix)")
                .expression_attribute_values(":game_id", AttributeValue::S(game_id.to_string()))
                .expression_attribute_values(":prefix", AttributeValue::S(prefix.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| GameRepositoryError::DynamoDb(e.to_string()))?;

            for item in output.items.unwrap_or_default() {
                let record: T = serde_dynamo::from_item(item)
                    .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
                records.push(record);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(records)
    }
}

/// Sort key of a history row; zero padded so rows sort by ply.
fn record_key(prefix: &str, ply: u32) -> String {
    format!("{}{:05}", prefix, ply)
}

#[async_trait]
impl GameRepository for DynamoDbGameRepository {
    async fn create_game(&self, game: &Game) -> Result<(), GameRepositoryError> {
        let item: Item = serde_dynamo::to_item(game)
            .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.games_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(game_id)")
            .send()
            .await
            .map_err(|e| GameRepositoryError::DynamoDb(e.to_string()))?;

        debug!("Created game {}", game.game_id);
        Ok(())
    }

    async fn get_game(&self, game_id: &str) -> Result<Option<Game>, GameRepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.games_table)
            .key("game_id", AttributeValue::S(game_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| GameRepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.item {
            let game: Game = serde_dynamo::from_item(item)
                .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
            Ok(Some(game))
        } else {
            Ok(None)
        }
    }

    async fn commit(&self, commit: GameCommit) -> Result<Game, GameRepositoryError> {
        let mut game = commit.game;
        game.version = commit.expected_version + 1;

        let game_item: Item = serde_dynamo::to_item(&game)
            .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
        let mut transact_items = vec![Self::put_item(
            &self.games_table,
            game_item,
            "version = :expected",
            Some(commit.expected_version),
        )?];

        if let Some(record) = &commit.move_record {
            let item = Self::record_item(record, record_key(MOVE_PREFIX, record.ply))?;
            transact_items.push(Self::put_item(
                &self.moves_table,
                item,
                "attribute_not_exists(record_key)",
                None,
            )?);
        }
        if let Some(record) = &commit.ban_record {
            let item = Self::record_item(record, record_key(BAN_PREFIX, record.ply))?;
            transact_items.push(Self::put_item(
                &self.moves_table,
                item,
                "attribute_not_exists(record_key)",
                None,
            )?);
        }
        if let Some(created) = &commit.created_game {
            let item: Item = serde_dynamo::to_item(created)
                .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
            transact_items.push(Self::put_item(
                &self.games_table,
                item,
                "attribute_not_exists(game_id)",
                None,
            )?);
        }

        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
        {
            Ok(_) => {
                debug!("Committed game {} at version {}", game.game_id, game.version);
                Ok(game)
            }
            Err(e) => {
                if let Some(TransactWriteItemsError::TransactionCanceledException(_)) =
                    e.as_service_error()
                {
                    warn!(
                        "Transaction cancelled for game {} at version {}",
                        game.game_id, commit.expected_version
                    );
                    return Err(GameRepositoryError::ConditionFailed(format!(
                        "game {} changed since version {}",
                        game.game_id, commit.expected_version
                    )));
                }
                Err(GameRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn get_moves(&self, game_id: &str) -> Result<Vec<MoveRecord>, GameRepositoryError> {
        self.query_records(game_id, MOVE_PREFIX).await
    }

    async fn get_bans(&self, game_id: &str) -> Result<Vec<BanRecord>, GameRepositoryError> {
        self.query_records(game_id, BAN_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::TimeControl;
    use chrono::Utc;

    #[test]
    fn test_record_keys_sort_by_ply() {
        let mut keys = vec![
            record_key(MOVE_PREFIX, 10),
            record_key(MOVE_PREFIX, 2),
            record_key(MOVE_PREFIX, 1),
        ];
        keys.sort();

        assert_eq!(keys, vec!["move#00001", "move#00002", "move#00010"]);
    }

    #[test]
    fn test_commit_builder_expects_current_version() {
        let mut game = Game::new("w", "b", TimeControl::default(), Utc::now());
        game.version = 7;

        let commit = GameCommit::new(game.clone());

        assert_eq!(commit.expected_version, 7);
        assert_eq!(commit.move_record, None);
        assert_eq!(commit.created_game, None);
    }

    #[test]
    fn test_record_item_carries_sort_key() {
        let record = BanRecord {
            game_id: "g".to_string(),
            ply: 3,
            move_number: 2,
            color: crate::models::game::Color::White,
            from: "e7".to_string(),
            to: "e5".to_string(),
            created_at: Utc::now(),
        };

        let item =
            DynamoDbGameRepository::record_item(&record, record_key(BAN_PREFIX, record.ply))
                .unwrap();

        assert_eq!(
            item.get("record_key"),
            Some(&AttributeValue::S("ban#00003".to_string()))
        );
        assert_eq!(item.get("game_id"), Some(&AttributeValue::S("g".to_string())));
    }
}
