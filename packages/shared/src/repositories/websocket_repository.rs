use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::operation::post_to_connection::PostToConnectionError;
use aws_sdk_apigatewaymanagement::{primitives::Blob, Client as ApiGatewayClient};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::models::connection::Connection;
use crate::repositories::errors::websocket_repository_errors::WebSocketRepositoryError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebSocketRepository: Send + Sync {
    async fn store_connection(&self, connection: &Connection)
        -> Result<(), WebSocketRepositoryError>;

    async fn remove_connection(&self, connection_id: &str) -> Result<(), WebSocketRepositoryError>;

    async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<Connection>, WebSocketRepositoryError>;

    /// Points the connection at a game topic, replacing any previous one.
    async fn subscribe(
        &self,
        connection_id: &str,
        game_id: &str,
    ) -> Result<(), WebSocketRepositoryError>;

    async fn unsubscribe(&self, connection_id: &str) -> Result<(), WebSocketRepositoryError>;

    async fn connections_for_game(
        &self,
        game_id: &str,
    ) -> Result<Vec<String>, WebSocketRepositoryError>;

    async fn send_message(
        &self,
        connection_id: &str,
        message: &str,
    ) -> Result<(), WebSocketRepositoryError>;
}

pub struct DynamoDbWebSocketRepository {
    dynamodb_client: DynamoDbClient,
    api_gateway_client: ApiGatewayClient,
    table_name: String,
}

impl DynamoDbWebSocketRepository {
    /// `api_gateway_client` must already point at the stage's management
    /// endpoint.
    pub fn new(
        dynamodb_client: DynamoDbClient,
        api_gateway_client: ApiGatewayClient,
        table_name: &str,
    ) -> Self {
        Self {
            dynamodb_client,
            api_gateway_client,
            table_name: table_name.to_string(),
        }
    }
}

#[async_trait]
impl WebSocketRepository for DynamoDbWebSocketRepository {
    async fn store_connection(
        &self,
        connection: &Connection,
    ) -> Result<(), WebSocketRepositoryError> {
        let item: std::collections::HashMap<String, AttributeValue> =
            serde_dynamo::to_item(connection)
                .map_err(|e| WebSocketRepositoryError::Serialization(e.to_string()))?;

        self.dynamodb_client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| WebSocketRepositoryError::DynamoDb(e.to_string()))?;

        info!(
            "Stored WebSocket connection {} for player: {}",
            connection.connection_id, connection.player_id
        );
        Ok(())
    }

    async fn remove_connection(&self, connection_id: &str) -> Result<(), WebSocketRepositoryError> {
        self.dynamodb_client
            .delete_item()
            .table_name(&self.table_name)
            .key("connection_id", AttributeValue::S(connection_id.to_string()))
            .send()
            .await
            .map_err(|e| WebSocketRepositoryError::DynamoDb(e.to_string()))?;

        info!("Removed WebSocket connection: {}", connection_id);
        Ok(())
    }

    async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<Connection>, WebSocketRepositoryError> {
        let result = self
            .dynamodb_client
            .get_item()
            .table_name(&self.table_name)
            .key("connection_id", AttributeValue::S(connection_id.to_string()))
            .send()
            .await
            .map_err(|e| WebSocketRepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => serde_dynamo::from_item(item)
                .map(Some)
                .map_err(|e| WebSocketRepositoryError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn subscribe(
        &self,
        connection_id: &str,
        game_id: &str,
    ) -> Result<(), WebSocketRepositoryError> {
        self.dynamodb_client
            .update_item()
            .table_name(&self.table_name)
            .key("connection_id", AttributeValue::S(connection_id.to_string()))
            .update_expression("SET game_id = :game_id")
            .condition_expression("attribute_exists(connection_id)")
            .expression_attribute_values(":game_id", AttributeValue::S(game_id.to_string()))
            .send()
            .await
            .map_err(|e| WebSocketRepositoryError::DynamoDb(e.to_string()))?;

        info!("Connection {} subscribed to game {}", connection_id, game_id);
        Ok(())
    }

    async fn unsubscribe(&self, connection_id: &str) -> Result<(), WebSocketRepositoryError> {
        self.dynamodb_client
            .update_item()
            .table_name(&self.table_name)
            .key("connection_id", AttributeValue::S(connection_id.to_string()))
            .update_expression("REMOVE game_id")
            .condition_expression("attribute_exists(connection_id)")
            .send()
            .await
            .map_err(|e| WebSocketRepositoryError::DynamoDb(e.to_string()))?;

        info!("Connection {} unsubscribed", connection_id);
        Ok(())
    }

    async fn connections_for_game(
        &self,
        game_id: &str,
    ) -> Result<Vec<String>, WebSocketRepositoryError> {
        let query_result = self
            .dynamodb_client
            .query()
            .table_name(&self.table_name)
            .index_name("GameIdIndex")
            .key_condition_expression("game_id = :game_id")
            .expression_attribute_values(":game_id", AttributeValue::S(game_id.to_string()))
            .send()
            .await
            .map_err(|e| WebSocketRepositoryError::DynamoDb(e.to_string()))?;

        let mut connection_ids = Vec::new();
        for item in query_result.items.unwrap_or_default() {
            let connection: Connection = serde_dynamo::from_item(item)
                .map_err(|e| WebSocketRepositoryError::Serialization(e.to_string()))?;
            connection_ids.push(connection.connection_id);
        }
        Ok(connection_ids)
    }

    async fn send_message(
        &self,
        connection_id: &str,
        message: &str,
    ) -> Result<(), WebSocketRepositoryError> {
        let result = self
            .api_gateway_client
            .post_to_connection()
            .connection_id(connection_id)
            .data(Blob::new(message.as_bytes()))
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("Sent message to connection: {}", connection_id);
                Ok(())
            }
            Err(e) => match e.as_service_error() {
                Some(PostToConnectionError::GoneException(_)) => {
                    Err(WebSocketRepositoryError::Gone(connection_id.to_string()))
                }
                _ => Err(WebSocketRepositoryError::ApiGateway(e.to_string())),
            },
        }
    }
}
