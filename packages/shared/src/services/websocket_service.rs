use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::actions::ServerMessage;
use crate::models::connection::Connection;
use crate::models::events::GameEvent;
use crate::repositories::errors::websocket_repository_errors::WebSocketRepositoryError;
use crate::repositories::websocket_repository::WebSocketRepository;
use crate::services::broadcaster::GameBroadcaster;
use crate::services::errors::broadcast_errors::BroadcastError;

#[derive(Clone)]
pub struct WebSocketService {
    repository: Arc<dyn WebSocketRepository>,
}

impl WebSocketService {
    pub fn new(repository: Arc<dyn WebSocketRepository>) -> Self {
        Self { repository }
    }

    pub async fn store_connection(
        &self,
        player_id: &str,
        connection_id: &str,
    ) -> Result<(), WebSocketRepositoryError> {
        info!("Storing WebSocket connection for player: {}", player_id);
        self.repository
            .store_connection(&Connection::new(connection_id, player_id))
            .await
    }

    pub async fn remove_connection(&self, connection_id: &str) -> Result<(), WebSocketRepositoryError> {
        info!("Removing WebSocket connection: {}", connection_id);
        self.repository.remove_connection(connection_id).await
    }

    /// Player id recorded for the connection at `$connect`.
    pub async fn get_player_id(
        &self,
        connection_id: &str,
    ) -> Result<Option<String>, WebSocketRepositoryError> {
        Ok(self
            .repository
            .get_connection(connection_id)
            .await?
            .map(|connection| connection.player_id))
    }

    pub async fn subscribe(
        &self,
        connection_id: &str,
        game_id: &str,
    ) -> Result<(), WebSocketRepositoryError> {
        self.repository.subscribe(connection_id, game_id).await
    }

    pub async fn unsubscribe(&self, connection_id: &str) -> Result<(), WebSocketRepositoryError> {
        self.repository.unsubscribe(connection_id).await
    }

    pub async fn send_message(
        &self,
        connection_id: &str,
        message: &ServerMessage,
    ) -> Result<(), WebSocketRepositoryError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| WebSocketRepositoryError::Serialization(e.to_string()))?;
        self.send_raw(connection_id, &payload).await
    }

    pub async fn send_raw(
        &self,
        connection_id: &str,
        payload: &str,
    ) -> Result<(), WebSocketRepositoryError> {
        info!("Sending message to connection: {}", connection_id);
        self.repository.send_message(connection_id, payload).await
    }
}

#[async_trait]
impl GameBroadcaster for WebSocketService {
    /// Sends the event to every connection subscribed to the game. Stale
    /// connections are dropped; other failures are logged and skipped.
    async fn publish(&self, event: &GameEvent) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(&ServerMessage::Event {
            event: event.clone(),
        })
        .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

        let connection_ids = self
            .repository
            .connections_for_game(event.game_id())
            .await
            .map_err(|e| BroadcastError::Delivery(e.to_string()))?;

        for connection_id in connection_ids {
            match self.repository.send_message(&connection_id, &payload).await {
                Ok(()) => {}
                Err(WebSocketRepositoryError::Gone(_)) => {
                    info!("Dropping stale connection {}", connection_id);
                    if let Err(e) = self.repository.remove_connection(&connection_id).await {
                        warn!("Failed to remove stale connection {}: {}", connection_id, e);
                    }
                }
                Err(e) => warn!(
                    "Failed to deliver {} event to {}: {}",
                    event.kind(),
                    connection_id,
                    e
                ),
            }
        }
        Ok(())
    }
}
