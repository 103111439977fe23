use lambda_runtime::Error;
use tracing::{error, info, warn};

use crate::state::AppState;
use crate::{WebSocketEvent, WebSocketResponse};

pub async fn handle_connect(
    event: &WebSocketEvent,
    state: &AppState,
) -> Result<WebSocketResponse, Error> {
    let connection_id = &event.request_context.connection_id;

    let Some(player_id) = event.player_id() else {
        warn!("Rejecting connection {} without a player id", connection_id);
        return Ok(WebSocketResponse::error(401, "Missing player id"));
    };

    if let Err(e) = state
        .websocket_service
        .store_connection(&player_id, connection_id)
        .await
    {
        error!("Failed to store connection {}: {}", connection_id, e);
        return Ok(WebSocketResponse::error(500, "Failed to store connection"));
    }

    info!(
        "WebSocket connection {} established for player {}",
        connection_id, player_id
    );
    Ok(WebSocketResponse::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{app_state, event};
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_stores_player() {
        let (state, repository) = app_state();
        let event = event("c-1", "$connect", None, Some(json!({"player_id": "alice"})));

        let response = handle_connect(&event, &state).await.unwrap();

        assert_eq!(response, WebSocketResponse::ok());
        let connections = repository.connections.lock().unwrap();
        assert_eq!(connections["c-1"].player_id, "alice");
    }

    #[tokio::test]
    async fn test_connect_without_player_is_rejected() {
        let (state, repository) = app_state();
        let event = event("c-1", "$connect", None, None);

        let response = handle_connect(&event, &state).await.unwrap();

        assert_eq!(response.status_code, 401);
        assert!(repository.connections.lock().unwrap().is_empty());
    }
}
