use lambda_runtime::Error;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use shared::models::actions::{
    ActionResult, ClientAction, ClientRequest, ErrorCategory, ServerMessage,
};

use crate::state::AppState;
use crate::{WebSocketEvent, WebSocketResponse};

fn is_ping(body: &str) -> bool {
    let body = body.trim();
    if body.eq_ignore_ascii_case("ping") {
        return true;
    }
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|message| {
            message
                .get("action")
                .and_then(|a| a.as_str())
                .map(|a| a == "ping")
        })
        .unwrap_or(false)
}

/// Best-effort request id from a body that failed to parse.
fn request_id_of(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|message| {
            message
                .get("request_id")
                .and_then(|id| id.as_str())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

async fn respond(
    state: &AppState,
    connection_id: &str,
    request_id: String,
    result: ActionResult,
) -> Result<WebSocketResponse, Error> {
    let message = ServerMessage::Response { request_id, result };
    if let Err(e) = state
        .websocket_service
        .send_message(connection_id, &message)
        .await
    {
        error!("Failed to send response to {}: {}", connection_id, e);
        return Ok(WebSocketResponse::error(500, "Failed to send response"));
    }
    Ok(WebSocketResponse::ok())
}

pub async fn handle_default_message(
    event: &WebSocketEvent,
    state: &AppState,
) -> Result<WebSocketResponse, Error> {
    let connection_id = event.request_context.connection_id.as_str();

    let Some(body) = event.body.as_deref() else {
        debug!("No body found in WebSocket event");
        let result = ActionResult::error(ErrorCategory::BadRequest, "No message body");
        return respond(state, connection_id, String::new(), result).await;
    };

    if is_ping(body) {
        let pong = ServerMessage::Pong {
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = state
            .websocket_service
            .send_message(connection_id, &pong)
            .await
        {
            error!("Failed to send pong response: {}", e);
            return Ok(WebSocketResponse::error(500, "Failed to send response"));
        }
        return Ok(WebSocketResponse::ok());
    }

    let request: ClientRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unparseable message from {}: {}", connection_id, e);
            let result = ActionResult::error(
                ErrorCategory::BadRequest,
                format!("Invalid request: {}", e),
            );
            return respond(state, connection_id, request_id_of(body), result).await;
        }
    };

    let player_id = match state.websocket_service.get_player_id(connection_id).await {
        Ok(Some(player_id)) => player_id,
        Ok(None) => {
            let result =
                ActionResult::error(ErrorCategory::Unauthorized, "Unknown connection");
            return respond(state, connection_id, request.request_id, result).await;
        }
        Err(e) => {
            error!("Failed to look up connection {}: {}", connection_id, e);
            let result = ActionResult::error(ErrorCategory::Internal, "Connection lookup failed");
            return respond(state, connection_id, request.request_id, result).await;
        }
    };

    info!(
        "Received {} from {} on {}",
        request.action.name(),
        player_id,
        connection_id
    );

    let request_id = request.request_id.clone();
    let topic = match &request.action {
        ClientAction::Subscribe => state
            .websocket_service
            .subscribe(connection_id, &request.game_id)
            .await,
        ClientAction::Unsubscribe => state.websocket_service.unsubscribe(connection_id).await,
        _ => Ok(()),
    };
    if let Err(e) = topic {
        error!("Failed to update subscription for {}: {}", connection_id, e);
        let result = ActionResult::error(ErrorCategory::Internal, "Subscription failed");
        return respond(state, connection_id, request_id, result).await;
    }

    let result = state.action_handler.handle(&player_id, request).await;
    respond(state, connection_id, request_id, result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::test_support::{app_state, event, RecordingRepository};
    use std::sync::Arc;

    async fn connected_game() -> (AppState, Arc<RecordingRepository>, String) {
        let (state, repository) = app_state();
        state
            .websocket_service
            .store_connection("bob", "c-bob")
            .await
            .unwrap();
        state
            .websocket_service
            .store_connection("alice", "c-alice")
            .await
            .unwrap();
        let game = state
            .action_handler
            .game_service()
            .create_game("alice", "bob", None)
            .await
            .unwrap();
        (state, repository, game.game_id)
    }

    #[tokio::test]
    async fn test_raw_ping_gets_pong() {
        let (state, repository) = app_state();

        let response = handle_default_message(&event("c-1", "$default", Some("ping"), None), &state)
            .await
            .unwrap();

        assert_eq!(response, WebSocketResponse::ok());
        let sent = repository.sent_to("c-1");
        assert_eq!(sent[0]["action"], "pong");
    }

    #[tokio::test]
    async fn test_invalid_json_gets_bad_request() {
        let (state, repository) = app_state();
        let body = r#"{"action":"teleport","request_id":"r-9","game_id":"g"}"#;

        handle_default_message(&event("c-1", "$default", Some(body), None), &state)
            .await
            .unwrap();

        let sent = repository.sent_to("c-1");
        assert_eq!(sent[0]["action"], "response");
        assert_eq!(sent[0]["request_id"], "r-9");
        assert_eq!(sent[0]["result"]["category"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_connection_is_unauthorized() {
        let (state, repository) = app_state();
        let body = r#"{"action":"get_game","request_id":"r-1","game_id":"g"}"#;

        handle_default_message(&event("c-1", "$default", Some(body), None), &state)
            .await
            .unwrap();

        let sent = repository.sent_to("c-1");
        assert_eq!(sent[0]["result"]["category"], "unauthorized");
    }

    #[tokio::test]
    async fn test_subscribe_then_ban_broadcasts_to_subscribers() {
        let (state, repository, game_id) = connected_game().await;
        let subscribe = format!(
            r#"{{"action":"subscribe","request_id":"r-1","game_id":"{}"}}"#,
            game_id
        );
        handle_default_message(&event("c-alice", "$default", Some(&subscribe), None), &state)
            .await
            .unwrap();

        let ban = format!(
            r#"{{"action":"ban_move","request_id":"r-2","game_id":"{}","from":"e2","to":"e4"}}"#,
            game_id
        );
        handle_default_message(&event("c-bob", "$default", Some(&ban), None), &state)
            .await
            .unwrap();

        let to_bob = repository.sent_to("c-bob");
        assert_eq!(to_bob.len(), 1);
        assert_eq!(to_bob[0]["result"]["kind"], "banned");

        let to_alice = repository.sent_to("c-alice");
        assert_eq!(to_alice[0]["result"]["kind"], "game");
        assert_eq!(to_alice[1]["action"], "event");
        assert_eq!(to_alice[1]["event"]["type"], "ban");
    }
}
