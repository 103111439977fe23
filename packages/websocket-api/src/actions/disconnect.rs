use lambda_runtime::Error;
use tracing::{error, info};

use crate::state::AppState;
use crate::WebSocketResponse;

pub async fn handle_disconnect(
    connection_id: &str,
    state: &AppState,
) -> Result<WebSocketResponse, Error> {
    info!("WebSocket connection disconnected: {}", connection_id);

    // the socket is already closed, nothing useful to report back
    if let Err(e) = state
        .websocket_service
        .remove_connection(connection_id)
        .await
    {
        error!("Failed to remove connection {}: {}", connection_id, e);
    }

    Ok(WebSocketResponse::ok())
}
