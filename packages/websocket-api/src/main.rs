use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub mod actions;
pub mod state;

use shared::config::ServerConfig;
use shared::repositories::game_repository::DynamoDbGameRepository;
use shared::repositories::websocket_repository::DynamoDbWebSocketRepository;
use shared::services::action_handler::ActionHandler;
use shared::services::ban_protocol::BanProtocol;
use shared::services::game_service::GameService;
use shared::services::websocket_service::WebSocketService;

#[derive(Debug, Deserialize)]
pub struct WebSocketEvent {
    #[serde(rename = "requestContext")]
    pub request_context: RequestContext,
    pub body: Option<String>,
    #[serde(rename = "queryStringParameters")]
    pub query_string_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RequestContext {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    #[serde(rename = "routeKey")]
    pub route_key: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "domainName")]
    pub domain_name: String,
    pub stage: String,
    /// Present when a websocket authorizer is attached to `$connect`.
    pub authorizer: Option<serde_json::Value>,
}

impl WebSocketEvent {
    /// Authorizer principal if there is one, otherwise the `player_id` query
    /// parameter.
    pub fn player_id(&self) -> Option<String> {
        let principal = self
            .request_context
            .authorizer
            .as_ref()
            .and_then(|authorizer| authorizer.get("principalId"))
            .and_then(|id| id.as_str());
        let query = self
            .query_string_parameters
            .as_ref()
            .and_then(|params| params.get("player_id"))
            .and_then(|id| id.as_str());

        principal
            .or(query)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct WebSocketResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Option<String>,
    #[serde(rename = "headers", skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
}

impl WebSocketResponse {
    pub fn ok() -> Self {
        WebSocketResponse {
            status_code: 200,
            body: None,
            headers: None,
        }
    }

    pub fn error(status_code: u16, message: &str) -> Self {
        WebSocketResponse {
            status_code,
            body: Some(json!({ "error": message }).to_string()),
            headers: None,
        }
    }
}

fn log_level() -> tracing::Level {
    env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(tracing::Level::INFO)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // required to enable CloudWatch error logging by the runtime
    tracing_subscriber::fmt().with_max_level(log_level()).init();

    let config = ServerConfig::from_env()?;

    let aws_config = aws_config::load_from_env().await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);
    let api_gateway_client = match &config.websocket_api_endpoint {
        Some(endpoint) => {
            let apigw_config = aws_sdk_apigatewaymanagement::config::Builder::from(&aws_config)
                .endpoint_url(endpoint)
                .build();
            aws_sdk_apigatewaymanagement::Client::from_conf(apigw_config)
        }
        None => {
            warn!("WEBSOCKET_API_ENDPOINT is not set, pushes will use the default endpoint");
            aws_sdk_apigatewaymanagement::Client::new(&aws_config)
        }
    };

    let websocket_repository = Arc::new(DynamoDbWebSocketRepository::new(
        dynamodb_client.clone(),
        api_gateway_client,
        &config.connections_table,
    ));
    let websocket_service = Arc::new(WebSocketService::new(websocket_repository));

    let game_repository = Arc::new(DynamoDbGameRepository::new(
        dynamodb_client,
        &config.games_table,
        &config.moves_table,
    ));
    let game_service = Arc::new(GameService::new(
        game_repository,
        websocket_service.clone(),
        BanProtocol::default(),
        config.default_time_control,
    ));

    let app_state = state::AppState {
        websocket_service,
        action_handler: Arc::new(ActionHandler::new(game_service)),
    };

    run(service_fn(|event: LambdaEvent<WebSocketEvent>| {
        websocket_handler(event, app_state.clone())
    }))
    .await
}

async fn websocket_handler(
    event: LambdaEvent<WebSocketEvent>,
    state: state::AppState,
) -> Result<WebSocketResponse, Error> {
    let websocket_event = event.payload;
    let route_key = websocket_event.request_context.route_key.as_str();
    let connection_id = websocket_event.request_context.connection_id.as_str();

    debug!(
        "Processing route_key: {}, connection_id: {}",
        route_key, connection_id
    );

    match route_key {
        "$connect" => actions::connect::handle_connect(&websocket_event, &state).await,
        "$disconnect" => actions::disconnect::handle_disconnect(connection_id, &state).await,
        "$default" => actions::default::handle_default_message(&websocket_event, &state).await,
        _ => {
            error!("Unknown route key: {}", route_key);
            Ok(WebSocketResponse::error(400, "Unknown route"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: serde_json::Value) -> WebSocketEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_player_id_prefers_authorizer_principal() {
        let event = event(json!({
            "requestContext": {
                "connectionId": "c-1",
                "routeKey": "$connect",
                "eventType": "CONNECT",
                "domainName": "example.execute-api.eu-west-1.amazonaws.com",
                "stage": "prod",
                "authorizer": { "principalId": "user-1" }
            },
            "queryStringParameters": { "player_id": "someone-else" }
        }));

        assert_eq!(event.player_id(), Some("user-1".to_string()));
    }

    #[test]
    fn test_player_id_from_query() {
        let event = event(json!({
            "requestContext": {
                "connectionId": "c-1",
                "routeKey": "$connect",
                "eventType": "CONNECT",
                "domainName": "example.execute-api.eu-west-1.amazonaws.com",
                "stage": "prod"
            },
            "queryStringParameters": { "player_id": "user-2" }
        }));

        assert_eq!(event.player_id(), Some("user-2".to_string()));
    }

    #[test]
    fn test_error_response_body() {
        let response = WebSocketResponse::error(401, "Missing player id");

        assert_eq!(response.status_code, 401);
        assert_eq!(
            response.body.as_deref(),
            Some(r#"{"error":"Missing player id"}"#)
        );
    }
}
