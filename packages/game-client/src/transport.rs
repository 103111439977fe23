use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use shared::models::actions::{ActionResult, ClientAction, ClientRequest, ServerMessage};
use shared::models::events::GameEvent;
use shared::services::action_handler::ActionHandler;
use shared::services::broadcaster::InMemoryBroadcaster;

use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::scheduler::ScheduledTask;

const EVENT_BUFFER: usize = 64;

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// The subscribe response plus the events that follow it. The stream ends
/// when the subscription is replaced or the connection drops.
#[derive(Debug)]
pub struct Subscription {
    pub snapshot: ActionResult,
    pub events: mpsc::Receiver<GameEvent>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait GameTransport: Send + Sync {
    async fn request(&self, request: ClientRequest) -> Result<ActionResult, TransportError>;

    /// Follows `game_id`, replacing any previous subscription.
    async fn subscribe(&self, game_id: &str) -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, game_id: &str) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct Routing {
    pending: Mutex<HashMap<String, oneshot::Sender<ActionResult>>>,
    events: Mutex<Option<mpsc::Sender<GameEvent>>>,
    closed: AtomicBool,
}

impl Routing {
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Response { request_id, result }) => {
                let waiter = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!("Response for unknown request {}", request_id),
                }
            }
            Ok(ServerMessage::Event { event }) => {
                if let Err(e) = event.validate() {
                    warn!("Dropping {} event: {}", event.kind(), e);
                    return;
                }
                let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(sender) = events.as_ref() {
                    // a dropped event is recovered by the next versioned update
                    if let Err(e) = sender.try_send(event) {
                        warn!("Event buffer rejected an event: {}", e);
                    }
                }
            }
            Ok(ServerMessage::Pong { timestamp }) => debug!("Pong at {}", timestamp),
            Err(e) => warn!("Unrecognised server message: {}", e),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn set_events(&self, sender: Option<mpsc::Sender<GameEvent>>) {
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = sender;
    }
}

/// One websocket connection to the API. Responses are matched to requests by
/// `request_id`; events go to the current subscription.
pub struct WebSocketTransport {
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    routing: Arc<Routing>,
    _reader: ScheduledTask,
}

impl WebSocketTransport {
    pub async fn connect(config: &ClientConfig) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(config.connect_url())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        info!("Connected to {}", config.endpoint);

        let (writer, mut reader) = stream.split();
        let routing = Arc::new(Routing::default());
        let reader_routing = routing.clone();
        let reader_task = ScheduledTask::spawn(move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = reader.next() => match message {
                        Some(Ok(Message::Text(text))) => reader_routing.dispatch(&text),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Websocket read failed: {}", e);
                            break;
                        }
                    }
                }
            }
            info!("Websocket reader stopped");
            reader_routing.close();
        });

        Ok(WebSocketTransport {
            writer: tokio::sync::Mutex::new(writer),
            routing,
            _reader: reader_task,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.routing.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GameTransport for WebSocketTransport {
    async fn request(&self, request: ClientRequest) -> Result<ActionResult, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let payload = serde_json::to_string(&request)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let (sender, receiver) = oneshot::channel();
        self.routing
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.request_id.clone(), sender);

        let sent = self.writer.lock().await.send(Message::Text(payload)).await;
        if let Err(e) = sent {
            self.routing
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request.request_id);
            return Err(TransportError::Connection(e.to_string()));
        }

        receiver.await.map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self, game_id: &str) -> Result<Subscription, TransportError> {
        let (sender, events) = mpsc::channel(EVENT_BUFFER);
        self.routing.set_events(Some(sender));

        let request = ClientRequest::new(&new_request_id(), game_id, ClientAction::Subscribe);
        match self.request(request).await {
            Ok(snapshot) => Ok(Subscription { snapshot, events }),
            Err(e) => {
                self.routing.set_events(None);
                Err(e)
            }
        }
    }

    async fn unsubscribe(&self, game_id: &str) -> Result<(), TransportError> {
        self.routing.set_events(None);
        let request = ClientRequest::new(&new_request_id(), game_id, ClientAction::Unsubscribe);
        self.request(request).await.map(|_| ())
    }
}

/// In-process transport straight onto an `ActionHandler`, with events taken
/// from an `InMemoryBroadcaster`. Can be switched offline to exercise
/// connectivity loss.
pub struct LocalTransport {
    player_id: String,
    handler: Arc<ActionHandler>,
    broadcaster: Arc<InMemoryBroadcaster>,
    forwarder: Mutex<Option<ScheduledTask>>,
    online: AtomicBool,
}

impl LocalTransport {
    pub fn new(
        player_id: &str,
        handler: Arc<ActionHandler>,
        broadcaster: Arc<InMemoryBroadcaster>,
    ) -> Self {
        LocalTransport {
            player_id: player_id.to_string(),
            handler,
            broadcaster,
            forwarder: Mutex::new(None),
            online: AtomicBool::new(true),
        }
    }

    /// Going offline drops the subscription; requests fail until back online.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.replace_forwarder(None);
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn replace_forwarder(&self, task: Option<ScheduledTask>) {
        let previous = std::mem::replace(
            &mut *self.forwarder.lock().unwrap_or_else(|e| e.into_inner()),
            task,
        );
        drop(previous);
    }
}

#[async_trait]
impl GameTransport for LocalTransport {
    async fn request(&self, request: ClientRequest) -> Result<ActionResult, TransportError> {
        if !self.is_online() {
            return Err(TransportError::Closed);
        }
        Ok(self.handler.handle(&self.player_id, request).await)
    }

    async fn subscribe(&self, game_id: &str) -> Result<Subscription, TransportError> {
        if !self.is_online() {
            return Err(TransportError::Connection("offline".to_string()));
        }

        let mut payloads = self.broadcaster.subscribe(game_id);
        let (sender, events) = mpsc::channel(EVENT_BUFFER);
        let forwarder = ScheduledTask::spawn(move |token| async move {
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    payload = payloads.recv() => payload,
                };
                match payload {
                    Ok(payload) => match GameEvent::from_json(&payload) {
                        Ok(event) => {
                            if sender.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed event: {}", e),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscriber lagged, {} events skipped", skipped)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.replace_forwarder(Some(forwarder));

        let request = ClientRequest::new(&new_request_id(), game_id, ClientAction::Subscribe);
        let snapshot = self.request(request).await?;
        Ok(Subscription { snapshot, events })
    }

    async fn unsubscribe(&self, _game_id: &str) -> Result<(), TransportError> {
        self.replace_forwarder(None);
        Ok(())
    }
}
