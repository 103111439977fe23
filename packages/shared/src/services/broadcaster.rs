use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::models::events::GameEvent;
use crate::services::errors::broadcast_errors::BroadcastError;

/// Topic-scoped publish for game events; the topic is the game id.
/// Delivery is best effort and unordered.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GameBroadcaster: Send + Sync {
    async fn publish(&self, event: &GameEvent) -> Result<(), BroadcastError>;
}

const TOPIC_CAPACITY: usize = 64;

/// Fan-out over tokio broadcast channels, one per game. Subscribers receive
/// each event serialized as JSON.
#[derive(Default)]
pub struct InMemoryBroadcaster {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, game_id: &str) -> broadcast::Receiver<String> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(game_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, game_id: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(game_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

#[async_trait]
impl GameBroadcaster for InMemoryBroadcaster {
    async fn publish(&self, event: &GameEvent) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        match topics.get(event.game_id()) {
            // a send error only means nobody is listening
            Some(sender) => {
                let delivered = sender.send(payload).unwrap_or(0);
                debug!(
                    "Published {} event for game {} to {} subscribers",
                    event.kind(),
                    event.game_id(),
                    delivered
                );
            }
            None => debug!("No subscribers for game {}", event.game_id()),
        }
        Ok(())
    }
}
