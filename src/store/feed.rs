use futures_util::StreamExt;
use redis::{Client, ErrorKind, RedisError, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Pub/sub channel shared by every instance pointed at the same Redis.
const CHANGES_CHANNEL: &str = "fixlink:changes";

/// Default number of buffered notifications per subscriber before it lags.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// A committed write to `collection/id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub collection: String,
    pub id: String,
}

impl Change {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// Fans change notifications out to local subscribers and, when a relay is
/// attached, to every other instance sharing the Redis server.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
    relay: Option<RedisRelay>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            relay: None,
        }
    }

    /// Attach a Redis relay so writes made by other instances reach local watchers.
    pub async fn with_redis(mut self, redis_url: &str) -> Result<Self, RedisError> {
        self.relay = Some(RedisRelay::connect(redis_url, self.sender.clone()).await?);
        Ok(self)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    pub async fn publish(&self, change: Change) {
        // No receivers is not an error: nobody is watching.
        let _ = self.sender.send(change.clone());

        if let Some(relay) = &self.relay {
            if let Err(e) = relay.publish(&change).await {
                warn!(collection = %change.collection, id = %change.id, "Change relay publish failed: {e}");
            }
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    origin: Uuid,
    change: Change,
}

#[derive(Clone)]
struct RedisRelay {
    connection: ConnectionManager,
    origin: Uuid,
}

impl RedisRelay {
    async fn connect(
        redis_url: &str,
        local: broadcast::Sender<Change>,
    ) -> Result<Self, RedisError> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client.clone()).await?;
        let origin = Uuid::new_v4();

        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(CHANGES_CHANNEL).await?;

        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Unreadable change relay payload: {e}");
                        continue;
                    }
                };

                match serde_json::from_str::<Envelope>(&payload) {
                    // Our own writes were already delivered locally.
                    Ok(envelope) if envelope.origin == origin => {}
                    Ok(envelope) => {
                        debug!(collection = %envelope.change.collection, id = %envelope.change.id, "Remote change");
                        let _ = local.send(envelope.change);
                    }
                    Err(e) => warn!("Malformed change relay payload: {e}"),
                }
            }
            warn!("Redis change relay subscription ended");
        });

        Ok(Self { connection, origin })
    }

    async fn publish(&self, change: &Change) -> redis::RedisResult<()> {
        let payload = serde_json::to_string(&Envelope {
            origin: self.origin,
            change: change.clone(),
        })
        .map_err(|e| {
            RedisError::from((ErrorKind::TypeError, "Serialization error", e.to_string()))
        })?;

        redis::cmd("PUBLISH")
            .arg(CHANGES_CHANNEL)
            .arg(payload)
            .query_async(&mut self.connection.clone())
            .await
    }
}
