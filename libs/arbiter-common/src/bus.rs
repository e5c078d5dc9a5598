use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Stream-broker semantics shared by every producer and consumer: one stream
/// per topic, one entry per event, the event JSON stored under a single
/// field. Consumers read through a consumer group and ack only after
/// processing, so delivery is at-least-once and unacked entries are
/// redelivered.

pub const PAYLOAD_FIELD: &str = "payload";

/// Cursor selecting entries never delivered to any consumer of the group.
pub const NEW_MESSAGES: &str = ">";

/// Cursor starting a walk over this consumer's own pending backlog -
/// entries delivered before a crash but never acked.
pub const BACKLOG_START: &str = "0";

/// A raw entry fetched from a topic; `id` is what gets acked.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Append an event to a topic. Returns the broker-assigned entry id.
pub async fn publish<T: Serialize>(
    conn: &mut ConnectionManager,
    topic: &str,
    event: &T,
) -> RedisResult<String> {
    let payload = serde_json::to_string(event).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "serialization error",
            e.to_string(),
        ))
    })?;

    conn.xadd(topic, "*", &[(PAYLOAD_FIELD, payload)]).await
}

/// Create the consumer group for a topic, creating the stream if needed.
/// Idempotent: an already-existing group is not an error.
pub async fn ensure_group(
    conn: &mut ConnectionManager,
    topic: &str,
    group: &str,
) -> RedisResult<()> {
    let created: RedisResult<()> = conn.xgroup_create_mkstream(topic, group, "$").await;
    match created {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(e),
    }
}

/// Fetch up to `count` entries for this consumer, blocking for at most
/// `block_ms`. With cursor [`NEW_MESSAGES`] this delivers fresh entries; with
/// an explicit id (see [`BACKLOG_START`]) it walks the consumer's pending
/// backlog after that id and never blocks. An empty vec means there was
/// nothing to fetch.
pub async fn read_group(
    conn: &mut ConnectionManager,
    topic: &str,
    group: &str,
    consumer: &str,
    cursor: &str,
    count: usize,
    block_ms: usize,
) -> RedisResult<Vec<InboundMessage>> {
    let options = StreamReadOptions::default()
        .group(group, consumer)
        .count(count)
        .block(block_ms);

    let reply: StreamReadReply = conn.xread_options(&[topic], &[cursor], &options).await?;

    let mut messages = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            match entry.get::<String>(PAYLOAD_FIELD) {
                Some(payload) => messages.push(InboundMessage {
                    id: entry.id,
                    payload,
                }),
                None => {
                    // Foreign entry shape; ack so it does not loop forever.
                    warn!(topic, entry_id = %entry.id, "Stream entry without payload field, acking");
                    let _: () = conn.xack(topic, group, &[&entry.id]).await?;
                }
            }
        }
    }
    Ok(messages)
}

/// Mark an entry as processed for this group.
pub async fn ack(
    conn: &mut ConnectionManager,
    topic: &str,
    group: &str,
    entry_id: &str,
) -> RedisResult<()> {
    let _: u64 = conn.xack(topic, group, &[entry_id]).await?;
    Ok(())
}
