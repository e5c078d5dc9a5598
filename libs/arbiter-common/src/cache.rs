use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

/// Cache key naming. Deterministic so writers and invalidators never drift.

pub const USER_SUBMISSIONS_PREFIX: &str = "submissions";

pub fn user_submissions_key(user_id: &Uuid) -> String {
    format!("{}:{}", USER_SUBMISSIONS_PREFIX, user_id)
}

/// Read a JSON value from the cache. Misses and corrupt entries both come
/// back as `None`; a corrupt entry is only worth a warning because the DB is
/// authoritative.
pub async fn get_json<T: DeserializeOwned>(
    conn: &mut ConnectionManager,
    key: &str,
) -> RedisResult<Option<T>> {
    let raw: Option<String> = conn.get(key).await?;
    match raw {
        Some(data) => match serde_json::from_str(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Store a JSON value with a TTL.
pub async fn put_json<T: Serialize>(
    conn: &mut ConnectionManager,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let payload = serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "serialization error",
            e.to_string(),
        ))
    })?;
    let _: () = conn.set_ex(key, payload, ttl_seconds).await?;
    Ok(())
}

/// Drop a key. Deleting an absent key is a no-op, which makes invalidation
/// safe to repeat on redelivery.
pub async fn invalidate(conn: &mut ConnectionManager, key: &str) -> RedisResult<()> {
    let _: u64 = conn.del(key).await?;
    Ok(())
}
