use std::collections::HashSet;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{Cardinality, PresenceBackend, StoreUnavailable};

impl From<redis::RedisError> for StoreUnavailable {
    fn from(err: redis::RedisError) -> Self {
        Self::Unreachable(err.to_string())
    }
}

/// Redis sets, one per room.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Opens a multiplexed connection and pings it once.
    pub async fn connect(url: &str) -> Result<Self, StoreUnavailable> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl PresenceBackend for RedisBackend {
    async fn add(&self, key: &str, member: &str) -> Result<(), StoreUnavailable> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), StoreUnavailable> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await?;
        Ok(())
    }

    async fn cardinality(&self, keys: &[String], probe: Option<&str>) -> Result<Vec<Cardinality>, StoreUnavailable> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.scard(key);
            if let Some(probe) = probe {
                pipe.sismember(key, probe);
            }
        }
        // SISMEMBER replies 0/1, so everything decodes as integers.
        let replies: Vec<u64> = pipe.query_async(&mut conn).await?;
        decode_cardinalities(&replies, keys.len(), probe.is_some())
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreUnavailable> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn contains(&self, key: &str, member: &str) -> Result<bool, StoreUnavailable> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(key, member).await?)
    }
}

/// Splits the pipeline reply into one entry per key: `SCARD`, then
/// `SISMEMBER` when a probe was sent.
fn decode_cardinalities(replies: &[u64], keys: usize, probed: bool) -> Result<Vec<Cardinality>, StoreUnavailable> {
    let stride = if probed { 2 } else { 1 };
    if replies.len() != keys * stride {
        return Err(StoreUnavailable::Unreachable(format!(
            "expected {} replies, got {}",
            keys * stride,
            replies.len()
        )));
    }
    Ok(replies
        .chunks(stride)
        .map(|chunk| Cardinality {
            size: chunk[0],
            probe_present: chunk.get(1).is_some_and(|&m| m == 1),
        })
        .collect())
}
