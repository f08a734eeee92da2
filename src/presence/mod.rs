//! Who is currently connected to which room.
//!
//! Presence lives in an external set store (`online:<room>` keys) so that
//! counts are O(1) reads. The store only holds "who's online": losing it
//! never loses messages. Every operation returns `Result<_, StoreUnavailable>`
//! and callers decide how to degrade; [`OrEmpty`] is the standard policy of
//! logging and falling back to the empty value.

pub mod memory;
pub mod redis_backend;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::ids::{RoomId, UserId};

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

#[derive(Debug, Error)]
pub enum StoreUnavailable {
    #[error("presence store was never connected")]
    NotConnected,
    #[error("presence store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("presence store unreachable: {0}")]
    Unreachable(String),
}

/// Cardinality of one set, plus whether the probed member is in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cardinality {
    pub size: u64,
    pub probe_present: bool,
}

/// Atomic set primitives a presence backing store has to offer.
#[async_trait]
pub trait PresenceBackend: Send + Sync {
    async fn add(&self, key: &str, member: &str) -> Result<(), StoreUnavailable>;
    async fn remove(&self, key: &str, member: &str) -> Result<(), StoreUnavailable>;
    /// One entry per key, in order, computed in a single round trip.
    async fn cardinality(&self, keys: &[String], probe: Option<&str>) -> Result<Vec<Cardinality>, StoreUnavailable>;
    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreUnavailable>;
    async fn contains(&self, key: &str, member: &str) -> Result<bool, StoreUnavailable>;
}

pub fn presence_key(room_id: &RoomId) -> String {
    format!("online:{room_id}")
}

/// Shared handle to the presence backing store. Built once at startup and
/// cloned into everything that needs it.
#[derive(Clone)]
pub struct PresenceStore {
    backend: Option<Arc<dyn PresenceBackend>>,
    timeout: Duration,
}

impl PresenceStore {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

    pub fn new(backend: Arc<dyn PresenceBackend>, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            timeout,
        }
    }

    /// A store whose initialization failed. Every call reports `NotConnected`.
    pub fn unavailable() -> Self {
        Self {
            backend: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()), Self::DEFAULT_TIMEOUT)
    }

    /// Connects to redis at `url`, or falls back to an unavailable store.
    pub async fn connect(url: &str, timeout: Duration) -> Self {
        match tokio::time::timeout(timeout * 8, RedisBackend::connect(url)).await {
            Ok(Ok(backend)) => {
                info!("presence store connected");
                Self::new(Arc::new(backend), timeout)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "presence store connection failed, presence disabled");
                Self::unavailable()
            }
            Err(_) => {
                warn!("presence store connection timed out, presence disabled");
                Self::unavailable()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    async fn call<'a, T, F, Fut>(&'a self, op: F) -> Result<T, StoreUnavailable>
    where
        F: FnOnce(&'a dyn PresenceBackend) -> Fut,
        Fut: Future<Output = Result<T, StoreUnavailable>> + 'a,
    {
        let backend = self.backend.as_deref().ok_or(StoreUnavailable::NotConnected)?;
        tokio::time::timeout(self.timeout, op(backend))
            .await
            .map_err(|_| StoreUnavailable::Timeout(self.timeout))?
    }

    /// Adds `user_id` to the room's online set. Re-adding is a no-op.
    pub async fn join(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), StoreUnavailable> {
        let key = presence_key(room_id);
        self.call(|b| async move { b.add(&key, user_id.as_str()).await }).await
    }

    /// Removes `user_id` from the room's online set. Removing an absent member is a no-op.
    pub async fn leave(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), StoreUnavailable> {
        let key = presence_key(room_id);
        self.call(|b| async move { b.remove(&key, user_id.as_str()).await }).await
    }

    /// Size of the online set, minus one if `exclude` is currently in it.
    pub async fn count(&self, room_id: &RoomId, exclude: Option<&UserId>) -> Result<u64, StoreUnavailable> {
        let keys = [presence_key(room_id)];
        let probe = exclude.map(UserId::as_str);
        let card = self.call(|b| async move { b.cardinality(&keys, probe).await }).await?;
        Ok(card.first().map(|c| excluding(*c, exclude.is_some())).unwrap_or(0))
    }

    pub async fn members(&self, room_id: &RoomId, exclude: Option<&UserId>) -> Result<HashSet<UserId>, StoreUnavailable> {
        let key = presence_key(room_id);
        let members = self.call(|b| async move { b.members(&key).await }).await?;
        Ok(members
            .into_iter()
            .map(UserId)
            .filter(|u| Some(u) != exclude)
            .collect())
    }

    pub async fn is_online(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, StoreUnavailable> {
        let key = presence_key(room_id);
        self.call(|b| async move { b.contains(&key, user_id.as_str()).await }).await
    }

    /// Batched [`count`](Self::count) for rendering room lists.
    pub async fn count_many(
        &self,
        room_ids: &[RoomId],
        exclude: Option<&UserId>,
    ) -> Result<HashMap<RoomId, u64>, StoreUnavailable> {
        if room_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = room_ids.iter().map(presence_key).collect();
        let probe = exclude.map(UserId::as_str);
        let cards = self.call(|b| async move { b.cardinality(&keys, probe).await }).await?;
        Ok(room_ids
            .iter()
            .cloned()
            .zip(cards.into_iter().map(|c| excluding(c, exclude.is_some())))
            .collect())
    }

    /// Count for every room, zero for all of them when the store is down.
    pub async fn count_many_or_zero(&self, room_ids: &[RoomId], exclude: Option<&UserId>) -> HashMap<RoomId, u64> {
        match self.count_many(room_ids, exclude).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, rooms = room_ids.len(), "presence count_many degraded");
                room_ids.iter().cloned().map(|r| (r, 0)).collect()
            }
        }
    }
}

fn excluding(card: Cardinality, excluded: bool) -> u64 {
    if excluded && card.probe_present {
        card.size.saturating_sub(1)
    } else {
        card.size
    }
}

/// Degrades a presence result to its empty value, logging the outage.
pub trait OrEmpty<T> {
    fn or_empty(self, op: &'static str) -> T;
}

impl<T: Default> OrEmpty<T> for Result<T, StoreUnavailable> {
    fn or_empty(self, op: &'static str) -> T {
        self.unwrap_or_else(|e| {
            warn!(op, error = %e, "presence store unavailable, degrading");
            T::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::from(id)
    }

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    #[tokio::test]
    async fn join_marks_online_and_counts_once() {
        let store = PresenceStore::in_memory();
        let (r, u) = (room("r1"), user("u1"));

        store.join(&r, &u).await.unwrap();
        assert!(store.is_online(&r, &u).await.unwrap());
        assert_eq!(store.count(&r, None).await.unwrap(), 1);

        store.join(&r, &u).await.unwrap();
        assert_eq!(store.count(&r, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leave_twice_is_safe() {
        let store = PresenceStore::in_memory();
        let (r, u) = (room("r1"), user("u1"));

        store.join(&r, &u).await.unwrap();
        store.leave(&r, &u).await.unwrap();
        store.leave(&r, &u).await.unwrap();
        assert!(!store.is_online(&r, &u).await.unwrap());
        assert_eq!(store.count(&r, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn count_excludes_only_present_members() {
        let store = PresenceStore::in_memory();
        let r = room("r1");
        store.join(&r, &user("a")).await.unwrap();
        store.join(&r, &user("b")).await.unwrap();

        assert_eq!(store.count(&r, Some(&user("a"))).await.unwrap(), 1);
        assert_eq!(store.count(&r, Some(&user("zed"))).await.unwrap(), 2);

        let members = store.members(&r, Some(&user("a"))).await.unwrap();
        assert_eq!(members, HashSet::from([user("b")]));
    }

    #[tokio::test]
    async fn count_many_matches_individual_counts() {
        let store = PresenceStore::in_memory();
        let (r1, r2, r3) = (room("r1"), room("r2"), room("empty"));
        let me = user("me");
        store.join(&r1, &me).await.unwrap();
        store.join(&r1, &user("x")).await.unwrap();
        store.join(&r2, &user("y")).await.unwrap();

        let many = store
            .count_many(&[r1.clone(), r2.clone(), r3.clone()], Some(&me))
            .await
            .unwrap();
        assert_eq!(many[&r1], store.count(&r1, Some(&me)).await.unwrap());
        assert_eq!(many[&r2], store.count(&r2, Some(&me)).await.unwrap());
        assert_eq!(many[&r1], 1);
        assert_eq!(many[&r2], 1);
        assert_eq!(many[&r3], 0);
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_empty() {
        let backend = Arc::new(MemoryBackend::default());
        let store = PresenceStore::new(backend.clone(), PresenceStore::DEFAULT_TIMEOUT);
        let (r, u) = (room("r1"), user("u1"));
        store.join(&r, &u).await.unwrap();

        backend.set_reachable(false);
        assert!(matches!(store.join(&r, &user("u2")).await, Err(StoreUnavailable::Unreachable(_))));
        assert!(store.leave(&r, &u).await.is_err());
        assert_eq!(store.count(&r, None).await.or_empty("count"), 0);
        assert!(store.members(&r, None).await.or_empty("members").is_empty());
        assert!(!store.is_online(&r, &u).await.or_empty("is_online"));
        assert_eq!(store.count_many_or_zero(&[r.clone()], None).await[&r], 0);

        backend.set_reachable(true);
        assert_eq!(store.count(&r, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn never_connected_store_reports_not_connected() {
        let store = PresenceStore::unavailable();
        assert!(!store.is_available());
        assert!(matches!(
            store.count(&room("r"), None).await,
            Err(StoreUnavailable::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let backend = Arc::new(MemoryBackend::default());
        backend.set_latency(Duration::from_secs(5));
        let store = PresenceStore::new(backend, Duration::from_millis(50));

        let res = store.count(&room("r"), None).await;
        assert!(matches!(res, Err(StoreUnavailable::Timeout(_))));
    }
}
