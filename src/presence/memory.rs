use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Cardinality, PresenceBackend, StoreUnavailable};

/// Process-local set store. Suitable for a single node; state is lost on restart.
#[derive(Debug)]
pub struct MemoryBackend {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }
}

impl MemoryBackend {
    /// Simulates the store going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Adds artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn with_sets<T>(&self, f: impl FnOnce(&mut HashMap<String, HashSet<String>>) -> T) -> Result<T, StoreUnavailable> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(StoreUnavailable::Unreachable("memory backend switched off".to_owned()));
        }
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| StoreUnavailable::Unreachable("memory backend poisoned".to_owned()))?;
        Ok(f(&mut sets))
    }
}

#[async_trait]
impl PresenceBackend for MemoryBackend {
    async fn add(&self, key: &str, member: &str) -> Result<(), StoreUnavailable> {
        self.with_sets(|sets| {
            sets.entry(key.to_owned()).or_default().insert(member.to_owned());
        })
        .await
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), StoreUnavailable> {
        self.with_sets(|sets| {
            if let Some(set) = sets.get_mut(key) {
                set.remove(member);
                if set.is_empty() {
                    sets.remove(key);
                }
            }
        })
        .await
    }

    async fn cardinality(&self, keys: &[String], probe: Option<&str>) -> Result<Vec<Cardinality>, StoreUnavailable> {
        self.with_sets(|sets| {
            keys.iter()
                .map(|key| match sets.get(key) {
                    Some(set) => Cardinality {
                        size: set.len() as u64,
                        probe_present: probe.is_some_and(|p| set.contains(p)),
                    },
                    None => Cardinality::default(),
                })
                .collect()
        })
        .await
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreUnavailable> {
        self.with_sets(|sets| sets.get(key).cloned().unwrap_or_default()).await
    }

    async fn contains(&self, key: &str, member: &str) -> Result<bool, StoreUnavailable> {
        self.with_sets(|sets| sets.get(key).is_some_and(|s| s.contains(member))).await
    }
}
