//! In-memory last-value result store.
//!
//! One entry per check name, overwritten unconditionally on every new result
//! (last writer wins by completion time). A periodic purge task evicts
//! entries whose result is older than the TTL; the TTL is independent of
//! check intervals, so a check with an interval above the TTL legitimately
//! shows no recent result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::healthcheck::CheckResult;

pub const DEFAULT_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct MemoryStore {
    results: RwLock<HashMap<String, CheckResult>>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        MemoryStore {
            results: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn add(&self, result: CheckResult) {
        self.results
            .write()
            .await
            .insert(result.name.clone(), result);
    }

    pub async fn get(&self, name: &str) -> Option<CheckResult> {
        self.results.read().await.get(name).cloned()
    }

    /// Every stored result, sorted by check name.
    pub async fn list(&self) -> Vec<CheckResult> {
        let mut results: Vec<CheckResult> = self.results.read().await.values().cloned().collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }

    /// Evict entries whose result timestamp is older than `now - ttl`.
    pub async fn purge(&self, now: i64) {
        let ttl = self.ttl.as_secs() as i64;
        let mut results = self.results.write().await;
        let before = results.len();
        results.retain(|_, result| now <= result.healthcheck_timestamp + ttl);
        let evicted = before - results.len();
        if evicted > 0 {
            debug!(evicted, "purged expired results from the memory store");
        }
    }
}

/// Start the purge task. Stops when the token is cancelled.
pub fn spawn_purge_task(
    store: Arc<MemoryStore>,
    purge_interval: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    store.purge(chrono::Utc::now().timestamp()).await;
                }
            }
        }
    })
}
