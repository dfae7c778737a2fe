//! Check registry and scheduler.
//!
//! The registry owns the set of active checks. Each installed check runs on
//! its own periodic task holding the runtime probe, a cancellation token and
//! the fan-out sender; the registry entry keeps the descriptor (for
//! structural-equality comparisons), the token and the task handle. Writers
//! (add, remove, stop) take the exclusive lock, readers (list, get,
//! source_names) the shared one.

pub mod reconcile;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::healthcheck::{Check, CheckConfig, CheckError, CheckResult, Source};
use crate::metrics::Metrics;

/// Default capacity of the fan-out channel.
pub const DEFAULT_RESULT_BUFFER: usize = 5000;

/// Upper bound of the random startup delay applied to every scheduled task,
/// so a reload does not fire every check at once.
const JITTER_MS: u64 = 4000;

/// What `add` did with the incoming check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A check with the same name and a structurally equal descriptor is
    /// already installed; the running task was left untouched.
    Identical,
    /// The check was installed for the first time.
    Added,
    /// An older check with the same name was stopped and replaced.
    Replaced,
}

struct Entry {
    config: CheckConfig,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Entry {
    /// Cancel the task and wait for it to finish.
    async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                error!(error = %err, "healthcheck task ended abnormally");
            }
        }
    }
}

pub struct Registry {
    checks: RwLock<HashMap<String, Entry>>,
    sender: mpsc::Sender<CheckResult>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Build the registry and hand back the receive end of the fan-out
    /// channel, to be owned by the dispatcher.
    pub fn new(
        metrics: Arc<Metrics>,
        result_buffer: usize,
    ) -> (Arc<Registry>, mpsc::Receiver<CheckResult>) {
        let (sender, receiver) = mpsc::channel(result_buffer);
        let registry = Registry {
            checks: RwLock::new(HashMap::new()),
            sender,
            metrics,
            shutdown: CancellationToken::new(),
        };
        (Arc::new(registry), receiver)
    }

    /// Install a check. Re-adding a structurally identical descriptor is a
    /// no-op; otherwise any older check with the same name is stopped (its
    /// metric series deleted) before the replacement becomes visible.
    pub async fn add(&self, mut check: Check) -> Result<AddOutcome, CheckError> {
        check.validate()?;
        if check.base().one_off {
            return Err(CheckError::Validation(format!(
                "healthcheck {}: one-off checks cannot be scheduled",
                check.name()
            )));
        }
        let mut checks = self.checks.write().await;
        let name = check.name().to_string();
        if let Some(existing) = checks.get(&name) {
            if existing.config == check.config() {
                debug!(healthcheck = %name, "healthcheck is already configured, nothing to do");
                return Ok(AddOutcome::Identical);
            }
        }
        check.initialize().await?;
        let replaced = match checks.remove(&name) {
            Some(old) => {
                old.stop().await;
                // Serialized with task start by the registry write lock.
                self.metrics.delete_check_series(&name);
                true
            }
            None => false,
        };
        let config = check.config();
        let token = self.shutdown.child_token();
        let handle = spawn_check_task(
            check,
            token.clone(),
            self.sender.clone(),
            self.metrics.clone(),
        );
        checks.insert(
            name.clone(),
            Entry {
                config,
                token,
                handle,
            },
        );
        info!(healthcheck = %name, "healthcheck added");
        Ok(if replaced {
            AddOutcome::Replaced
        } else {
            AddOutcome::Added
        })
    }

    /// Remove a check: cancel its task, wait for completion, delete its
    /// metric series. Removing an absent name is not an error.
    pub async fn remove(&self, name: &str) {
        let mut checks = self.checks.write().await;
        if let Some(entry) = checks.remove(name) {
            entry.stop().await;
            self.metrics.delete_check_series(name);
            info!(healthcheck = %name, "healthcheck removed");
        }
    }

    /// All descriptors, sorted by name.
    pub async fn list(&self) -> Vec<CheckConfig> {
        let checks = self.checks.read().await;
        let mut configs: Vec<CheckConfig> =
            checks.values().map(|entry| entry.config.clone()).collect();
        configs.sort_by(|a, b| a.name().cmp(b.name()));
        configs
    }

    pub async fn get(&self, name: &str) -> Option<CheckConfig> {
        self.checks
            .read()
            .await
            .get(name)
            .map(|entry| entry.config.clone())
    }

    /// Names of the checks owned by the given source.
    pub async fn source_names(&self, source: &Source) -> HashSet<String> {
        self.checks
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.config.base().source == *source)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Remove every check of `old_set` absent from `new_set`. Callers
    /// restrict both sets to a single source, so reconcilers cannot evict
    /// each other's checks.
    pub async fn remove_non_configured(
        &self,
        old_set: HashSet<String>,
        new_set: &HashSet<String>,
    ) {
        for name in old_set {
            if !new_set.contains(&name) {
                self.remove(&name).await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.checks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checks.read().await.is_empty()
    }

    /// Cancel every scheduled task and wait for completion.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let entries: Vec<Entry> = {
            let mut checks = self.checks.write().await;
            checks.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.stop().await;
        }
    }
}

/// Periodic task of one installed check: random startup jitter, then
/// tick, execute under the per-attempt deadline, record metrics, emit the
/// result. Cancellation interrupts the jitter, the tick wait, an in-flight
/// attempt and a blocked send.
fn spawn_check_task(
    check: Check,
    token: CancellationToken,
    sender: mpsc::Sender<CheckResult>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(interval) = check.base().interval else {
            // Unreachable: add() rejects recurring checks without interval.
            error!(healthcheck = %check.name(), "scheduled healthcheck has no interval");
            return;
        };
        let timeout = check.base().timeout;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MS));
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(jitter) => {}
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            // Tick first, then execute, then emit: a check cancelled
            // mid-interval produces no trailing result. The first tick
            // completes immediately, right after the jitter.
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let start = tokio::time::Instant::now();
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = execute_with_deadline(&check, timeout) => outcome,
            };
            let result = CheckResult::from_attempt(&check, &outcome, start.elapsed());
            if let Err(err) = &outcome {
                debug!(healthcheck = %check.name(), error = %err, "healthcheck attempt failed");
            }
            metrics.observe(&result);
            // Backpressure is intentional: a stalled dispatcher blocks the
            // send, which is observable through the saturation counter.
            let result = match sender.try_send(result) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(result)) => {
                    metrics.incr_channel_full();
                    result
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            };
            tokio::select! {
                _ = token.cancelled() => return,
                sent = sender.send(result) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// One attempt under the per-attempt deadline. A missing deadline (DNS
/// checks may omit the timeout) runs the attempt with the probe's own
/// internal timeouts.
pub async fn execute_with_deadline(
    check: &Check,
    timeout: Option<Duration>,
) -> Result<(), CheckError> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, check.execute()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CheckError::Execution(format!(
                "healthcheck timed out after {:?}",
                timeout
            ))),
        },
        None => check.execute().await,
    }
}
