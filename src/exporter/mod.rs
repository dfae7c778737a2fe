//! Result fan-out: the dispatcher task and the exporter set.
//!
//! The dispatcher owns the receive end of the bounded results channel. For
//! each result it logs the outcome, writes the last-value store and pushes
//! the result to every configured exporter; a failing exporter is logged and
//! counted, never fatal, and the result still reaches the store and metrics.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use http::{HttpExporter, HttpExporterConfig};

use crate::healthcheck::CheckResult;
use crate::memorystore::MemoryStore;
use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error("invalid exporter configuration: {0}")]
    Configuration(String),
    #[error("exporter setup failed: {0}")]
    Setup(String),
    #[error("push failed: {0}")]
    Push(String),
}

/// An exporter receives every result produced by the scheduler. Exporters
/// may buffer or retry internally; the dispatcher does not.
#[async_trait::async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;
    async fn push(&self, result: &CheckResult) -> Result<(), ExporterError>;
}

struct ExporterEntry {
    config: HttpExporterConfig,
    exporter: Arc<dyn Exporter>,
}

/// The current exporter set, reloaded atomically on configuration reload.
pub struct Exporters {
    exporters: RwLock<HashMap<String, ExporterEntry>>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Exporters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporters").finish_non_exhaustive()
    }
}

impl Exporters {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Exporters {
            exporters: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Reconcile the exporter set against the configuration: instances whose
    /// config did not change are kept as-is, changed ones are replaced, new
    /// ones created and removed ones dropped.
    pub async fn reload(&self, configs: &[HttpExporterConfig]) -> Result<(), ExporterError> {
        let mut seen = HashMap::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            if seen.insert(config.name.clone(), config).is_some() {
                return Err(ExporterError::Configuration(format!(
                    "duplicate exporter name {:?}",
                    config.name
                )));
            }
        }
        let mut exporters = self.exporters.write().await;
        let mut next: HashMap<String, ExporterEntry> = HashMap::with_capacity(configs.len());
        for config in configs {
            match exporters.remove(&config.name) {
                Some(entry) if entry.config == *config => {
                    next.insert(config.name.clone(), entry);
                }
                _ => {
                    let exporter = HttpExporter::new(config.clone())?;
                    info!(exporter = %config.name, "http exporter configured");
                    next.insert(
                        config.name.clone(),
                        ExporterEntry {
                            config: config.clone(),
                            exporter: Arc::new(exporter),
                        },
                    );
                }
            }
        }
        for name in exporters.keys() {
            info!(exporter = %name, "http exporter removed");
        }
        *exporters = next;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.exporters.read().await.len()
    }

    /// Push one result to every exporter concurrently, counting
    /// per-exporter outcomes.
    pub async fn push(&self, result: &CheckResult) {
        let snapshot: Vec<Arc<dyn Exporter>> = self
            .exporters
            .read()
            .await
            .values()
            .map(|entry| entry.exporter.clone())
            .collect();
        let pushes = snapshot.iter().map(|exporter| exporter.push(result));
        for (exporter, outcome) in snapshot.iter().zip(join_all(pushes).await) {
            match outcome {
                Ok(()) => self.metrics.observe_exporter_push(exporter.name(), true),
                Err(err) => {
                    self.metrics.observe_exporter_push(exporter.name(), false);
                    error!(
                        exporter = %exporter.name(),
                        healthcheck = %result.name,
                        error = %err,
                        "failed to push result to exporter"
                    );
                }
            }
        }
    }
}

/// Start the dispatcher task consuming the fan-out channel. On cancellation
/// it drains whatever is already buffered, then stops.
pub fn spawn_dispatcher(
    mut receiver: mpsc::Receiver<CheckResult>,
    store: Arc<MemoryStore>,
    exporters: Arc<Exporters>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = receiver.recv() => match result {
                    Some(result) => result,
                    None => return,
                },
            };
            dispatch(&store, &exporters, result).await;
        }
        while let Ok(result) = receiver.try_recv() {
            dispatch(&store, &exporters, result).await;
        }
    })
}

async fn dispatch(store: &MemoryStore, exporters: &Exporters, result: CheckResult) {
    info!(
        healthcheck = %result.name,
        source = %result.source,
        success = result.success,
        duration_ms = result.duration,
        message = %result.message,
        "healthcheck result"
    );
    store.add(result.clone()).await;
    exporters.push(&result).await;
}
