//! Daemon wiring: build every component, reload on demand, stop gracefully.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{ApiServer, AppState, ServerError};
use crate::config::{Config, ConfigError};
use crate::discovery::{DiscoveryError, HttpDiscoveryPollers};
use crate::exporter::{spawn_dispatcher, Exporters, ExporterError};
use crate::healthcheck::{CheckError, Source};
use crate::memorystore::{spawn_purge_task, MemoryStore, DEFAULT_PURGE_INTERVAL, DEFAULT_TTL};
use crate::metrics::{Metrics, MetricsError};
use crate::registry::Registry;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error(transparent)]
    Exporter(#[from] ExporterError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("shutdown failed: {0}")]
    Shutdown(#[from] tokio::task::JoinError),
}

pub struct Daemon {
    config_path: PathBuf,
    current: Mutex<Config>,
    registry: Arc<Registry>,
    store: Arc<MemoryStore>,
    metrics: Arc<Metrics>,
    exporters: Arc<Exporters>,
    discovery: HttpDiscoveryPollers,
    api: Mutex<Option<ApiServer>>,
    dispatcher: JoinHandle<()>,
    purge: JoinHandle<()>,
    token: CancellationToken,
}

impl Daemon {
    /// Build and start every component: metrics, registry, store,
    /// dispatcher, purge task, initial configuration reconcile, discovery
    /// pollers and the API server.
    pub async fn start(config: Config, config_path: PathBuf) -> Result<Daemon, DaemonError> {
        let metrics = Arc::new(Metrics::new(&config.labels)?);
        let (registry, receiver) = Registry::new(metrics.clone(), config.result_buffer);
        let store = Arc::new(MemoryStore::new(DEFAULT_TTL));
        let exporters = Arc::new(Exporters::new(metrics.clone()));
        exporters.reload(&config.exporters.http).await?;
        let token = CancellationToken::new();
        let dispatcher = spawn_dispatcher(
            receiver,
            store.clone(),
            exporters.clone(),
            token.child_token(),
        );
        let purge = spawn_purge_task(store.clone(), DEFAULT_PURGE_INTERVAL, token.child_token());
        registry
            .reload_for_source(Source::Configuration, None, config.checks.clone())
            .await?;
        let discovery = HttpDiscoveryPollers::new(registry.clone());
        discovery.reload(&config.discovery.http).await?;
        let state = AppState {
            registry: registry.clone(),
            store: store.clone(),
            metrics: metrics.clone(),
        };
        let api = ApiServer::spawn(&config.http, state).await?;
        info!("daemon started");
        Ok(Daemon {
            config_path,
            current: Mutex::new(config),
            registry,
            store,
            metrics,
            exporters,
            discovery,
            api: Mutex::new(Some(api)),
            dispatcher,
            purge,
            token,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Re-read the configuration file and reconcile every subsystem. A
    /// failure leaves the last good state running.
    pub async fn reload(&self) -> Result<(), DaemonError> {
        let new_config = Config::load(&self.config_path)?;
        let mut current = self.current.lock().await;
        info!("reloading configuration");
        self.exporters.reload(&new_config.exporters.http).await?;
        // Only a change of the front-end sub-configuration restarts the API
        // server.
        if new_config.http != current.http {
            let state = AppState {
                registry: self.registry.clone(),
                store: self.store.clone(),
                metrics: self.metrics.clone(),
            };
            let mut api = self.api.lock().await;
            if let Some(old) = api.take() {
                old.stop().await?;
            }
            *api = Some(ApiServer::spawn(&new_config.http, state).await?);
        }
        self.discovery.reload(&new_config.discovery.http).await?;
        self.registry
            .reload_for_source(Source::Configuration, None, new_config.checks.clone())
            .await?;
        *current = new_config;
        Ok(())
    }

    /// Graceful stop: cancel every scheduled task and wait for completion,
    /// stop the pollers and the API server, then let the dispatcher drain.
    /// Every component is stopped even when one fails; the first failure is
    /// reported so the process can exit non-zero.
    pub async fn stop(self) -> Result<(), DaemonError> {
        info!("stopping the daemon");
        let mut outcome: Result<(), DaemonError> = Ok(());
        let mut record = |err: DaemonError| {
            if outcome.is_ok() {
                outcome = Err(err);
            }
        };
        self.registry.stop().await;
        if let Err(err) = self.discovery.stop().await {
            record(err.into());
        }
        if let Some(api) = self.api.lock().await.take() {
            if let Err(err) = api.stop().await {
                record(err.into());
            }
        }
        self.token.cancel();
        if let Err(err) = self.dispatcher.await {
            record(err.into());
        }
        if let Err(err) = self.purge.await {
            record(err.into());
        }
        if outcome.is_ok() {
            info!("daemon stopped");
        }
        outcome
    }
}
