//! Pull-based service discovery sources feeding the registry.

pub mod http;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use http::{HttpDiscovery, HttpDiscoveryConfig};

use crate::registry::Registry;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid discovery configuration: {0}")]
    Configuration(String),
    #[error("discovery setup failed: {0}")]
    Setup(String),
    #[error("discovery poller task failed: {0}")]
    Shutdown(#[from] tokio::task::JoinError),
}

struct PollerEntry {
    config: HttpDiscoveryConfig,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollerEntry {
    async fn stop(self) -> Result<(), DiscoveryError> {
        self.token.cancel();
        self.handle.await?;
        Ok(())
    }
}

/// The running set of HTTP discovery pollers, reloaded on configuration
/// reload: pollers with an unchanged config keep running, others are
/// stopped and respawned.
pub struct HttpDiscoveryPollers {
    registry: Arc<Registry>,
    pollers: Mutex<Vec<PollerEntry>>,
}

impl HttpDiscoveryPollers {
    pub fn new(registry: Arc<Registry>) -> Self {
        HttpDiscoveryPollers {
            registry,
            pollers: Mutex::new(Vec::new()),
        }
    }

    pub async fn reload(&self, configs: &[HttpDiscoveryConfig]) -> Result<(), DiscoveryError> {
        for config in configs {
            config.validate()?;
        }
        let mut names = std::collections::HashSet::new();
        for config in configs {
            if !names.insert(&config.name) {
                return Err(DiscoveryError::Configuration(format!(
                    "duplicate discovery name {:?}",
                    config.name
                )));
            }
        }
        let mut pollers = self.pollers.lock().await;
        let mut kept = Vec::with_capacity(configs.len());
        let mut stopped = Vec::new();
        for entry in pollers.drain(..) {
            if configs.iter().any(|config| *config == entry.config) {
                kept.push(entry);
            } else {
                stopped.push(entry);
            }
        }
        for entry in stopped {
            info!(discovery = %entry.config.name, "stopping http discovery poller");
            entry.stop().await?;
        }
        for config in configs {
            if kept.iter().any(|entry| entry.config == *config) {
                continue;
            }
            let poller = HttpDiscovery::new(config.clone(), self.registry.clone())?;
            let token = CancellationToken::new();
            let handle = poller.spawn(token.clone());
            info!(discovery = %config.name, "starting http discovery poller");
            kept.push(PollerEntry {
                config: config.clone(),
                token,
                handle,
            });
        }
        *pollers = kept;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.pollers.lock().await.len()
    }

    pub async fn stop(&self) -> Result<(), DiscoveryError> {
        let mut pollers = self.pollers.lock().await;
        let mut outcome = Ok(());
        for entry in pollers.drain(..) {
            if let Err(err) = entry.stop().await {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }
}
