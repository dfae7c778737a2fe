//! Per-source set reconciliation.
//!
//! A reconciler reduces the registry's view of one source to a desired set:
//! new checks are added, structurally identical ones are kept running
//! untouched, changed ones are replaced in place, and checks the source no
//! longer declares are removed. Both the old and the new name sets are
//! restricted to the reconciled source, so a configuration reload can never
//! evict a check installed through the API, and vice versa.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::healthcheck::{CheckBundle, CheckError, Source};
use crate::registry::Registry;

impl Registry {
    /// Reconcile one source against its desired set.
    ///
    /// The whole payload is validated up front; any validation failure
    /// aborts before the registry is touched, leaving the last good state
    /// running. `common_labels` are merged into each descriptor without
    /// clobbering keys the descriptor already sets.
    pub async fn reload_for_source(
        &self,
        source: Source,
        common_labels: Option<&HashMap<String, String>>,
        bundle: CheckBundle,
    ) -> Result<(), CheckError> {
        if bundle.has_one_off() {
            return Err(CheckError::Validation(
                "one-off healthchecks cannot be part of a reload".to_string(),
            ));
        }
        let mut configs = bundle.into_configs();
        let mut new_set: HashSet<String> = HashSet::with_capacity(configs.len());
        for config in &mut configs {
            let base = config.base_mut();
            base.source = source.clone();
            if let Some(labels) = common_labels {
                base.merge_labels(labels);
            }
            config.validate()?;
            if !new_set.insert(config.name().to_string()) {
                return Err(CheckError::Validation(format!(
                    "duplicate healthcheck name {:?}",
                    config.name()
                )));
            }
        }
        let old_set = self.source_names(&source).await;
        for config in configs {
            // Idempotent for structurally identical descriptors: the
            // running task is left alone.
            self.add(config.build()).await?;
        }
        self.remove_non_configured(old_set, &new_set).await;
        info!(source = %source, checks = new_set.len(), "healthchecks reloaded");
        Ok(())
    }
}
