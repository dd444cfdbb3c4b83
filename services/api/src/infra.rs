use cv_distribution::config::DistributionSettings;
use cv_distribution::distribution::{
    default_channel_rules, load_rules, DistributionService, InMemoryDistributionStore,
    InMemoryRuleStore, WorkItem,
};
use cv_distribution::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type AppDistributionService =
    DistributionService<InMemoryRuleStore, InMemoryDistributionStore, InMemoryDistributionStore>;

/// Service plus a handle on the store that backs both its item source and recorder.
pub(crate) struct DistributionStack {
    pub(crate) service: Arc<AppDistributionService>,
    pub(crate) store: Arc<InMemoryDistributionStore>,
}

/// Rules come from `settings.rules_path` when set, otherwise the default sales channels.
pub(crate) fn build_distribution(
    settings: &DistributionSettings,
    pending: Vec<WorkItem>,
) -> Result<DistributionStack, AppError> {
    let rules = match &settings.rules_path {
        Some(path) => {
            let rules = load_rules(path)?;
            info!(path = %path.display(), count = rules.len(), "loaded channel rules");
            rules
        }
        None => default_channel_rules(),
    };

    let store = Arc::new(InMemoryDistributionStore::default());
    store
        .enqueue(pending)
        .map_err(|err| AppError::Distribution(err.into()))?;

    let service = Arc::new(DistributionService::new(
        Arc::new(InMemoryRuleStore::new(rules)),
        store.clone(),
        store.clone(),
        settings.service.clone(),
    ));

    Ok(DistributionStack { service, store })
}
