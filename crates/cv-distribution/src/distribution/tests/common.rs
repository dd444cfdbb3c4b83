use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::distribution::domain::{
    ChannelCounters, ChannelId, ChannelRule, ItemId, SourceTag, Strategy, WeightedCapacityPolicy,
    WorkItem,
};
use crate::distribution::engine::{allocate, AllocationError, AllocationInput, AllocationPlan};
use crate::distribution::memory::{InMemoryDistributionStore, InMemoryRuleStore};
use crate::distribution::repository::{
    ChannelActivity, DistributionRecord, DistributionRecorder, RecorderError, RepositoryError,
    RuleStore,
};
use crate::distribution::sequencer::ShuffleSource;
use crate::distribution::service::{DistributionConfig, DistributionService};

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 6).expect("valid date")
}

pub(super) fn store() -> InMemoryDistributionStore {
    InMemoryDistributionStore::with_clock(today)
}

pub(super) fn items(count: usize) -> Vec<WorkItem> {
    (1..=count)
        .map(|index| WorkItem::new(format!("cv-{index:03}")))
        .collect()
}

/// Open rule weighted for the `other` source.
pub(super) fn weighted(channel: &str, priority: i32, weight: f64) -> ChannelRule {
    ChannelRule::open(channel, priority).with_weight(SourceTag::other(), weight)
}

pub(super) fn with_daily_limit(mut rule: ChannelRule, limit: u64) -> ChannelRule {
    rule.daily_limit = Some(limit);
    rule
}

pub(super) fn counters(entries: &[(&str, u64, u64)]) -> HashMap<ChannelId, ChannelCounters> {
    entries
        .iter()
        .map(|(channel, lifetime_count, today_count)| {
            (
                ChannelId::new(*channel),
                ChannelCounters {
                    lifetime_count: *lifetime_count,
                    today_count: *today_count,
                },
            )
        })
        .collect()
}

pub(super) struct EngineRun<'a> {
    pub(super) strategy: Strategy,
    pub(super) items: &'a [WorkItem],
    pub(super) rules: &'a [ChannelRule],
    pub(super) counters: HashMap<ChannelId, ChannelCounters>,
    pub(super) weighted_capacity: WeightedCapacityPolicy,
}

impl<'a> EngineRun<'a> {
    pub(super) fn new(strategy: Strategy, items: &'a [WorkItem], rules: &'a [ChannelRule]) -> Self {
        Self {
            strategy,
            items,
            rules,
            counters: HashMap::new(),
            weighted_capacity: WeightedCapacityPolicy::Enforce,
        }
    }

    pub(super) fn counters(mut self, counters: HashMap<ChannelId, ChannelCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub(super) fn capacity(mut self, policy: WeightedCapacityPolicy) -> Self {
        self.weighted_capacity = policy;
        self
    }

    pub(super) fn execute(&self, shuffle: &mut ShuffleSource) -> Result<AllocationPlan, AllocationError> {
        let source = SourceTag::other();
        let input = AllocationInput {
            strategy: self.strategy,
            items: self.items,
            rules: self.rules,
            source: &source,
            counters: &self.counters,
            weighted_capacity: self.weighted_capacity,
        };
        allocate(&input, shuffle.rng())
    }

    pub(super) fn run(&self) -> Result<AllocationPlan, AllocationError> {
        self.execute(&mut ShuffleSource::seeded(7))
    }
}

pub(super) fn count_for(plan: &AllocationPlan, channel: &str) -> u64 {
    plan.counts()
        .get(&ChannelId::new(channel))
        .copied()
        .unwrap_or(0)
}

pub(super) type TestService =
    DistributionService<InMemoryRuleStore, InMemoryDistributionStore, InMemoryDistributionStore>;

pub(super) fn seeded_config() -> DistributionConfig {
    DistributionConfig {
        seed: Some(2025),
        ..DistributionConfig::default()
    }
}

pub(super) fn build_service(
    rules: Vec<ChannelRule>,
    pending: Vec<WorkItem>,
    config: DistributionConfig,
) -> (TestService, Arc<InMemoryDistributionStore>) {
    let store = Arc::new(store());
    store.enqueue(pending).expect("enqueue items");
    let service = DistributionService::new(
        Arc::new(InMemoryRuleStore::new(rules)),
        store.clone(),
        store.clone(),
        config,
    );
    (service, store)
}

/// Recorder delegating to an in-memory store but refusing writes for chosen items.
#[derive(Clone)]
pub(super) struct FlakyRecorder {
    inner: Arc<InMemoryDistributionStore>,
    failing: HashSet<ItemId>,
    attempts: Arc<Mutex<Vec<DistributionRecord>>>,
}

impl FlakyRecorder {
    pub(super) fn new(inner: Arc<InMemoryDistributionStore>, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|id| ItemId::new(*id)).collect(),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(super) fn attempts(&self) -> Vec<DistributionRecord> {
        self.attempts.lock().expect("recorder mutex poisoned").clone()
    }
}

impl DistributionRecorder for FlakyRecorder {
    fn record(&self, record: DistributionRecord) -> Result<ChannelCounters, RecorderError> {
        self.attempts
            .lock()
            .expect("recorder mutex poisoned")
            .push(record.clone());
        if self.failing.contains(&record.item_id) {
            return Err(RecorderError::Unavailable("write timed out".to_string()));
        }
        self.inner.record(record)
    }

    fn counters(&self, channel: &ChannelId) -> Result<ChannelCounters, RecorderError> {
        self.inner.counters(channel)
    }

    fn activity(&self, channel: &ChannelId) -> Result<ChannelActivity, RecorderError> {
        self.inner.activity(channel)
    }

    fn release(&self, channel: &ChannelId, items: &[ItemId]) -> Result<usize, RecorderError> {
        self.inner.release(channel, items)
    }

    fn active_channel(&self, item: &ItemId) -> Result<Option<ChannelId>, RecorderError> {
        self.inner.active_channel(item)
    }
}

pub(super) struct UnavailableRules;

impl RuleStore for UnavailableRules {
    fn list_active_rules(&self) -> Result<Vec<ChannelRule>, RepositoryError> {
        Err(RepositoryError::Unavailable("rules table offline".to_string()))
    }

    fn list_rules(&self) -> Result<Vec<ChannelRule>, RepositoryError> {
        Err(RepositoryError::Unavailable("rules table offline".to_string()))
    }

    fn rule(&self, _channel: &ChannelId) -> Result<Option<ChannelRule>, RepositoryError> {
        Err(RepositoryError::Unavailable("rules table offline".to_string()))
    }
}

pub(super) fn distributed(entries: &[(&str, u64)]) -> BTreeMap<ChannelId, u64> {
    entries
        .iter()
        .map(|(channel, count)| (ChannelId::new(*channel), *count))
        .collect()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
