//! In-memory collaborators used by the CLI, the HTTP service, and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{Local, NaiveDate};

use super::capacity::has_room;
use super::domain::{
    AssignmentOrigin, ChannelCounters, ChannelId, ChannelRule, ItemId, SourceTag, WorkItem,
};
use super::repository::{
    ChannelActivity, DistributionRecord, DistributionRecorder, RecorderError, RepositoryError,
    RuleStore, WorkItemSource,
};

/// Default sales channels: eleven pages, the first three sharing the weight.
pub fn default_channel_rules() -> Vec<ChannelRule> {
    const CHANNELS: usize = 11;
    let weights: [(f64, f64); 3] = [(33.33, 33.33), (33.33, 33.33), (33.34, 33.34)];

    (0..CHANNELS)
        .map(|index| {
            let (google, other) = weights.get(index).copied().unwrap_or((0.0, 0.0));
            ChannelRule::open(format!("sales{}", index + 1), (CHANNELS - index) as i32)
                .with_weight(SourceTag::google(), google)
                .with_weight(SourceTag::other(), other)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<Vec<ChannelRule>>,
}

impl InMemoryRuleStore {
    pub fn new(rules: Vec<ChannelRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn with_default_rules() -> Self {
        Self::new(default_channel_rules())
    }

    /// Insert or replace the rule for `rule.channel_id`.
    pub fn upsert(&self, rule: ChannelRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().map_err(|_| poisoned_rules())?;
        match rules.iter_mut().find(|existing| existing.channel_id == rule.channel_id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }
}

fn poisoned_rules() -> RepositoryError {
    RepositoryError::Unavailable("rule store lock poisoned".to_string())
}

impl RuleStore for InMemoryRuleStore {
    fn list_active_rules(&self) -> Result<Vec<ChannelRule>, RepositoryError> {
        let rules = self.rules.read().map_err(|_| poisoned_rules())?;
        Ok(rules.iter().filter(|rule| rule.is_active).cloned().collect())
    }

    fn list_rules(&self) -> Result<Vec<ChannelRule>, RepositoryError> {
        let rules = self.rules.read().map_err(|_| poisoned_rules())?;
        Ok(rules.clone())
    }

    fn rule(&self, channel: &ChannelId) -> Result<Option<ChannelRule>, RepositoryError> {
        let rules = self.rules.read().map_err(|_| poisoned_rules())?;
        Ok(rules.iter().find(|rule| &rule.channel_id == channel).cloned())
    }
}

#[derive(Debug, Clone)]
struct Assignment {
    item_id: ItemId,
    channel_id: ChannelId,
    origin: AssignmentOrigin,
    assigned_on: NaiveDate,
    removed_on: Option<NaiveDate>,
    metadata: BTreeMap<String, String>,
}

impl Assignment {
    fn is_active(&self) -> bool {
        self.removed_on.is_none()
    }
}

/// Queue keyed by item id plus the assignment ledger and its index of active assignments.
#[derive(Debug, Default)]
struct StoreState {
    items: Vec<WorkItem>,
    queued: HashSet<ItemId>,
    assignments: Vec<Assignment>,
    active: HashMap<ItemId, usize>,
}

impl StoreState {
    fn active_index(&self, item: &ItemId) -> Option<usize> {
        self.active.get(item).copied()
    }

    /// Queue items whose id has not been seen before; returns how many were accepted.
    fn enqueue<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let mut accepted = 0;
        for item in items {
            if self.queued.insert(item.id.clone()) {
                self.items.push(item);
                accepted += 1;
            }
        }
        accepted
    }

    fn commit(
        &mut self,
        record: DistributionRecord,
        today: NaiveDate,
    ) -> Result<ChannelCounters, RecorderError> {
        let previous = self.active_index(&record.item_id);
        if let (Some(index), AssignmentOrigin::Auto(_)) = (previous, record.origin) {
            return Err(RecorderError::AlreadyAssigned {
                item: record.item_id,
                channel: self.assignments[index].channel_id.clone(),
            });
        }

        // an item re-assigned to its current channel must not count against itself
        let excluding =
            previous.filter(|&index| self.assignments[index].channel_id == record.channel_id);
        let counters = self.counters(&record.channel_id, today, excluding);
        if !has_room(&record.limits, &counters) {
            return Err(RecorderError::CapacityExceeded {
                channel: record.channel_id,
            });
        }

        if let Some(index) = previous {
            self.assignments[index].removed_on = Some(today);
        }

        self.active
            .insert(record.item_id.clone(), self.assignments.len());
        self.assignments.push(Assignment {
            item_id: record.item_id,
            channel_id: record.channel_id.clone(),
            origin: record.origin,
            assigned_on: today,
            removed_on: None,
            metadata: record.metadata,
        });

        Ok(self.counters(&record.channel_id, today, None))
    }

    fn counters(
        &self,
        channel: &ChannelId,
        today: NaiveDate,
        excluding: Option<usize>,
    ) -> ChannelCounters {
        let mut counters = ChannelCounters::default();
        for (index, assignment) in self.assignments.iter().enumerate() {
            if Some(index) == excluding
                || !assignment.is_active()
                || &assignment.channel_id != channel
            {
                continue;
            }
            counters.lifetime_count += 1;
            if assignment.assigned_on == today {
                counters.today_count += 1;
            }
        }
        counters
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Work-item queue and distribution ledger behind a single lock, so every commit is an atomic
/// check-and-increment against the channel counters.
#[derive(Clone)]
pub struct InMemoryDistributionStore {
    state: Arc<Mutex<StoreState>>,
    clock: Clock,
}

impl Default for InMemoryDistributionStore {
    fn default() -> Self {
        Self::with_clock(|| Local::now().date_naive())
    }
}

impl std::fmt::Debug for InMemoryDistributionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDistributionStore").finish_non_exhaustive()
    }
}

impl InMemoryDistributionStore {
    /// Store whose "today" comes from `clock`; counters reset when the date changes.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            clock: Arc::new(clock),
        }
    }

    /// Queue work items for distribution. An id that was queued before is skipped; returns
    /// how many items were accepted.
    pub fn enqueue<I>(&self, items: I) -> Result<usize, RecorderError>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let mut state = self.lock()?;
        Ok(state.enqueue(items))
    }

    /// Origin and metadata of the active assignment for `item`.
    pub fn assignment_details(
        &self,
        item: &ItemId,
    ) -> Result<Option<(AssignmentOrigin, BTreeMap<String, String>)>, RecorderError> {
        let state = self.lock()?;
        Ok(state.active_index(item).map(|index| {
            let assignment = &state.assignments[index];
            (assignment.origin, assignment.metadata.clone())
        }))
    }

    fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RecorderError> {
        self.state
            .lock()
            .map_err(|_| RecorderError::Unavailable("distribution store lock poisoned".to_string()))
    }
}

impl WorkItemSource for InMemoryDistributionStore {
    fn pending(&self, limit: usize) -> Result<Vec<WorkItem>, RepositoryError> {
        let state = self
            .lock()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        Ok(state
            .items
            .iter()
            .filter(|item| state.active_index(&item.id).is_none())
            .take(limit)
            .cloned()
            .collect())
    }
}

impl DistributionRecorder for InMemoryDistributionStore {
    fn record(&self, record: DistributionRecord) -> Result<ChannelCounters, RecorderError> {
        let today = self.today();
        let mut state = self.lock()?;
        state.commit(record, today)
    }

    /// Commits the whole batch under one lock acquisition.
    fn record_batch(
        &self,
        records: Vec<DistributionRecord>,
    ) -> Vec<Result<ChannelCounters, RecorderError>> {
        let today = self.today();
        match self.lock() {
            Ok(mut state) => records
                .into_iter()
                .map(|record| state.commit(record, today))
                .collect(),
            Err(error) => records.iter().map(|_| Err(error.clone())).collect(),
        }
    }

    fn counters(&self, channel: &ChannelId) -> Result<ChannelCounters, RecorderError> {
        let today = self.today();
        let state = self.lock()?;
        Ok(state.counters(channel, today, None))
    }

    fn activity(&self, channel: &ChannelId) -> Result<ChannelActivity, RecorderError> {
        let today = self.today();
        let state = self.lock()?;
        let mut activity = ChannelActivity {
            counters: state.counters(channel, today, None),
            ..ChannelActivity::default()
        };
        for assignment in state
            .assignments
            .iter()
            .filter(|assignment| &assignment.channel_id == channel)
        {
            if assignment.assigned_on == today {
                activity.assigned_today += 1;
            }
            if assignment.removed_on == Some(today) {
                activity.removed_today += 1;
            }
        }
        Ok(activity)
    }

    fn release(&self, channel: &ChannelId, items: &[ItemId]) -> Result<usize, RecorderError> {
        let today = self.today();
        let mut state = self.lock()?;
        let StoreState {
            assignments,
            active,
            ..
        } = &mut *state;
        let mut released = 0;
        for item in items {
            let Some(&index) = active.get(item) else {
                continue;
            };
            if &assignments[index].channel_id != channel {
                continue;
            }
            assignments[index].removed_on = Some(today);
            active.remove(item);
            released += 1;
        }
        Ok(released)
    }

    fn active_channel(&self, item: &ItemId) -> Result<Option<ChannelId>, RecorderError> {
        let state = self.lock()?;
        Ok(state
            .active_index(item)
            .map(|index| state.assignments[index].channel_id.clone()))
    }
}
