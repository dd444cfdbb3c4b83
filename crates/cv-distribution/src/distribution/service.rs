use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::capacity::remaining;
use super::domain::{
    AllocationDecision, ApportionmentEntry, AssignmentOrigin, CapacityLimits, ChannelCounters,
    ChannelId, ChannelRule, ItemId, SourceTag, Strategy, WeightedCapacityPolicy,
};
use super::eligibility::is_open;
use super::engine::{allocate, rule_order, AllocationError, AllocationInput, AllocationPlan};
use super::repository::{
    DistributionRecord, DistributionRecorder, RecorderError, RepositoryError, RuleStore,
    WorkItemSource,
};
use super::sequencer::ShuffleSource;

/// Defaults applied when a request leaves a field out.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionConfig {
    pub default_strategy: Strategy,
    pub batch_size: usize,
    pub default_source: SourceTag,
    pub weighted_capacity: WeightedCapacityPolicy,
    pub seed: Option<u64>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::Weighted,
            batch_size: 100,
            default_source: SourceTag::other(),
            weighted_capacity: WeightedCapacityPolicy::Enforce,
            seed: None,
        }
    }
}

/// Trigger for one automatic run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub traffic_source: Option<String>,
}

/// A decided item the recorder refused to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub channel_id: ChannelId,
    pub reason: String,
}

/// Outcome of one automatic run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub strategy: Strategy,
    pub traffic_source: SourceTag,
    pub requested: usize,
    /// Successfully recorded items per channel.
    pub distributed: BTreeMap<ChannelId, u64>,
    pub succeeded: u64,
    pub failed: Vec<ItemFailure>,
    pub unassigned: Vec<ItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apportionment: Option<Vec<ApportionmentEntry>>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAssignment {
    pub item_ids: Vec<ItemId>,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAssignmentReceipt {
    pub channel_id: ChannelId,
    pub assigned: usize,
    pub failed: Vec<ItemFailure>,
    pub counters: ChannelCounters,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    pub item_ids: Vec<ItemId>,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReceipt {
    pub channel_id: ChannelId,
    pub removed: usize,
    pub message: String,
}

/// Per-channel view for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub channel_id: ChannelId,
    pub priority: i32,
    pub is_active: bool,
    pub auto_distribute_enabled: bool,
    pub active_count: u64,
    pub today_count: u64,
    pub assigned_today: u64,
    pub removed_today: u64,
    pub daily_limit: Option<u64>,
    pub total_limit: Option<u64>,
    /// Items the channel can still take today; `None` when unbounded.
    pub remaining: Option<u64>,
    pub weight_by_source: BTreeMap<SourceTag, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub channels: Vec<ChannelStats>,
    pub total_active: u64,
    pub assigned_today: u64,
    pub removed_today: u64,
}

/// Service wiring the rule store, item source, and recorder around the allocation engine.
pub struct DistributionService<R, S, D> {
    rules: Arc<R>,
    items: Arc<S>,
    recorder: Arc<D>,
    config: DistributionConfig,
    shuffle: Mutex<ShuffleSource>,
}

impl<R, S, D> DistributionService<R, S, D>
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    pub fn new(rules: Arc<R>, items: Arc<S>, recorder: Arc<D>, config: DistributionConfig) -> Self {
        let shuffle = Mutex::new(ShuffleSource::from_optional_seed(config.seed));
        Self {
            rules,
            items,
            recorder,
            config,
            shuffle,
        }
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Pull a batch of pending items, plan their channels, and record every decision.
    pub fn run(
        &self,
        request: AllocationRequest,
    ) -> Result<AllocationReport, DistributionServiceError> {
        let strategy = request.strategy.unwrap_or(self.config.default_strategy);
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        let source = request
            .traffic_source
            .as_deref()
            .map(SourceTag::new)
            .unwrap_or_else(|| self.config.default_source.clone());

        let rules = self
            .rules
            .list_active_rules()
            .map_err(DistributionServiceError::Rules)?;
        if !rules.iter().any(is_open) {
            return Err(AllocationError::NoEligibleChannels.into());
        }

        let items = self
            .items
            .pending(batch_size)
            .map_err(DistributionServiceError::Items)?;

        if items.is_empty() {
            info!(%strategy, %source, "no pending items to distribute");
            return Ok(AllocationReport {
                strategy,
                traffic_source: source,
                requested: 0,
                distributed: BTreeMap::new(),
                succeeded: 0,
                failed: Vec::new(),
                unassigned: Vec::new(),
                apportionment: None,
                message: "No new items to distribute".to_string(),
            });
        }

        let counters = self.snapshot(&rules)?;
        let input = AllocationInput {
            strategy,
            items: &items,
            rules: &rules,
            source: &source,
            counters: &counters,
            weighted_capacity: self.config.weighted_capacity,
        };

        let plan = {
            let mut shuffle = self.shuffle.lock().unwrap_or_else(PoisonError::into_inner);
            allocate(&input, shuffle.rng())?
        };

        let report = self.commit(plan, &rules, &source, items.len());
        info!(
            strategy = %report.strategy,
            source = %report.traffic_source,
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            unassigned = report.unassigned.len(),
            "distribution run complete"
        );
        Ok(report)
    }

    /// Assign an explicit list of items to one channel, all or nothing against its limits.
    pub fn assign(
        &self,
        assignment: ManualAssignment,
    ) -> Result<ManualAssignmentReceipt, DistributionServiceError> {
        if assignment.item_ids.is_empty() {
            return Err(DistributionServiceError::EmptySelection);
        }

        let channel = assignment.channel_id;
        let rule = self
            .rules
            .rule(&channel)
            .map_err(DistributionServiceError::Rules)?
            .ok_or_else(|| DistributionServiceError::UnknownChannel(channel.clone()))?;
        if !rule.is_active {
            return Err(DistributionServiceError::InactiveChannel(channel));
        }

        // items already on this channel are re-confirmed, not added
        let mut requested = 0;
        for item_id in &assignment.item_ids {
            if self.recorder.active_channel(item_id)?.as_ref() != Some(&channel) {
                requested += 1;
            }
        }
        let counters = self.recorder.counters(&channel)?;
        if let Some(limit) = rule.daily_limit {
            if counters.today_count + requested > limit {
                return Err(DistributionServiceError::DailyLimitExceeded {
                    channel,
                    limit,
                    current: counters.today_count,
                    requested,
                });
            }
        }
        if let Some(limit) = rule.total_limit {
            if counters.lifetime_count + requested > limit {
                return Err(DistributionServiceError::TotalLimitExceeded {
                    channel,
                    limit,
                    current: counters.lifetime_count,
                    requested,
                });
            }
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("method".to_string(), "manual".to_string());
        if let Some(notes) = assignment.notes.filter(|notes| !notes.trim().is_empty()) {
            metadata.insert("notes".to_string(), notes);
        }

        let records: Vec<DistributionRecord> = assignment
            .item_ids
            .iter()
            .map(|item_id| DistributionRecord {
                item_id: item_id.clone(),
                channel_id: channel.clone(),
                origin: AssignmentOrigin::Manual,
                limits: rule.limits(),
                metadata: metadata.clone(),
            })
            .collect();

        let mut assigned = 0;
        let mut failed = Vec::new();
        for (item_id, result) in assignment
            .item_ids
            .into_iter()
            .zip(self.recorder.record_batch(records))
        {
            match result {
                Ok(_) => assigned += 1,
                Err(error) => {
                    warn!(item = %item_id, channel = %channel, %error, "manual assignment failed");
                    failed.push(ItemFailure {
                        item_id,
                        channel_id: channel.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        let counters = self.recorder.counters(&channel)?;
        info!(channel = %channel, assigned, failed = failed.len(), "manual assignment recorded");
        Ok(ManualAssignmentReceipt {
            message: format!("Assigned {assigned} item(s) to {channel}"),
            channel_id: channel,
            assigned,
            failed,
            counters,
        })
    }

    /// Release the given items from a channel.
    pub fn remove(&self, removal: Removal) -> Result<RemovalReceipt, DistributionServiceError> {
        if removal.item_ids.is_empty() {
            return Err(DistributionServiceError::EmptySelection);
        }

        let removed = self.recorder.release(&removal.channel_id, &removal.item_ids)?;
        info!(
            channel = %removal.channel_id,
            removed,
            reason = removal.reason.as_deref().unwrap_or("unspecified"),
            "items removed from channel"
        );
        Ok(RemovalReceipt {
            message: format!("Removed {removed} item(s) from {}", removal.channel_id),
            channel_id: removal.channel_id,
            removed,
        })
    }

    /// Counters and limits for every channel, in rule order.
    pub fn stats(&self) -> Result<DistributionStats, DistributionServiceError> {
        let rules = self.rules().map_err(DistributionServiceError::Rules)?;
        let mut stats = DistributionStats {
            channels: Vec::with_capacity(rules.len()),
            total_active: 0,
            assigned_today: 0,
            removed_today: 0,
        };

        for rule in rules {
            let activity = self.recorder.activity(&rule.channel_id)?;
            stats.total_active += activity.counters.lifetime_count;
            stats.assigned_today += activity.assigned_today;
            stats.removed_today += activity.removed_today;
            stats.channels.push(ChannelStats {
                remaining: remaining(&rule.limits(), &activity.counters),
                channel_id: rule.channel_id,
                priority: rule.priority,
                is_active: rule.is_active,
                auto_distribute_enabled: rule.auto_distribute_enabled,
                active_count: activity.counters.lifetime_count,
                today_count: activity.counters.today_count,
                assigned_today: activity.assigned_today,
                removed_today: activity.removed_today,
                daily_limit: rule.daily_limit,
                total_limit: rule.total_limit,
                weight_by_source: rule.weight_by_source,
            });
        }

        Ok(stats)
    }

    /// Every rule, highest priority first.
    pub fn rules(&self) -> Result<Vec<ChannelRule>, RepositoryError> {
        let rules = self.rules.list_rules()?;
        Ok(rule_order(&rules).into_iter().cloned().collect())
    }

    fn snapshot(
        &self,
        rules: &[ChannelRule],
    ) -> Result<HashMap<ChannelId, ChannelCounters>, DistributionServiceError> {
        let mut counters = HashMap::with_capacity(rules.len());
        for rule in rules {
            counters.insert(rule.channel_id.clone(), self.recorder.counters(&rule.channel_id)?);
        }
        Ok(counters)
    }

    /// Limits the recorder re-checks at commit time.
    fn commit_limits(&self, strategy: Strategy, rule: Option<&ChannelRule>) -> CapacityLimits {
        let guarded = strategy.enforces_capacity()
            || (strategy == Strategy::Weighted
                && self.config.weighted_capacity == WeightedCapacityPolicy::Enforce);
        match rule {
            Some(rule) if guarded => rule.limits(),
            _ => CapacityLimits::UNBOUNDED,
        }
    }

    fn commit(
        &self,
        plan: AllocationPlan,
        rules: &[ChannelRule],
        source: &SourceTag,
        requested: usize,
    ) -> AllocationReport {
        let by_channel: HashMap<&ChannelId, &ChannelRule> =
            rules.iter().map(|rule| (&rule.channel_id, rule)).collect();
        let strategy = plan.strategy;

        let records: Vec<DistributionRecord> = plan
            .decisions
            .iter()
            .enumerate()
            .map(|(position, decision)| {
                let mut metadata = BTreeMap::new();
                metadata.insert("method".to_string(), "auto".to_string());
                metadata.insert("strategy".to_string(), strategy.label().to_string());
                metadata.insert("traffic_source".to_string(), source.to_string());
                metadata.insert("position".to_string(), position.to_string());
                DistributionRecord {
                    item_id: decision.item_id.clone(),
                    channel_id: decision.channel_id.clone(),
                    origin: AssignmentOrigin::Auto(strategy),
                    limits: self
                        .commit_limits(strategy, by_channel.get(&decision.channel_id).copied()),
                    metadata,
                }
            })
            .collect();

        let results = self.recorder.record_batch(records);

        let mut distributed = BTreeMap::new();
        let mut succeeded = 0;
        let mut failed = Vec::new();
        for (AllocationDecision { item_id, channel_id }, result) in
            plan.decisions.into_iter().zip(results)
        {
            match result {
                Ok(_) => {
                    *distributed.entry(channel_id).or_insert(0) += 1;
                    succeeded += 1;
                }
                Err(error) => {
                    warn!(item = %item_id, channel = %channel_id, %error, "failed to record distribution");
                    failed.push(ItemFailure {
                        item_id,
                        channel_id,
                        reason: error.to_string(),
                    });
                }
            }
        }

        let mut message = format!("Distributed {succeeded} of {requested} item(s) using {strategy}");
        if !failed.is_empty() {
            message.push_str(&format!(", {} failed", failed.len()));
        }
        if !plan.unassigned.is_empty() {
            message.push_str(&format!(", {} left unassigned", plan.unassigned.len()));
        }

        AllocationReport {
            strategy,
            traffic_source: source.clone(),
            requested,
            distributed,
            succeeded,
            failed,
            unassigned: plan.unassigned,
            apportionment: plan.apportionment,
            message,
        }
    }
}

/// Error raised by the distribution service.
#[derive(Debug, thiserror::Error)]
pub enum DistributionServiceError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("rule store failure: {0}")]
    Rules(#[source] RepositoryError),
    #[error("item source failure: {0}")]
    Items(#[source] RepositoryError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error("no items selected")]
    EmptySelection,
    #[error("channel {0} does not exist")]
    UnknownChannel(ChannelId),
    #[error("channel {0} is inactive")]
    InactiveChannel(ChannelId),
    #[error("daily limit exceeded for {channel}: {current}/{limit}, cannot add {requested}")]
    DailyLimitExceeded {
        channel: ChannelId,
        limit: u64,
        current: u64,
        requested: u64,
    },
    #[error("total limit exceeded for {channel}: {current}/{limit}, cannot add {requested}")]
    TotalLimitExceeded {
        channel: ChannelId,
        limit: u64,
        current: u64,
        requested: u64,
    },
}

impl DistributionServiceError {
    /// Whether the caller sent something that can never succeed as-is.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Allocation(AllocationError::NoEligibleChannels)
                | Self::EmptySelection
                | Self::UnknownChannel(_)
                | Self::InactiveChannel(_)
                | Self::DailyLimitExceeded { .. }
                | Self::TotalLimitExceeded { .. }
        )
    }
}
