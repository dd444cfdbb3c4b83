use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    AssignmentOrigin, CapacityLimits, ChannelCounters, ChannelId, ChannelRule, ItemId, WorkItem,
};

/// Read access to channel rules so the service can be exercised in isolation.
pub trait RuleStore: Send + Sync {
    /// Rules with `is_active` set, in store order.
    fn list_active_rules(&self) -> Result<Vec<ChannelRule>, RepositoryError>;
    /// Every rule, active or not, in store order.
    fn list_rules(&self) -> Result<Vec<ChannelRule>, RepositoryError>;
    fn rule(&self, channel: &ChannelId) -> Result<Option<ChannelRule>, RepositoryError>;
}

/// Producer of candidate records that have no active assignment yet.
pub trait WorkItemSource: Send + Sync {
    fn pending(&self, limit: usize) -> Result<Vec<WorkItem>, RepositoryError>;
}

/// Error enumeration for rule store and item source failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// One per-item write handed to the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub item_id: ItemId,
    pub channel_id: ChannelId,
    pub origin: AssignmentOrigin,
    /// Limits the recorder must hold atomically while committing; unbounded skips the check.
    pub limits: CapacityLimits,
    pub metadata: BTreeMap<String, String>,
}

/// Per-channel activity for stats views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelActivity {
    pub counters: ChannelCounters,
    pub assigned_today: u64,
    pub removed_today: u64,
}

/// Persistence of assignment outcomes and the counters the capacity guard consumes.
pub trait DistributionRecorder: Send + Sync {
    /// Commit one assignment as a conditional increment: when `record.limits` would be
    /// exceeded the write is refused with [`RecorderError::CapacityExceeded`]. A manual record
    /// for an item that already holds an active assignment moves it, releasing the old one;
    /// an automatic one is refused with [`RecorderError::AlreadyAssigned`].
    fn record(&self, record: DistributionRecord) -> Result<ChannelCounters, RecorderError>;

    /// Batched form of [`record`](Self::record); one result per input, same order.
    fn record_batch(
        &self,
        records: Vec<DistributionRecord>,
    ) -> Vec<Result<ChannelCounters, RecorderError>> {
        records.into_iter().map(|record| self.record(record)).collect()
    }

    fn counters(&self, channel: &ChannelId) -> Result<ChannelCounters, RecorderError>;

    fn activity(&self, channel: &ChannelId) -> Result<ChannelActivity, RecorderError>;

    /// Release the active assignments of `items` on `channel`; returns how many were released.
    fn release(&self, channel: &ChannelId, items: &[ItemId]) -> Result<usize, RecorderError>;

    /// Channel currently holding `item`, if any.
    fn active_channel(&self, item: &ItemId) -> Result<Option<ChannelId>, RecorderError>;
}

/// Recorder failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("channel {channel} is at capacity")]
    CapacityExceeded { channel: ChannelId },
    #[error("item {item} is already assigned to {channel}")]
    AlreadyAssigned { item: ItemId, channel: ChannelId },
    #[error("recorder unavailable: {0}")]
    Unavailable(String),
}
