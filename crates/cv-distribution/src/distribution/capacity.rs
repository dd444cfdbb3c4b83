//! Capacity checks against a snapshot of channel counters.

use std::collections::HashMap;

use super::domain::{CapacityLimits, ChannelCounters, ChannelId};

/// `true` when neither the lifetime nor the daily ceiling has been reached.
pub fn has_room(limits: &CapacityLimits, counters: &ChannelCounters) -> bool {
    remaining(limits, counters) != Some(0)
}

/// Items the channel can still take, or `None` when it is unbounded.
pub fn remaining(limits: &CapacityLimits, counters: &ChannelCounters) -> Option<u64> {
    let total = limits
        .total_limit
        .map(|limit| limit.saturating_sub(counters.lifetime_count));
    let daily = limits
        .daily_limit
        .map(|limit| limit.saturating_sub(counters.today_count));

    match (total, daily) {
        (Some(total), Some(daily)) => Some(total.min(daily)),
        (Some(total), None) => Some(total),
        (None, Some(daily)) => Some(daily),
        (None, None) => None,
    }
}

/// Running per-channel counters for one allocation pass.
///
/// Seeded from the recorder snapshot and bumped locally on every accepted item, so a channel
/// that fills up mid-batch stops receiving items within the same run.
#[derive(Debug, Clone, Default)]
pub struct RunningCounters {
    counters: HashMap<ChannelId, ChannelCounters>,
}

impl RunningCounters {
    pub fn new(snapshot: HashMap<ChannelId, ChannelCounters>) -> Self {
        Self { counters: snapshot }
    }

    pub fn get(&self, channel: &ChannelId) -> ChannelCounters {
        self.counters.get(channel).copied().unwrap_or_default()
    }

    pub fn has_room(&self, channel: &ChannelId, limits: &CapacityLimits) -> bool {
        has_room(limits, &self.get(channel))
    }

    pub fn remaining(&self, channel: &ChannelId, limits: &CapacityLimits) -> Option<u64> {
        remaining(limits, &self.get(channel))
    }

    pub fn accept(&mut self, channel: &ChannelId) {
        self.counters.entry(channel.clone()).or_default().record_one();
    }
}
