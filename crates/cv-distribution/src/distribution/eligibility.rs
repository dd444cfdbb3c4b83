//! Channel gates and per-item filters applied before any strategy runs.

use super::domain::{ChannelRule, SourceTag, WorkItem};

/// Channel-level gate shared by the automatic strategies.
pub fn is_open(rule: &ChannelRule) -> bool {
    rule.is_active && rule.auto_distribute_enabled
}

/// Item-level filters. A rule without a filter on a field imposes nothing on that field.
///
/// Nationality must match exactly; position must contain the filter as a case-sensitive
/// substring. An item missing the filtered field never matches.
pub fn matches_filters(rule: &ChannelRule, item: &WorkItem) -> bool {
    if let Some(required) = rule.nationality_filter.as_deref() {
        if item.nationality.as_deref() != Some(required) {
            return false;
        }
    }

    if let Some(fragment) = rule.position_substring_filter.as_deref() {
        match item.position.as_deref() {
            Some(position) if position.contains(fragment) => {}
            _ => return false,
        }
    }

    true
}

/// Whether `rule` may legally receive `item` under an automatic strategy.
pub fn accepts(rule: &ChannelRule, item: &WorkItem) -> bool {
    is_open(rule) && matches_filters(rule, item)
}

/// Channel-level preflight for WEIGHTED: open and carrying a positive weight for `source`.
pub fn has_positive_weight(rule: &ChannelRule, source: &SourceTag) -> bool {
    is_open(rule) && rule.weight_for(source) > 0.0
}
