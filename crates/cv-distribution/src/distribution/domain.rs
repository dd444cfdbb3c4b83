use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a public-facing outlet (sales page) that can display candidate records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for candidate records waiting to be distributed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Traffic source a weight applies to (e.g. `google` or `other`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTag(pub String);

impl SourceTag {
    pub const GOOGLE: &'static str = "google";
    pub const OTHER: &'static str = "other";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_ascii_lowercase())
    }

    pub fn google() -> Self {
        Self(Self::GOOGLE.to_string())
    }

    pub fn other() -> Self {
        Self(Self::OTHER.to_string())
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-channel routing configuration read from the rule store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRule {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub weight_by_source: BTreeMap<SourceTag, f64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub auto_distribute_enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub nationality_filter: Option<String>,
    #[serde(default)]
    pub position_substring_filter: Option<String>,
    #[serde(default)]
    pub total_limit: Option<u64>,
    #[serde(default)]
    pub daily_limit: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl ChannelRule {
    /// Active, auto-distributing rule with no weights, filters, or limits.
    pub fn open(channel_id: impl Into<String>, priority: i32) -> Self {
        Self {
            channel_id: ChannelId::new(channel_id),
            weight_by_source: BTreeMap::new(),
            is_active: true,
            auto_distribute_enabled: true,
            priority,
            nationality_filter: None,
            position_substring_filter: None,
            total_limit: None,
            daily_limit: None,
        }
    }

    pub fn with_weight(mut self, source: SourceTag, weight: f64) -> Self {
        self.weight_by_source.insert(source, weight);
        self
    }

    /// Weight for the given source; missing or non-finite entries count as zero.
    pub fn weight_for(&self, source: &SourceTag) -> f64 {
        self.weight_by_source
            .get(source)
            .copied()
            .filter(|weight| weight.is_finite())
            .unwrap_or(0.0)
    }

    pub fn limits(&self) -> CapacityLimits {
        CapacityLimits {
            total_limit: self.total_limit,
            daily_limit: self.daily_limit,
        }
    }
}

/// Lifetime and rolling daily ceilings for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLimits {
    pub total_limit: Option<u64>,
    pub daily_limit: Option<u64>,
}

impl CapacityLimits {
    pub const UNBOUNDED: Self = Self {
        total_limit: None,
        daily_limit: None,
    };

    pub fn is_unbounded(&self) -> bool {
        self.total_limit.is_none() && self.daily_limit.is_none()
    }
}

/// Candidate record awaiting distribution. Only the fields the filters inspect are carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(id),
            nationality: None,
            position: None,
        }
    }

    pub fn with_nationality(mut self, nationality: impl Into<String>) -> Self {
        self.nationality = Some(nationality.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }
}

/// Active assignment counts for one channel as reported by the recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounters {
    pub lifetime_count: u64,
    pub today_count: u64,
}

impl ChannelCounters {
    pub fn record_one(&mut self) {
        self.lifetime_count = self.lifetime_count.saturating_add(1);
        self.today_count = self.today_count.saturating_add(1);
    }
}

/// Automatic allocation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Equal,
    Random,
    Priority,
    Balanced,
    Weighted,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Equal,
        Strategy::Random,
        Strategy::Priority,
        Strategy::Balanced,
        Strategy::Weighted,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Strategy::Equal => "EQUAL",
            Strategy::Random => "RANDOM",
            Strategy::Priority => "PRIORITY",
            Strategy::Balanced => "BALANCED",
            Strategy::Weighted => "WEIGHTED",
        }
    }

    /// Whether the strategy consults the capacity guard per item.
    pub const fn enforces_capacity(self) -> bool {
        matches!(self, Strategy::Priority | Strategy::Balanced)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown distribution strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EQUAL" => Ok(Strategy::Equal),
            "RANDOM" => Ok(Strategy::Random),
            "PRIORITY" => Ok(Strategy::Priority),
            "BALANCED" => Ok(Strategy::Balanced),
            "WEIGHTED" => Ok(Strategy::Weighted),
            _ => Err(UnknownStrategy(value.to_string())),
        }
    }
}

/// How the WEIGHTED strategy treats channel capacity limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightedCapacityPolicy {
    /// Channels without room leave the weight pool and quotas are capped at remaining room.
    #[default]
    Enforce,
    /// Quotas follow weights only; limits are not consulted.
    Ignore,
}

impl FromStr for WeightedCapacityPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "enforce" => Ok(Self::Enforce),
            "ignore" => Ok(Self::Ignore),
            other => Err(other.to_string()),
        }
    }
}

/// Who produced an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "strategy")]
pub enum AssignmentOrigin {
    Auto(Strategy),
    Manual,
}

impl AssignmentOrigin {
    pub fn label(self) -> &'static str {
        match self {
            AssignmentOrigin::Auto(strategy) => strategy.label(),
            AssignmentOrigin::Manual => "MANUAL",
        }
    }
}

/// Quota line produced by the apportionment calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApportionmentEntry {
    pub channel_id: ChannelId,
    pub weight: f64,
    pub expected_count: f64,
    pub actual_count: u64,
    pub percentage: f64,
}

/// One (item, channel) pairing decided by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub item_id: ItemId,
    pub channel_id: ChannelId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("weighted".parse::<Strategy>(), Ok(Strategy::Weighted));
        assert_eq!(" Balanced ".parse::<Strategy>(), Ok(Strategy::Balanced));
        assert!("round_robin".parse::<Strategy>().is_err());
    }

    #[test]
    fn strategy_serializes_in_upper_case() {
        let json = serde_json::to_string(&Strategy::Priority).expect("serializes");
        assert_eq!(json, "\"PRIORITY\"");
        let parsed: Strategy = serde_json::from_str("\"EQUAL\"").expect("deserializes");
        assert_eq!(parsed, Strategy::Equal);
    }

    #[test]
    fn missing_and_invalid_weights_read_as_zero() {
        let rule = ChannelRule::open("sales1", 1)
            .with_weight(SourceTag::google(), f64::NAN)
            .with_weight(SourceTag::other(), 12.5);
        assert_eq!(rule.weight_for(&SourceTag::google()), 0.0);
        assert_eq!(rule.weight_for(&SourceTag::other()), 12.5);
        assert_eq!(rule.weight_for(&SourceTag::new("facebook")), 0.0);
    }

    #[test]
    fn rule_defaults_apply_when_fields_are_omitted() {
        let rule: ChannelRule =
            serde_json::from_str(r#"{"channel_id":"sales4","weight_by_source":{"google":5}}"#)
                .expect("rule parses");
        assert!(rule.is_active);
        assert!(rule.auto_distribute_enabled);
        assert_eq!(rule.priority, 0);
        assert!(rule.limits().is_unbounded());
        assert_eq!(rule.weight_for(&SourceTag::google()), 5.0);
    }
}
