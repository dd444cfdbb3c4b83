//! Allocation of newly arrived candidate records across public sales channels.
//!
//! The engine itself is pure: rules, counters, and randomness are passed in, and it returns a
//! plan. [`DistributionService`] wires the engine to a [`RuleStore`], a [`WorkItemSource`], and
//! a [`DistributionRecorder`], and commits every decision through the recorder's atomic
//! capacity check.

pub mod apportion;
pub(crate) mod capacity;
pub mod domain;
pub(crate) mod eligibility;
pub mod engine;
pub mod import;
pub mod memory;
pub mod repository;
pub mod router;
pub mod sequencer;
pub mod service;

#[cfg(test)]
mod tests;

pub use apportion::apportion;
pub use capacity::{has_room, remaining};
pub use domain::{
    AllocationDecision, ApportionmentEntry, AssignmentOrigin, CapacityLimits, ChannelCounters,
    ChannelId, ChannelRule, ItemId, SourceTag, Strategy, UnknownStrategy, WeightedCapacityPolicy,
    WorkItem,
};
pub use eligibility::{accepts, has_positive_weight, is_open, matches_filters};
pub use engine::{allocate, rule_order, AllocationError, AllocationInput, AllocationPlan};
pub use import::{load_rules, rules_from_reader, ImportError, WorkItemImporter};
pub use memory::{default_channel_rules, InMemoryDistributionStore, InMemoryRuleStore};
pub use repository::{
    ChannelActivity, DistributionRecord, DistributionRecorder, RecorderError, RepositoryError,
    RuleStore, WorkItemSource,
};
pub use router::distribution_router;
pub use sequencer::{sequence, ShuffleSource};
pub use service::{
    AllocationReport, AllocationRequest, ChannelStats, DistributionConfig, DistributionService,
    DistributionServiceError, DistributionStats, ItemFailure, ManualAssignment,
    ManualAssignmentReceipt, Removal, RemovalReceipt,
};
