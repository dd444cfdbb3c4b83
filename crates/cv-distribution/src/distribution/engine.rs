//! Strategy selector: turns a batch of work items plus channel rules into decisions.
//!
//! The engine is pure with respect to storage. Counters come in as a snapshot, randomness is
//! injected, and the output is a plan the service hands to the recorder.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use tracing::debug;

use super::apportion::apportion;
use super::capacity::RunningCounters;
use super::domain::{
    AllocationDecision, ApportionmentEntry, ChannelCounters, ChannelId, ChannelRule, ItemId,
    SourceTag, Strategy, WeightedCapacityPolicy, WorkItem,
};
use super::eligibility::{has_positive_weight, is_open, matches_filters};
use super::sequencer::sequence;

/// Failures that abort a whole allocation run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("no eligible channel is available for distribution")]
    NoEligibleChannels,
}

/// Everything one allocation pass reads.
#[derive(Debug, Clone, Copy)]
pub struct AllocationInput<'a> {
    pub strategy: Strategy,
    pub items: &'a [WorkItem],
    pub rules: &'a [ChannelRule],
    pub source: &'a SourceTag,
    pub counters: &'a HashMap<ChannelId, ChannelCounters>,
    pub weighted_capacity: WeightedCapacityPolicy,
}

/// Decisions for one pass, in item order.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub strategy: Strategy,
    pub decisions: Vec<AllocationDecision>,
    pub unassigned: Vec<ItemId>,
    pub apportionment: Option<Vec<ApportionmentEntry>>,
}

impl AllocationPlan {
    fn empty(strategy: Strategy) -> Self {
        Self {
            strategy,
            decisions: Vec::new(),
            unassigned: Vec::new(),
            apportionment: None,
        }
    }

    /// Planned items per channel.
    pub fn counts(&self) -> BTreeMap<ChannelId, u64> {
        let mut counts = BTreeMap::new();
        for decision in &self.decisions {
            *counts.entry(decision.channel_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Rules in "rule order": descending priority, stable on store order.
pub fn rule_order(rules: &[ChannelRule]) -> Vec<&ChannelRule> {
    let mut ordered: Vec<&ChannelRule> = rules.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered
}

/// Run one allocation pass for `input.strategy`.
pub fn allocate<G>(input: &AllocationInput<'_>, rng: &mut G) -> Result<AllocationPlan, AllocationError>
where
    G: Rng + ?Sized,
{
    let open: Vec<&ChannelRule> = rule_order(input.rules)
        .into_iter()
        .filter(|rule| is_open(rule))
        .collect();

    if open.is_empty() {
        return Err(AllocationError::NoEligibleChannels);
    }

    let plan = match input.strategy {
        Strategy::Equal => allocate_equal(input.items, &open),
        Strategy::Random => allocate_random(input.items, &open, rng),
        Strategy::Priority => allocate_priority(input.items, &open, input.counters),
        Strategy::Balanced => allocate_balanced(input.items, &open, input.counters),
        Strategy::Weighted => allocate_weighted(input, &open, rng)?,
    };

    debug!(
        strategy = %plan.strategy,
        items = input.items.len(),
        open_channels = open.len(),
        decided = plan.decisions.len(),
        unassigned = plan.unassigned.len(),
        "allocation planned"
    );

    Ok(plan)
}

/// Contiguous blocks of `ceil(N / channels)` items per channel, in rule order.
fn allocate_equal(items: &[WorkItem], open: &[&ChannelRule]) -> AllocationPlan {
    let mut plan = AllocationPlan::empty(Strategy::Equal);
    if items.is_empty() {
        return plan;
    }

    let block = items.len().div_ceil(open.len());
    for (index, item) in items.iter().enumerate() {
        let rule = open[index / block];
        push_if_accepted(&mut plan, rule, item);
    }

    plan
}

fn allocate_random<G>(items: &[WorkItem], open: &[&ChannelRule], rng: &mut G) -> AllocationPlan
where
    G: Rng + ?Sized,
{
    let mut plan = AllocationPlan::empty(Strategy::Random);

    for item in items {
        let candidates: Vec<&ChannelRule> = open
            .iter()
            .copied()
            .filter(|rule| matches_filters(rule, item))
            .collect();

        if candidates.is_empty() {
            plan.unassigned.push(item.id.clone());
            continue;
        }

        let pick = candidates[rng.gen_range(0..candidates.len())];
        plan.decisions.push(AllocationDecision {
            item_id: item.id.clone(),
            channel_id: pick.channel_id.clone(),
        });
    }

    plan
}

/// First channel in rule order that accepts the item and still has room.
fn allocate_priority(
    items: &[WorkItem],
    open: &[&ChannelRule],
    snapshot: &HashMap<ChannelId, ChannelCounters>,
) -> AllocationPlan {
    let mut plan = AllocationPlan::empty(Strategy::Priority);
    let mut running = RunningCounters::new(snapshot.clone());

    for item in items {
        let chosen = open.iter().copied().find(|rule| {
            matches_filters(rule, item) && running.has_room(&rule.channel_id, &rule.limits())
        });

        match chosen {
            Some(rule) => {
                running.accept(&rule.channel_id);
                plan.decisions.push(AllocationDecision {
                    item_id: item.id.clone(),
                    channel_id: rule.channel_id.clone(),
                });
            }
            None => plan.unassigned.push(item.id.clone()),
        }
    }

    plan
}

/// Least-loaded accepting channel with room; load starts at the lifetime count.
fn allocate_balanced(
    items: &[WorkItem],
    open: &[&ChannelRule],
    snapshot: &HashMap<ChannelId, ChannelCounters>,
) -> AllocationPlan {
    let mut plan = AllocationPlan::empty(Strategy::Balanced);
    let mut running = RunningCounters::new(snapshot.clone());

    for item in items {
        let mut chosen: Option<(&ChannelRule, u64)> = None;
        for rule in open.iter().copied() {
            if !matches_filters(rule, item) || !running.has_room(&rule.channel_id, &rule.limits())
            {
                continue;
            }
            let load = running.get(&rule.channel_id).lifetime_count;
            // strict less-than keeps the earliest rule on ties
            if chosen.map_or(true, |(_, best)| load < best) {
                chosen = Some((rule, load));
            }
        }

        match chosen {
            Some((rule, _)) => {
                running.accept(&rule.channel_id);
                plan.decisions.push(AllocationDecision {
                    item_id: item.id.clone(),
                    channel_id: rule.channel_id.clone(),
                });
            }
            None => plan.unassigned.push(item.id.clone()),
        }
    }

    plan
}

fn allocate_weighted<G>(
    input: &AllocationInput<'_>,
    open: &[&ChannelRule],
    rng: &mut G,
) -> Result<AllocationPlan, AllocationError>
where
    G: Rng + ?Sized,
{
    let running = RunningCounters::new(input.counters.clone());

    let mut pool: Vec<&ChannelRule> = open
        .iter()
        .copied()
        .filter(|rule| has_positive_weight(rule, input.source))
        .collect();

    if input.weighted_capacity == WeightedCapacityPolicy::Enforce {
        pool.retain(|rule| running.has_room(&rule.channel_id, &rule.limits()));
    }

    if pool.is_empty() {
        return Err(AllocationError::NoEligibleChannels);
    }

    let mut plan = AllocationPlan::empty(Strategy::Weighted);
    let items = input.items;
    let total = items.len() as u64;

    let entries = match input.weighted_capacity {
        WeightedCapacityPolicy::Ignore => apportion(total, &weight_pool(&pool, input.source))?,
        WeightedCapacityPolicy::Enforce => {
            capped_apportionment(total, &pool, input.source, &running)?
        }
    };

    let mut slots = sequence(&entries, rng);
    let rules: HashMap<&ChannelId, &ChannelRule> = pool
        .iter()
        .map(|rule| (&rule.channel_id, *rule))
        .collect();
    let placed = slots.len().min(items.len());
    repair_filter_conflicts(&items[..placed], &mut slots[..placed], &rules);

    let mut placement: Vec<Option<ChannelId>> = vec![None; items.len()];
    for (index, channel) in slots.into_iter().take(placed).enumerate() {
        placement[index] = Some(channel);
    }
    hand_over_to_waiting_items(items, &mut placement, placed, &rules);

    for (item, slot) in items.iter().zip(placement) {
        let fitting = slot.filter(|channel| {
            rules
                .get(channel)
                .is_some_and(|rule| matches_filters(rule, item))
        });

        match fitting {
            Some(channel) => plan.decisions.push(AllocationDecision {
                item_id: item.id.clone(),
                channel_id: channel,
            }),
            None => plan.unassigned.push(item.id.clone()),
        }
    }

    plan.apportionment = Some(entries);
    Ok(plan)
}

fn weight_pool(pool: &[&ChannelRule], source: &SourceTag) -> Vec<(ChannelId, f64)> {
    pool.iter()
        .map(|rule| (rule.channel_id.clone(), rule.weight_for(source)))
        .collect()
}

/// Apportion, pin every channel whose quota exceeds its remaining room to that room, drop it
/// from the pool, and re-apportion the rest until no quota overflows.
fn capped_apportionment(
    total: u64,
    pool: &[&ChannelRule],
    source: &SourceTag,
    running: &RunningCounters,
) -> Result<Vec<ApportionmentEntry>, AllocationError> {
    let total_weight: f64 = pool.iter().map(|rule| rule.weight_for(source)).sum();
    let mut pinned: HashMap<ChannelId, u64> = HashMap::new();
    let mut active: Vec<&ChannelRule> = pool.to_vec();
    let mut remaining = total;

    while !active.is_empty() {
        let round = apportion(remaining, &weight_pool(&active, source))?;
        let mut overflowed = false;

        for (rule, entry) in active.iter().zip(&round) {
            if let Some(room) = running.remaining(&rule.channel_id, &rule.limits()) {
                if entry.actual_count > room {
                    pinned.insert(rule.channel_id.clone(), room);
                    remaining -= room;
                    overflowed = true;
                }
            }
        }

        if !overflowed {
            for entry in round {
                pinned.insert(entry.channel_id, entry.actual_count);
            }
            break;
        }

        active.retain(|rule| !pinned.contains_key(&rule.channel_id));
        if remaining == 0 {
            break;
        }
    }

    Ok(pool
        .iter()
        .map(|rule| {
            let weight = rule.weight_for(source);
            let actual_count = pinned.get(&rule.channel_id).copied().unwrap_or(0);
            ApportionmentEntry {
                channel_id: rule.channel_id.clone(),
                weight,
                expected_count: total as f64 * weight / total_weight,
                actual_count,
                percentage: if total == 0 {
                    0.0
                } else {
                    actual_count as f64 / total as f64 * 100.0
                },
            }
        })
        .collect())
}

/// Swap slots between items so that each item sits on a channel whose filters accept it.
/// Swaps keep the per-channel multiset intact; an item no swap can fix keeps its slot and is
/// reported unassigned by the caller.
fn repair_filter_conflicts(
    items: &[WorkItem],
    slots: &mut [ChannelId],
    rules: &HashMap<&ChannelId, &ChannelRule>,
) {
    let fits = |channel: &ChannelId, item: &WorkItem| {
        rules
            .get(channel)
            .is_some_and(|rule| matches_filters(rule, item))
    };

    for index in 0..slots.len() {
        if fits(&slots[index], &items[index]) {
            continue;
        }

        let partner = (0..slots.len()).find(|&other| {
            other != index
                && fits(&slots[other], &items[index])
                && fits(&slots[index], &items[other])
        });

        if let Some(other) = partner {
            slots.swap(index, other);
        }
    }
}

/// When capped quotas leave fewer slots than items, a slot still rejected by its item after
/// [`repair_filter_conflicts`] moves to the first item past `placed` that it fits.
fn hand_over_to_waiting_items(
    items: &[WorkItem],
    placement: &mut [Option<ChannelId>],
    placed: usize,
    rules: &HashMap<&ChannelId, &ChannelRule>,
) {
    let fits = |channel: &ChannelId, item: &WorkItem| {
        rules
            .get(channel)
            .is_some_and(|rule| matches_filters(rule, item))
    };

    for index in 0..placed {
        let Some(channel) = placement[index].clone() else {
            continue;
        };
        if fits(&channel, &items[index]) {
            continue;
        }

        let waiting = (placed..items.len())
            .find(|&other| placement[other].is_none() && fits(&channel, &items[other]));
        if let Some(other) = waiting {
            placement[other] = placement[index].take();
        }
    }
}

fn push_if_accepted(plan: &mut AllocationPlan, rule: &ChannelRule, item: &WorkItem) {
    if matches_filters(rule, item) {
        plan.decisions.push(AllocationDecision {
            item_id: item.id.clone(),
            channel_id: rule.channel_id.clone(),
        });
    } else {
        plan.unassigned.push(item.id.clone());
    }
}
