use super::common::*;
use crate::distribution::domain::{ChannelId, ChannelRule, Strategy, WeightedCapacityPolicy, WorkItem};
use crate::distribution::engine::AllocationError;
use crate::distribution::sequencer::ShuffleSource;

fn three_way(weights: [f64; 3]) -> Vec<ChannelRule> {
    vec![
        weighted("sales1", 3, weights[0]),
        weighted("sales2", 2, weights[1]),
        weighted("sales3", 1, weights[2]),
    ]
}

#[test]
fn weighted_split_is_exact_without_remainder() {
    let rules = three_way([50.0, 30.0, 20.0]);
    let batch = items(100);

    let plan = EngineRun::new(Strategy::Weighted, &batch, &rules)
        .run()
        .expect("weighted plan");

    assert_eq!(plan.decisions.len(), 100);
    assert!(plan.unassigned.is_empty());
    assert_eq!(count_for(&plan, "sales1"), 50);
    assert_eq!(count_for(&plan, "sales2"), 30);
    assert_eq!(count_for(&plan, "sales3"), 20);

    let apportionment = plan.apportionment.expect("weighted reports quotas");
    let total: u64 = apportionment.iter().map(|entry| entry.actual_count).sum();
    assert_eq!(total, 100);
}

#[test]
fn weighted_equal_weights_leave_one_extra_unit() {
    let rules = three_way([1.0, 1.0, 1.0]);
    let batch = items(10);

    let plan = EngineRun::new(Strategy::Weighted, &batch, &rules)
        .run()
        .expect("weighted plan");

    let mut counts: Vec<u64> = ["sales1", "sales2", "sales3"]
        .iter()
        .map(|channel| count_for(&plan, channel))
        .collect();
    assert_eq!(counts[0], 4, "first channel in input order wins the tie");
    counts.sort_unstable();
    assert_eq!(counts, vec![3, 3, 4]);
}

#[test]
fn weighted_runs_keep_quotas_but_reshuffle_items() {
    let rules = three_way([50.0, 30.0, 20.0]);
    let batch = items(60);
    let run = EngineRun::new(Strategy::Weighted, &batch, &rules);
    let mut shuffle = ShuffleSource::seeded(99);

    let first = run.execute(&mut shuffle).expect("first plan");
    let second = run.execute(&mut shuffle).expect("second plan");

    assert_eq!(first.counts(), second.counts());
    assert_ne!(first.decisions, second.decisions);
}

#[test]
fn weighted_replays_with_the_same_seed() {
    let rules = three_way([5.0, 3.0, 2.0]);
    let batch = items(25);
    let run = EngineRun::new(Strategy::Weighted, &batch, &rules);

    let first = run.execute(&mut ShuffleSource::seeded(11)).expect("plan");
    let second = run.execute(&mut ShuffleSource::seeded(11)).expect("plan");

    assert_eq!(first, second);
}

#[test]
fn equal_slices_contiguous_ceiling_blocks_in_rule_order() {
    // store order differs from priority order on purpose
    let rules = vec![
        ChannelRule::open("sales3", 1),
        ChannelRule::open("sales1", 3),
        ChannelRule::open("sales2", 2),
    ];
    let batch = items(11);

    let plan = EngineRun::new(Strategy::Equal, &batch, &rules)
        .run()
        .expect("equal plan");

    assert_eq!(count_for(&plan, "sales1"), 4);
    assert_eq!(count_for(&plan, "sales2"), 4);
    assert_eq!(count_for(&plan, "sales3"), 3);

    let channels: Vec<&str> = plan
        .decisions
        .iter()
        .map(|decision| decision.channel_id.as_str())
        .collect();
    assert_eq!(&channels[..4], &["sales1"; 4]);
    assert_eq!(&channels[4..8], &["sales2"; 4]);
    assert_eq!(&channels[8..], &["sales3"; 3]);
}

#[test]
fn equal_leaves_trailing_channels_empty_for_small_batches() {
    let rules = three_way([1.0, 1.0, 1.0]);
    let batch = items(2);

    let plan = EngineRun::new(Strategy::Equal, &batch, &rules)
        .run()
        .expect("equal plan");

    assert_eq!(count_for(&plan, "sales1"), 1);
    assert_eq!(count_for(&plan, "sales2"), 1);
    assert_eq!(count_for(&plan, "sales3"), 0);
}

#[test]
fn random_only_uses_open_channels() {
    let mut closed = ChannelRule::open("sales2", 5);
    closed.auto_distribute_enabled = false;
    let mut inactive = ChannelRule::open("sales3", 4);
    inactive.is_active = false;
    let rules = vec![ChannelRule::open("sales1", 1), closed, inactive];
    let batch = items(40);

    let plan = EngineRun::new(Strategy::Random, &batch, &rules)
        .run()
        .expect("random plan");

    assert_eq!(count_for(&plan, "sales1"), 40);
}

#[test]
fn priority_and_balanced_skip_a_channel_at_its_daily_limit() {
    let rules = vec![
        with_daily_limit(weighted("sales1", 10, 50.0), 5),
        weighted("sales2", 5, 50.0),
    ];
    let batch = items(8);

    for strategy in [Strategy::Priority, Strategy::Balanced] {
        let plan = EngineRun::new(strategy, &batch, &rules)
            .counters(counters(&[("sales1", 5, 5)]))
            .run()
            .expect("plan");

        assert_eq!(count_for(&plan, "sales1"), 0, "{strategy} must honor the limit");
        assert_eq!(count_for(&plan, "sales2"), 8);
    }
}

#[test]
fn weighted_capacity_policy_decides_whether_full_channels_receive_items() {
    let rules = vec![
        with_daily_limit(weighted("sales1", 10, 50.0), 5),
        weighted("sales2", 5, 50.0),
    ];
    let batch = items(10);
    let full = counters(&[("sales1", 5, 5)]);

    let enforced = EngineRun::new(Strategy::Weighted, &batch, &rules)
        .counters(full.clone())
        .run()
        .expect("enforced plan");
    assert_eq!(count_for(&enforced, "sales1"), 0);
    assert_eq!(count_for(&enforced, "sales2"), 10);

    let ignored = EngineRun::new(Strategy::Weighted, &batch, &rules)
        .counters(full)
        .capacity(WeightedCapacityPolicy::Ignore)
        .run()
        .expect("ignored plan");
    assert_eq!(count_for(&ignored, "sales1"), 5);
    assert_eq!(count_for(&ignored, "sales2"), 5);
}

#[test]
fn weighted_enforce_caps_quota_at_remaining_room() {
    let rules = vec![
        with_daily_limit(weighted("sales1", 10, 50.0), 5),
        weighted("sales2", 5, 25.0),
        weighted("sales3", 1, 25.0),
    ];
    let batch = items(20);

    let plan = EngineRun::new(Strategy::Weighted, &batch, &rules)
        .counters(counters(&[("sales1", 3, 3)]))
        .run()
        .expect("plan");

    assert_eq!(count_for(&plan, "sales1"), 2);
    assert_eq!(count_for(&plan, "sales2"), 9);
    assert_eq!(count_for(&plan, "sales3"), 9);
    assert_eq!(plan.decisions.len(), 20);
}

#[test]
fn weighted_enforce_leaves_overflow_unassigned_when_every_channel_fills() {
    let rules = vec![
        with_daily_limit(weighted("sales1", 2, 50.0), 3),
        with_daily_limit(weighted("sales2", 1, 50.0), 2),
    ];
    let batch = items(8);

    let plan = EngineRun::new(Strategy::Weighted, &batch, &rules)
        .run()
        .expect("plan");

    assert_eq!(count_for(&plan, "sales1"), 3);
    assert_eq!(count_for(&plan, "sales2"), 2);
    assert_eq!(plan.unassigned.len(), 3);
}

#[test]
fn balanced_starts_from_lifetime_load() {
    let rules = vec![ChannelRule::open("sales1", 2), ChannelRule::open("sales2", 1)];
    let batch = items(5);

    let plan = EngineRun::new(Strategy::Balanced, &batch, &rules)
        .counters(counters(&[("sales1", 3, 0)]))
        .run()
        .expect("plan");

    // sales2 catches up to 3, the tie goes to sales1 by rule order, then sales2 again
    assert_eq!(count_for(&plan, "sales1"), 1);
    assert_eq!(count_for(&plan, "sales2"), 4);
    assert_eq!(plan.decisions[3].channel_id, ChannelId::new("sales1"));
}

#[test]
fn priority_moves_on_when_a_channel_fills_mid_batch() {
    let mut first = ChannelRule::open("sales1", 9);
    first.total_limit = Some(2);
    let rules = vec![ChannelRule::open("sales2", 1), first];
    let batch = items(5);

    let plan = EngineRun::new(Strategy::Priority, &batch, &rules)
        .run()
        .expect("plan");

    assert_eq!(count_for(&plan, "sales1"), 2);
    assert_eq!(count_for(&plan, "sales2"), 3);
    assert_eq!(plan.decisions[0].channel_id, ChannelId::new("sales1"));
}

#[test]
fn priority_leaves_items_unassigned_when_nothing_has_room() {
    let rules = vec![with_daily_limit(ChannelRule::open("sales1", 1), 1)];
    let batch = items(3);

    let plan = EngineRun::new(Strategy::Priority, &batch, &rules)
        .run()
        .expect("plan");

    assert_eq!(plan.decisions.len(), 1);
    assert_eq!(plan.unassigned.len(), 2);
}

#[test]
fn nationality_filter_holds_across_every_strategy() {
    let mut indian_only = weighted("sales1", 10, 50.0);
    indian_only.nationality_filter = Some("INDIAN".to_string());
    let rules = vec![indian_only, weighted("sales2", 5, 50.0)];

    let batch: Vec<WorkItem> = (0..20)
        .map(|index| {
            let nationality = if index % 2 == 0 { "INDIAN" } else { "FILIPINO" };
            WorkItem::new(format!("cv-{index:03}")).with_nationality(nationality)
        })
        .collect();

    for strategy in Strategy::ALL {
        let plan = EngineRun::new(strategy, &batch, &rules).run().expect("plan");

        for decision in &plan.decisions {
            let item = batch
                .iter()
                .find(|item| item.id == decision.item_id)
                .expect("decided item comes from the batch");
            if decision.channel_id == ChannelId::new("sales1") {
                assert_eq!(
                    item.nationality.as_deref(),
                    Some("INDIAN"),
                    "{strategy} routed {} to the INDIAN-only channel",
                    item.id
                );
            }
        }
        assert_eq!(
            plan.decisions.len() + plan.unassigned.len(),
            batch.len(),
            "{strategy} accounts for every item"
        );
    }
}

#[test]
fn weighted_swaps_slots_so_filtered_items_still_land() {
    let mut indian_only = weighted("sales1", 10, 50.0);
    indian_only.nationality_filter = Some("INDIAN".to_string());
    let rules = vec![indian_only, weighted("sales2", 5, 50.0)];
    let batch = vec![
        WorkItem::new("cv-1").with_nationality("FILIPINO"),
        WorkItem::new("cv-2").with_nationality("INDIAN"),
        WorkItem::new("cv-3").with_nationality("FILIPINO"),
        WorkItem::new("cv-4").with_nationality("INDIAN"),
    ];

    for seed in 0..16 {
        let plan = EngineRun::new(Strategy::Weighted, &batch, &rules)
            .execute(&mut ShuffleSource::seeded(seed))
            .expect("plan");

        assert!(plan.unassigned.is_empty(), "seed {seed} left items behind");
        assert_eq!(count_for(&plan, "sales1"), 2);
        assert_eq!(count_for(&plan, "sales2"), 2);
    }
}

#[test]
fn weighted_enforce_hands_unfitting_slots_to_waiting_items() {
    let mut indian_only = with_daily_limit(weighted("sales1", 10, 50.0), 2);
    indian_only.nationality_filter = Some("INDIAN".to_string());
    let rules = vec![indian_only, with_daily_limit(weighted("sales2", 5, 50.0), 1)];
    let batch = vec![
        WorkItem::new("cv-1").with_nationality("FILIPINO"),
        WorkItem::new("cv-2").with_nationality("FILIPINO"),
        WorkItem::new("cv-3").with_nationality("INDIAN"),
        WorkItem::new("cv-4").with_nationality("INDIAN"),
        WorkItem::new("cv-5").with_nationality("INDIAN"),
    ];

    for seed in 0..16 {
        let plan = EngineRun::new(Strategy::Weighted, &batch, &rules)
            .execute(&mut ShuffleSource::seeded(seed))
            .expect("plan");

        assert_eq!(plan.decisions.len(), 3, "seed {seed} wasted a slot");
        assert_eq!(count_for(&plan, "sales1"), 2);
        assert_eq!(count_for(&plan, "sales2"), 1);
        assert_eq!(plan.unassigned.len(), 2);
        for decision in &plan.decisions {
            let item = batch
                .iter()
                .find(|item| item.id == decision.item_id)
                .expect("decided item comes from the batch");
            if decision.channel_id == ChannelId::new("sales1") {
                assert_eq!(item.nationality.as_deref(), Some("INDIAN"));
            }
        }
    }
}

#[test]
fn weighted_with_only_zero_weights_has_no_eligible_channels() {
    let rules = three_way([0.0, 0.0, 0.0]);
    let batch = items(10);

    let result = EngineRun::new(Strategy::Weighted, &batch, &rules).run();

    assert_eq!(result, Err(AllocationError::NoEligibleChannels));
}

#[test]
fn every_strategy_rejects_a_rule_set_with_no_open_channel() {
    let mut paused = ChannelRule::open("sales1", 1);
    paused.auto_distribute_enabled = false;
    let rules = vec![paused];
    let batch = items(3);

    for strategy in Strategy::ALL {
        assert_eq!(
            EngineRun::new(strategy, &batch, &rules).run(),
            Err(AllocationError::NoEligibleChannels),
            "{strategy}"
        );
    }
}
