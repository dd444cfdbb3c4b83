//! Largest-remainder apportionment of N items across weighted channels.
//!
//! - expected_i = N * w_i / W; floors are taken first.
//! - The leftover `N - sum(floors)` goes one unit at a time to channels ranked by
//!   fractional remainder desc, weight desc, then input position asc.
//! - Deterministic for a given input slice; randomness lives in the sequencer.

use super::domain::{ApportionmentEntry, ChannelId};
use super::engine::AllocationError;

/// Compute exact integer quotas whose sum is `items`.
///
/// Callers filter out non-positive weights beforehand; an empty pool or a pool whose weights
/// sum to zero is rejected instead of dividing by zero.
pub fn apportion(
    items: u64,
    pool: &[(ChannelId, f64)],
) -> Result<Vec<ApportionmentEntry>, AllocationError> {
    let total_weight: f64 = pool
        .iter()
        .map(|(_, weight)| *weight)
        .filter(|weight| weight.is_finite() && *weight > 0.0)
        .sum();

    if pool.is_empty() || total_weight <= 0.0 {
        return Err(AllocationError::NoEligibleChannels);
    }

    let mut entries: Vec<ApportionmentEntry> = pool
        .iter()
        .map(|(channel_id, weight)| {
            let weight = if weight.is_finite() && *weight > 0.0 {
                *weight
            } else {
                0.0
            };
            let expected_count = items as f64 * weight / total_weight;
            ApportionmentEntry {
                channel_id: channel_id.clone(),
                weight,
                expected_count,
                actual_count: expected_count.floor() as u64,
                percentage: 0.0,
            }
        })
        .collect();

    let floors: u64 = entries.iter().map(|entry| entry.actual_count).sum();
    if floors < items {
        distribute_leftover(items - floors, &mut entries);
    } else if floors > items {
        trim_overshoot(floors - items, &mut entries);
    }

    for entry in &mut entries {
        entry.percentage = if items == 0 {
            0.0
        } else {
            entry.actual_count as f64 / items as f64 * 100.0
        };
    }

    Ok(entries)
}

fn distribute_leftover(leftover: u64, entries: &mut [ApportionmentEntry]) {
    let mut ranking: Vec<(usize, f64, f64)> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.weight > 0.0)
        .map(|(index, entry)| {
            let fraction = entry.expected_count - entry.expected_count.floor();
            (index, fraction, entry.weight)
        })
        .collect();

    // fraction desc, weight desc, input position asc
    ranking.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| b.2.total_cmp(&a.2))
            .then_with(|| a.0.cmp(&b.0))
    });

    if ranking.is_empty() {
        return;
    }

    // Float error can in principle leave more than one unit per channel; cycle in that case.
    for step in 0..leftover {
        let (index, _, _) = ranking[(step as usize) % ranking.len()];
        entries[index].actual_count += 1;
    }
}

/// Float rounding can push a floor one past its true value; take units back from the
/// smallest fractions (weight asc, input position desc).
fn trim_overshoot(excess: u64, entries: &mut [ApportionmentEntry]) {
    let mut ranking: Vec<(usize, f64, f64)> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.actual_count > 0)
        .map(|(index, entry)| {
            let fraction = entry.expected_count - entry.expected_count.floor();
            (index, fraction, entry.weight)
        })
        .collect();

    ranking.sort_by(|a, b| {
        a.1.total_cmp(&b.1)
            .then_with(|| a.2.total_cmp(&b.2))
            .then_with(|| b.0.cmp(&a.0))
    });

    let mut remaining = excess;
    for (index, _, _) in ranking {
        if remaining == 0 {
            break;
        }
        entries[index].actual_count -= 1;
        remaining -= 1;
    }
}
