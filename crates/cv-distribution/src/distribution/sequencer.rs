//! Seeded shuffling and largest-remainder apportionment.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::domain::{ApportionmentEntry, ChannelId};

/// Expand quotas into one channel slot per item and shuffle them uniformly.
///
/// Each channel appears exactly `actual_count` times in the result. The pre-shuffle order is
/// an implementation detail; only the multiset is guaranteed.
pub fn sequence<G>(entries: &[ApportionmentEntry], rng: &mut G) -> Vec<ChannelId>
where
    G: Rng + ?Sized,
{
    let total: u64 = entries.iter().map(|entry| entry.actual_count).sum();
    let mut slots = Vec::with_capacity(total as usize);
    for entry in entries {
        for _ in 0..entry.actual_count {
            slots.push(entry.channel_id.clone());
        }
    }

    // Fisher-Yates
    slots.shuffle(rng);
    slots
}

/// Owned randomness for allocation runs.
///
/// A seeded source replays the same stream across runs, which is what tests and `--seed`
/// rely on; an unseeded source draws its key from the OS.
#[derive(Debug, Clone)]
pub struct ShuffleSource {
    rng: ChaCha20Rng,
    seed: Option<u64>,
}

impl ShuffleSource {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
            seed: None,
        }
    }

    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn rng(&mut self) -> &mut ChaCha20Rng {
        &mut self.rng
    }
}
