//! Selection among routing candidates

use gateway_core::EndpointRecord;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How to pick one record out of the candidate set. The dispatch contract
/// only requires "some member of the set"; both strategies satisfy it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    /// Distribute requests evenly across candidates.
    #[default]
    RoundRobin,
    /// Pick a uniformly random candidate.
    Random,
}

pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    round_robin_counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    /// Select one candidate, or `None` when the set is empty.
    pub fn select<'a>(&self, candidates: &'a [EndpointRecord]) -> Option<&'a EndpointRecord> {
        if candidates.is_empty() {
            return None;
        }
        let index = match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                self.round_robin_counter.fetch_add(1, Ordering::SeqCst) % candidates.len()
            }
            LoadBalancingStrategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
        };
        candidates.get(index)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalancingStrategy::default())
    }
}
