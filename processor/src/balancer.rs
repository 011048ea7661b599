//! The load-balancing decision function.
//!
//! Pure: given an ownership snapshot and the partition id set, pick at most
//! one partition to claim this tick. Claiming one partition at a time keeps
//! convergence gradual, and random tie-breaking keeps a fleet that observes
//! the same snapshot from all targeting the same partition. Record age is
//! the only failure detector.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::Rng;

use ownership_store::util::now_ms;
use ownership_store::PartitionOwnership;

pub struct PartitionLoadBalancer {
    owner_id: String,
    inactive_timeout: Duration,
}

impl PartitionLoadBalancer {
    pub fn new(owner_id: String, inactive_timeout: Duration) -> Self {
        Self {
            owner_id,
            inactive_timeout,
        }
    }

    /// Pick the partition to claim this tick, or `None` when this processor
    /// already holds its fair share.
    pub fn select_claim(
        &self,
        ownership: &HashMap<String, PartitionOwnership>,
        partition_ids: &[String],
    ) -> Option<String> {
        if partition_ids.is_empty() {
            return None;
        }

        let now = now_ms();
        let inactive_after = self.inactive_timeout.as_millis() as i64;
        let is_active =
            |record: &PartitionOwnership| now - record.last_modified_ms <= inactive_after;

        // Owner counts over active records only. Abandoned records do not
        // keep their owner in the game.
        let mut owner_counts: HashMap<&str, usize> = HashMap::new();
        for record in ownership.values().filter(|r| is_active(r)) {
            *owner_counts.entry(record.owner_id.as_str()).or_default() += 1;
        }

        let self_count = owner_counts
            .get(self.owner_id.as_str())
            .copied()
            .unwrap_or(0);
        // Self is an active owner even before it owns anything.
        let active_owners = owner_counts.len() + usize::from(self_count == 0);

        let min_per = partition_ids.len() / active_owners;
        let extras = partition_ids.len() % active_owners;

        if self_count > min_per {
            return None;
        }
        let owners_above_min = owner_counts.values().filter(|&&c| c > min_per).count();
        if self_count == min_per && owners_above_min >= extras {
            return None;
        }

        // Preference order: partitions nobody has ever claimed, then
        // abandoned ones, then stealing from an owner holding more than its
        // share can justify.
        let unclaimed: Vec<&String> = partition_ids
            .iter()
            .filter(|p| !ownership.contains_key(*p))
            .collect();
        if let Some(target) = pick(&unclaimed) {
            return Some(target.clone());
        }

        let abandoned: Vec<&String> = partition_ids
            .iter()
            .filter(|p| ownership.get(*p).is_some_and(|r| !is_active(r)))
            .collect();
        if let Some(target) = pick(&abandoned) {
            return Some(target.clone());
        }

        let rich_owners: HashSet<&str> = owner_counts
            .iter()
            .filter(|(_, &count)| count > min_per + 1)
            .map(|(owner, _)| *owner)
            .collect();
        let stealable: Vec<&String> = partition_ids
            .iter()
            .filter(|p| {
                ownership
                    .get(*p)
                    .is_some_and(|r| is_active(r) && rich_owners.contains(r.owner_id.as_str()))
            })
            .collect();
        pick(&stealable).cloned()
    }
}

fn pick<'a>(candidates: &[&'a String]) -> Option<&'a String> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[index])
}
