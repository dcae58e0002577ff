//! Greedy phase scheduler
//!
//! Packs blob copy units into an ordered list of phases. Inside a phase no two units
//! share a pending digest, so a phase can run fully in parallel without two uploads of
//! the same content racing. A digest claimed in an earlier phase is considered uploaded
//! and no longer contends in later phases.
//!
//! Each round:
//! 1. units sharing nothing with the other remaining units go straight in;
//! 2. the rest are ranked by shared-digest count (descending, ties by destination
//!    then source) and taken greedily when they do not touch a digest already claimed.
//!
//! The top-ranked unit can never collide with an empty claim set, so every round
//! places at least one unit.

use crate::mirror::plan::BlobCopyUnit;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A unit placed in a phase, with the digests it contends for in that phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledUnit {
    /// Index into the scheduled unit slice
    pub index: usize,
    /// Pending digests not uploaded by an earlier phase
    pub pending: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phase {
    pub units: Vec<ScheduledUnit>,
}

impl Phase {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Digests claimed by the phase
    pub fn digests(&self) -> BTreeSet<&str> {
        self.units
            .iter()
            .flat_map(|unit| unit.pending.iter().map(String::as_str))
            .collect()
    }
}

pub fn schedule(units: &[BlobCopyUnit]) -> Vec<Phase> {
    let mut remaining: Vec<usize> = (0..units.len()).collect();
    let mut uploaded: HashSet<&str> = HashSet::new();
    let mut phases = Vec::new();

    while !remaining.is_empty() {
        let effective: HashMap<usize, BTreeSet<&str>> = remaining
            .iter()
            .map(|&index| {
                let pending = units[index]
                    .pending
                    .iter()
                    .map(String::as_str)
                    .filter(|digest| !uploaded.contains(digest))
                    .collect();
                (index, pending)
            })
            .collect();

        let mut demand: HashMap<&str, usize> = HashMap::new();
        for pending in effective.values() {
            for digest in pending {
                *demand.entry(digest).or_default() += 1;
            }
        }
        let shared_count = |index: &usize| {
            effective[index]
                .iter()
                .filter(|digest| demand[*digest] > 1)
                .count()
        };

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut placed: Vec<usize> = Vec::new();
        let mut contended: Vec<usize> = Vec::new();
        for &index in &remaining {
            if shared_count(&index) == 0 {
                claimed.extend(effective[&index].iter().copied());
                placed.push(index);
            } else {
                contended.push(index);
            }
        }

        contended.sort_by(|a, b| {
            shared_count(b)
                .cmp(&shared_count(a))
                .then_with(|| units[*a].sort_key().cmp(&units[*b].sort_key()))
        });
        for index in contended {
            let pending = &effective[&index];
            if pending.iter().any(|digest| claimed.contains(digest)) {
                continue;
            }
            claimed.extend(pending.iter().copied());
            placed.push(index);
        }

        placed.sort_unstable();
        let phase = Phase {
            units: placed
                .iter()
                .map(|&index| ScheduledUnit {
                    index,
                    pending: effective[&index].iter().map(|d| d.to_string()).collect(),
                })
                .collect(),
        };
        phases.push(phase);

        uploaded.extend(claimed);
        remaining.retain(|index| placed.binary_search(index).is_err());
    }

    phases
}
