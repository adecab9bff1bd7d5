//! # Committee Change
//!
//! Structured diff between two snapshots. Together with the pre-state it
//! is enough to rebuild the post-state, see [`CommitteeChange::apply_to`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared_types::{ChainId, Fingerprint, ValidatorKey};

use super::errors::{CommitteeError, CommitteeResult};
use super::staker::StakerInfo;
use super::state::{CommitteeState, EpochScalars, ListId};

/// Changes to one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDelta {
    pub added: Vec<ValidatorKey>,
    pub removed: Vec<Fingerprint>,
    /// Final order of the list.
    pub order: Vec<Fingerprint>,
}

/// Events recorded while folding a batch, beyond what the list diff shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvents {
    pub swapped_in: Vec<Fingerprint>,
    pub swapped_out: Vec<Fingerprint>,
    pub slashed: Vec<Fingerprint>,
    pub stop_auto_stake: Vec<Fingerprint>,
    pub unstaked: Vec<Fingerprint>,
}

impl ChangeEvents {
    pub fn merge(&mut self, other: ChangeEvents) {
        self.swapped_in.extend(other.swapped_in);
        self.swapped_out.extend(other.swapped_out);
        self.slashed.extend(other.slashed);
        self.stop_auto_stake.extend(other.stop_auto_stake);
        self.unstaked.extend(other.unstaked);
    }

    pub fn is_empty(&self) -> bool {
        self.swapped_in.is_empty()
            && self.swapped_out.is_empty()
            && self.slashed.is_empty()
            && self.stop_auto_stake.is_empty()
            && self.unstaked.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeChange {
    pub lists: BTreeMap<ListId, ListDelta>,
    pub staker_upserts: BTreeMap<Fingerprint, StakerInfo>,
    pub staker_removals: Vec<Fingerprint>,
    pub events: ChangeEvents,
    /// Present when any scalar changed.
    pub scalars: Option<EpochScalars>,
}

impl CommitteeChange {
    /// Diff `pre` against `post`.
    pub fn between(pre: &CommitteeState, post: &CommitteeState, events: ChangeEvents) -> Self {
        let mut ids: Vec<ListId> = pre.list_ids();
        for id in post.list_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let mut lists = BTreeMap::new();
        for id in ids {
            let before = pre.list(id);
            let after = post.list(id);
            if before == after {
                continue;
            }
            let before_set: HashSet<&Fingerprint> = before.iter().map(|k| k.fingerprint()).collect();
            let after_set: HashSet<&Fingerprint> = after.iter().map(|k| k.fingerprint()).collect();
            lists.insert(
                id,
                ListDelta {
                    added: after
                        .iter()
                        .filter(|k| !before_set.contains(k.fingerprint()))
                        .cloned()
                        .collect(),
                    removed: before
                        .iter()
                        .map(|k| k.fingerprint())
                        .filter(|fp| !after_set.contains(fp))
                        .cloned()
                        .collect(),
                    order: after.iter().map(|k| k.fingerprint().clone()).collect(),
                },
            );
        }

        let staker_upserts = post
            .stakers()
            .iter()
            .filter(|(fp, info)| pre.staker_info(fp) != Some(*info))
            .map(|(fp, info)| (fp.clone(), info.clone()))
            .collect();
        let staker_removals = pre
            .stakers()
            .keys()
            .filter(|fp| post.staker_info(fp).is_none())
            .cloned()
            .collect();

        let scalars = (pre.scalars() != post.scalars()).then(|| post.scalars());

        Self {
            lists,
            staker_upserts,
            staker_removals,
            events,
            scalars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
            && self.staker_upserts.is_empty()
            && self.staker_removals.is_empty()
            && self.events.is_empty()
            && self.scalars.is_none()
    }

    /// Chains whose committee list changed.
    pub fn changed_committees(&self) -> Vec<ChainId> {
        self.lists
            .keys()
            .filter(|id| id.is_committee())
            .filter_map(ListId::chain)
            .collect()
    }

    pub fn swapped_in(&self) -> &[Fingerprint] {
        &self.events.swapped_in
    }

    pub fn swapped_out(&self) -> &[Fingerprint] {
        &self.events.swapped_out
    }

    pub fn slashed(&self) -> &[Fingerprint] {
        &self.events.slashed
    }

    pub fn stop_auto_stake(&self) -> &[Fingerprint] {
        &self.events.stop_auto_stake
    }

    /// Rebuild the post-state from `pre`.
    pub fn apply_to(&self, pre: &CommitteeState) -> CommitteeResult<CommitteeState> {
        let mut known: HashMap<Fingerprint, ValidatorKey> = HashMap::new();
        for id in pre.list_ids() {
            for key in pre.list(id) {
                known.insert(key.fingerprint().clone(), key.clone());
            }
        }
        for delta in self.lists.values() {
            for key in &delta.added {
                known.insert(key.fingerprint().clone(), key.clone());
            }
        }

        let mut post = pre.clone();
        for (id, delta) in &self.lists {
            let rebuilt = delta
                .order
                .iter()
                .map(|fp| {
                    known.get(fp).cloned().ok_or_else(|| {
                        CommitteeError::InvariantViolation(format!(
                            "change references unknown key {} in {}",
                            fp.short(),
                            id
                        ))
                    })
                })
                .collect::<CommitteeResult<Vec<_>>>()?;
            *post.list_mut(*id)? = rebuilt;
        }

        for fp in &self.staker_removals {
            post.staker_info.remove(fp);
        }
        for (fp, info) in &self.staker_upserts {
            post.staker_info.insert(fp.clone(), info.clone());
        }
        if let Some(scalars) = self.scalars {
            post.scalars = scalars;
        }
        Ok(post)
    }
}
