//! # Swap Rules
//!
//! Decide who leaves and who joins a committee at an epoch boundary.
//!
//! | rule | slashing pass | substitute order |
//! |---|---|---|
//! | `Base` | no | insertion |
//! | `Slashing` | yes | insertion |
//! | `Dcs` | yes | score descending |
//!
//! All orderings break ties by fingerprint ascending.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use shared_types::{Fingerprint, ValidatorKey};

use crate::domain::staker::StakerInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapRule {
    Base,
    Slashing,
    Dcs,
}

/// One chain's committee and substitute with the parameters that bound a
/// swap.
#[derive(Debug, Clone, Copy)]
pub struct SwapInput<'a> {
    pub committee: &'a [ValidatorKey],
    pub substitute: &'a [ValidatorKey],
    pub stakers: &'a BTreeMap<Fingerprint, StakerInfo>,
    pub max_committee_size: usize,
    pub min_committee_size: usize,
    pub max_swap_out_percent: u8,
    pub max_swap_in_percent: u8,
    pub slashing_threshold: u64,
    pub default_performing: u64,
}

impl SwapInput<'_> {
    fn info(&self, key: &ValidatorKey) -> Option<&StakerInfo> {
        self.stakers.get(key.fingerprint())
    }

    fn score(&self, key: &ValidatorKey) -> u64 {
        self.info(key).map_or(0, |info| info.performance)
    }

    fn is_fixed(&self, key: &ValidatorKey) -> bool {
        self.info(key).map_or(false, |info| info.fixed_node)
    }

    fn power(&self, key: &ValidatorKey) -> u64 {
        self.info(key).map_or(0, StakerInfo::voting_power)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub committee: Vec<ValidatorKey>,
    pub swapped_in: Vec<ValidatorKey>,
    pub swapped_out: Vec<ValidatorKey>,
    pub slashed: Vec<ValidatorKey>,
}

impl SwapOutcome {
    pub fn is_noop(&self) -> bool {
        self.swapped_in.is_empty() && self.swapped_out.is_empty() && self.slashed.is_empty()
    }
}

impl SwapRule {
    pub fn slashes(&self) -> bool {
        matches!(self, SwapRule::Slashing | SwapRule::Dcs)
    }

    /// Members removed before the normal swap: non-fixed, score below the
    /// threshold, lowest first, never taking the committee under minimum.
    pub fn select_slashed(&self, input: &SwapInput<'_>) -> Vec<ValidatorKey> {
        if !self.slashes() {
            return Vec::new();
        }
        let budget = input.committee.len().saturating_sub(input.min_committee_size);
        let mut below: Vec<&ValidatorKey> = input
            .committee
            .iter()
            .filter(|key| !input.is_fixed(key) && input.score(key) < input.slashing_threshold)
            .collect();
        below.sort_by(|a, b| {
            input
                .score(a)
                .cmp(&input.score(b))
                .then_with(|| a.fingerprint().cmp(b.fingerprint()))
        });
        below.into_iter().take(budget).cloned().collect()
    }

    /// Removal candidates among `remaining`: non-fixed, lowest score first.
    pub fn select_out(&self, input: &SwapInput<'_>, remaining: &[ValidatorKey]) -> Vec<ValidatorKey> {
        let mut out: Vec<&ValidatorKey> = remaining.iter().filter(|key| !input.is_fixed(key)).collect();
        out.sort_by(|a, b| {
            input
                .score(a)
                .cmp(&input.score(b))
                .then_with(|| a.fingerprint().cmp(b.fingerprint()))
        });
        out.into_iter().cloned().collect()
    }

    /// Eligible substitutes in promotion order. Zero-stake entries are
    /// skipped.
    pub fn select_in(&self, input: &SwapInput<'_>) -> Vec<ValidatorKey> {
        let mut eligible: Vec<&ValidatorKey> = input
            .substitute
            .iter()
            .filter(|key| input.info(key).map_or(false, |info| info.staked_amount > 0))
            .collect();
        if *self == SwapRule::Dcs {
            eligible.sort_by(|a, b| {
                input
                    .score(b)
                    .cmp(&input.score(a))
                    .then_with(|| a.fingerprint().cmp(b.fingerprint()))
            });
        }
        eligible.into_iter().cloned().collect()
    }

    pub fn apply(&self, input: &SwapInput<'_>) -> SwapOutcome {
        let n = input.committee.len();
        let slashed = self.select_slashed(input);
        let slashed_set: HashSet<&Fingerprint> = slashed.iter().map(|k| k.fingerprint()).collect();
        let remaining: Vec<ValidatorKey> = input
            .committee
            .iter()
            .filter(|key| !slashed_set.contains(key.fingerprint()))
            .cloned()
            .collect();

        let candidates_in = self.select_in(input);
        let candidates_out = self.select_out(input, &remaining);

        let max_out = n * usize::from(input.max_swap_out_percent) / 100;
        let max_in = if n == 0 {
            input.max_committee_size
        } else {
            // Vacancies left by slashing may always be refilled.
            (n * usize::from(input.max_swap_in_percent) / 100).max(slashed.len())
        };
        let in_cap = max_in.min(candidates_in.len());
        let mut num_out = max_out.min(in_cap).min(candidates_out.len());
        let free_seats = input
            .max_committee_size
            .saturating_sub(remaining.len() - num_out);
        let mut num_in = in_cap.min(free_seats);
        num_out = num_out.min(num_in);

        let pre_power: u64 = input.committee.iter().map(|k| input.power(k)).sum();

        while num_in > 0 {
            let ins = &candidates_in[..num_in];
            let outs = &candidates_out[..num_out];
            let committee = self.reorder(input, &remaining, ins, outs);
            let in_power: u64 = ins.iter().map(|k| input.power(k)).sum();
            let total: u64 = committee.iter().map(|k| input.power(k)).sum();
            if pre_power == 0 || in_power.saturating_mul(3) < total {
                return SwapOutcome {
                    committee,
                    swapped_in: ins.to_vec(),
                    swapped_out: outs.to_vec(),
                    slashed,
                };
            }
            num_in -= 1;
            num_out = num_out.min(num_in);
        }

        let committee = if slashed.is_empty() {
            input.committee.to_vec()
        } else {
            self.reorder(input, &remaining, &[], &[])
        };
        SwapOutcome {
            committee,
            swapped_in: Vec::new(),
            swapped_out: Vec::new(),
            slashed,
        }
    }

    /// Fixed nodes first in their existing order, then everyone else by
    /// score descending. Newcomers rank with the default score.
    fn reorder(
        &self,
        input: &SwapInput<'_>,
        remaining: &[ValidatorKey],
        ins: &[ValidatorKey],
        outs: &[ValidatorKey],
    ) -> Vec<ValidatorKey> {
        let out_set: HashSet<&Fingerprint> = outs.iter().map(|k| k.fingerprint()).collect();
        let (fixed, mut regular): (Vec<(u64, &ValidatorKey)>, Vec<(u64, &ValidatorKey)>) = remaining
            .iter()
            .filter(|key| !out_set.contains(key.fingerprint()))
            .map(|key| (input.score(key), key))
            .partition(|(_, key)| input.is_fixed(key));
        regular.extend(ins.iter().map(|key| (input.default_performing, key)));
        regular.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.fingerprint().cmp(b.fingerprint())));

        fixed
            .into_iter()
            .chain(regular)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_keys::key;
    use proptest::prelude::*;

    struct Fixture {
        committee: Vec<ValidatorKey>,
        substitute: Vec<ValidatorKey>,
        stakers: BTreeMap<Fingerprint, StakerInfo>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                committee: Vec::new(),
                substitute: Vec::new(),
                stakers: BTreeMap::new(),
            }
        }

        fn member(mut self, i: u8, score: u64, fixed: bool) -> Self {
            let info = if fixed {
                StakerInfo::fixed(100, "rr", score)
            } else {
                StakerInfo::new(100, "rr", true, score)
            };
            self.stakers.insert(key(i).fingerprint().clone(), info);
            self.committee.push(key(i));
            self
        }

        fn sub(mut self, i: u8, score: u64, stake: u64) -> Self {
            self.stakers
                .insert(key(i).fingerprint().clone(), StakerInfo::new(stake, "rr", true, score));
            self.substitute.push(key(i));
            self
        }

        fn input(&self, max: usize) -> SwapInput<'_> {
            SwapInput {
                committee: &self.committee,
                substitute: &self.substitute,
                stakers: &self.stakers,
                max_committee_size: max,
                min_committee_size: 1,
                max_swap_out_percent: 25,
                max_swap_in_percent: 25,
                slashing_threshold: 10,
                default_performing: 60,
            }
        }
    }

    #[test]
    fn test_slashing_rule_epoch_edge() {
        // A fixed; B 50, C 20, D 70; substitutes E 80, F 40.
        let f = Fixture::new()
            .member(1, 0, true)
            .member(2, 50, false)
            .member(3, 20, false)
            .member(4, 70, false)
            .sub(5, 80, 100)
            .sub(6, 40, 100);
        let outcome = SwapRule::Slashing.apply(&f.input(4));

        assert_eq!(outcome.swapped_out, vec![key(3)]);
        assert_eq!(outcome.swapped_in, vec![key(5)]);
        assert!(outcome.slashed.is_empty());
        assert_eq!(outcome.committee, vec![key(1), key(4), key(5), key(2)]);
    }

    #[test]
    fn test_full_committee_without_substitutes_is_noop() {
        let f = Fixture::new()
            .member(1, 50, false)
            .member(2, 40, false)
            .member(3, 30, false)
            .member(4, 20, false);
        let outcome = SwapRule::Base.apply(&f.input(4));
        assert!(outcome.is_noop());
        assert_eq!(outcome.committee, f.committee);
    }

    #[test]
    fn test_fixed_nodes_never_leave() {
        let f = Fixture::new()
            .member(1, 0, true)
            .member(2, 0, true)
            .member(3, 0, true)
            .member(4, 0, true)
            .sub(5, 90, 100);
        let outcome = SwapRule::Dcs.apply(&f.input(4));
        assert!(outcome.is_noop());
    }

    #[test]
    fn test_slashing_pass_respects_minimum() {
        let f = Fixture::new()
            .member(1, 5, false)
            .member(2, 3, false)
            .member(3, 50, false);
        let mut input = f.input(3);
        input.min_committee_size = 2;
        let outcome = SwapRule::Slashing.apply(&input);
        assert_eq!(outcome.slashed, vec![key(2)]);
        assert_eq!(outcome.committee, vec![key(3), key(1)]);

        assert!(SwapRule::Base.select_slashed(&input).is_empty());
    }

    #[test]
    fn test_zero_stake_substitutes_are_ineligible() {
        let f = Fixture::new()
            .member(1, 50, false)
            .member(2, 40, false)
            .member(3, 30, false)
            .sub(4, 90, 0);
        let outcome = SwapRule::Base.apply(&f.input(4));
        assert!(outcome.swapped_in.is_empty());
    }

    #[test]
    fn test_dcs_orders_substitutes_by_score() {
        let f = Fixture::new().sub(1, 10, 100).sub(2, 90, 100).sub(3, 50, 100);
        let input = f.input(4);
        assert_eq!(SwapRule::Base.select_in(&input), vec![key(1), key(2), key(3)]);
        assert_eq!(SwapRule::Dcs.select_in(&input), vec![key(2), key(3), key(1)]);
    }

    #[test]
    fn test_voting_power_bound_shrinks_batch() {
        // Two members with power 1 each; a newcomer with power 100 would
        // hold more than a third of the new committee.
        let mut f = Fixture::new()
            .member(1, 50, false)
            .member(2, 40, false)
            .sub(3, 90, 10_000);
        for fp in [key(1), key(2)] {
            if let Some(info) = f.stakers.get_mut(fp.fingerprint()) {
                info.staked_amount = 1;
            }
        }
        let mut input = f.input(4);
        input.max_swap_in_percent = 100;
        let outcome = SwapRule::Base.apply(&input);
        assert!(outcome.is_noop());
    }

    #[test]
    fn test_bootstrap_fills_empty_committee() {
        let f = Fixture::new().sub(1, 60, 100).sub(2, 60, 100);
        let outcome = SwapRule::Base.apply(&f.input(4));
        assert_eq!(outcome.swapped_in.len(), 2);
        assert_eq!(outcome.committee.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_apply_is_deterministic_and_bounded(
            scores in proptest::collection::vec(0u64..100, 1..8),
            subs in proptest::collection::vec(0u64..100, 0..6),
        ) {
            let mut f = Fixture::new();
            for (i, score) in scores.iter().enumerate() {
                f = f.member(i as u8, *score, i == 0);
            }
            for (i, score) in subs.iter().enumerate() {
                f = f.sub(100 + i as u8, *score, 100);
            }
            let input = f.input(8);
            for rule in [SwapRule::Base, SwapRule::Slashing, SwapRule::Dcs] {
                let a = rule.apply(&input);
                prop_assert_eq!(&a, &rule.apply(&input));
                prop_assert!(a.committee.len() <= 8);
                prop_assert!(a.swapped_out.len() <= a.swapped_in.len());
                prop_assert_eq!(&a.committee[0], &key(0));
            }
        }
    }
}
