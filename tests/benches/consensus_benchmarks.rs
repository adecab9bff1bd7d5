//! # Shardline Consensus Benchmarks
//!
//! | Area | Operation | Sizes |
//! |------|-----------|-------|
//! | sc-01 Signature Aggregation | aggregate + verify | committees of 4 to 64 |
//! | sc-02 Committee State | shard assignment | 64 to 1024 candidates |
//! | sc-02 Committee State | swap rule | committees of 32 and 128 |

use std::collections::BTreeMap;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use sc_01_signature_aggregation::{quorum_threshold, MultiSignature, PartialSig, SignatureAggregator};
use sc_02_committee_state::{assign_candidates, StakerInfo, SwapInput, SwapRule};
use sc_tests::integration::{key, secrets};
use shared_types::{keccak256, Fingerprint, ValidatorKey};

const SCOPE: &str = "bench";

fn bench_signature_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("sc-01-signature-aggregation");
    group.measurement_time(Duration::from_secs(10));
    let aggregator = SignatureAggregator::new();
    let digest = keccak256(b"block header under vote");

    for size in [4usize, 16, 64] {
        let members: Vec<_> = (0..size).map(|i| secrets(SCOPE, i)).collect();
        let committee: Vec<ValidatorKey> = members.iter().map(|s| s.validator_key().unwrap()).collect();
        let partials: Vec<(usize, PartialSig)> = members
            .iter()
            .enumerate()
            .take(quorum_threshold(size))
            .map(|(i, s)| (i, aggregator.sign(&digest, &s.mining).unwrap()))
            .collect();
        let aggregate = aggregator.aggregate(&digest, &committee, &partials).unwrap();

        group.throughput(Throughput::Elements(partials.len() as u64));
        group.bench_with_input(BenchmarkId::new("aggregate_quorum", size), &partials, |b, partials| {
            b.iter(|| black_box(aggregator.aggregate(&digest, &committee, partials).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("verify_aggregate", size), &aggregate, |b, aggregate| {
            b.iter(|| black_box(aggregator.verify_aggregate(&digest, &committee, aggregate).is_ok()))
        });
    }

    group.finish();
}

fn bench_shard_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("sc-02-shard-assignment");
    let mut rng = rand::thread_rng();

    for count in [64usize, 256, 1024] {
        let candidates: Vec<ValidatorKey> = (0..count)
            .map(|i| {
                let seed = (i % 251) as u8;
                let mut bytes = [seed; 32];
                bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
                ValidatorKey::new(bytes, [seed; 96], [seed; 33])
            })
            .collect();
        let sizes: Vec<usize> = (0..8).map(|_| rng.gen_range(0..32)).collect();
        let random: u64 = rng.gen();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("assign_candidates", count), &candidates, |b, candidates| {
            b.iter(|| black_box(assign_candidates(candidates, &sizes, random, 4)))
        });
    }

    group.finish();
}

fn bench_swap_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("sc-02-swap-rule");
    let mut rng = rand::thread_rng();

    for size in [32usize, 128] {
        let committee: Vec<ValidatorKey> = (0..size).map(|i| key(SCOPE, 1_000 + i)).collect();
        let substitute: Vec<ValidatorKey> = (0..size / 2).map(|i| key(SCOPE, 2_000 + i)).collect();
        let stakers: BTreeMap<Fingerprint, StakerInfo> = committee
            .iter()
            .chain(&substitute)
            .map(|k| {
                let info = StakerInfo::new(100, "rr", true, rng.gen_range(0..100));
                (k.fingerprint().clone(), info)
            })
            .collect();

        for rule in [SwapRule::Base, SwapRule::Slashing, SwapRule::Dcs] {
            let input = SwapInput {
                committee: &committee,
                substitute: &substitute,
                stakers: &stakers,
                max_committee_size: size,
                min_committee_size: 4,
                max_swap_out_percent: 25,
                max_swap_in_percent: 25,
                slashing_threshold: 10,
                default_performing: 60,
            };
            group.bench_function(BenchmarkId::new(format!("{rule:?}"), size), |b| {
                b.iter(|| black_box(rule.apply(&input)))
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_signature_aggregation,
    bench_shard_assignment,
    bench_swap_rule
);
criterion_main!(benches);
