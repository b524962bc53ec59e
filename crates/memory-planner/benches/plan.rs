// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the offset planner on synthetic graphs of varying size.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use memory_planner::{plan_offsets, AllocArena};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Builds an arena shaped like a deep network: each op produces one tensor
/// consumed by the next op, with occasional skip connections and chains.
fn synthetic_arena(num_ops: usize, seed: u64) -> AllocArena {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut arena = AllocArena::new();
    let mut prev = None;

    for op in 0..num_ops {
        let size = rng.gen_range(1..=64) * 1024;
        let id = arena.push(size, op);
        if let Some(p) = prev {
            arena.extend_lifetime(p, op);
        }
        // Occasional long-lived skip connection.
        if rng.gen_bool(0.2) {
            arena.extend_lifetime(id, (op + rng.gen_range(2..8)).min(num_ops - 1));
        }
        // Occasional adjacency chain (concatenation input).
        if rng.gen_bool(0.1) {
            if let Some(p) = prev {
                let _ = arena.chain(p, id);
            }
        }
        prev = Some(id);
    }
    arena
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_offsets");
    for &num_ops in &[32usize, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(num_ops), &num_ops, |b, &n| {
            b.iter_batched(
                || synthetic_arena(n, 42),
                |mut arena| plan_offsets(&mut arena),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
