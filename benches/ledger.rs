// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Benchmarks for the point ledger.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded earn and use
//! - Refunds walking long usage details
//! - Multi-threaded operations across users
//! - Expiration sweep over many lots

use chrono::{Duration, TimeZone, Utc};
use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};
use point_ledger_rs::{LedgerConfig, ManualClock, PointLedger, UserId};
use rayon::prelude::*;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

fn make_ledger() -> (PointLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    ));
    let ledger = PointLedger::with_clock(&LedgerConfig::default(), clock.clone()).unwrap();
    (ledger, clock)
}

fn seed_lots(ledger: &PointLedger, user: UserId, count: usize, amount: i64) {
    for i in 0..count {
        ledger.earn(user, amount, i % 5 == 0, &format!("SEED-{i}")).unwrap();
    }
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_earn(c: &mut Criterion) {
    c.bench_function("single_earn", |b| {
        b.iter(|| {
            let (ledger, _) = make_ledger();
            ledger
                .earn(UserId(1), black_box(1_000), false, "E-1")
                .unwrap();
        })
    });
}

fn bench_earn_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("earn_throughput");

    for count in [100, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let (ledger, _) = make_ledger();
                seed_lots(&ledger, UserId(1), count, 100);
                black_box(&ledger);
            })
        });
    }
    group.finish();
}

fn bench_use_across_lots(c: &mut Criterion) {
    let mut group = c.benchmark_group("use_across_lots");

    for lots in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*lots as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lots), lots, |b, &lots| {
            b.iter_batched(
                || {
                    let (ledger, _) = make_ledger();
                    seed_lots(&ledger, UserId(1), lots, 100);
                    ledger
                },
                |ledger| {
                    ledger
                        .use_points(UserId(1), black_box(lots as i64 * 100), "ORD-1")
                        .unwrap();
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_partial_refunds(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_refunds");

    for lots in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(lots), lots, |b, &lots| {
            b.iter_batched(
                || {
                    let (ledger, clock) = make_ledger();
                    seed_lots(&ledger, UserId(1), lots, 100);
                    ledger
                        .use_points(UserId(1), lots as i64 * 100, "ORD-1")
                        .unwrap();
                    // Every lot has expired, so each refund creates a RESTORE lot.
                    clock.advance(Duration::days(366));
                    ledger
                },
                |ledger| {
                    for _ in 0..lots {
                        ledger.cancel_use(UserId(1), "ORD-1", 100).unwrap();
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let total_ops = 10_000u64;

    for num_users in [1, 10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(total_ops));
        group.bench_with_input(
            BenchmarkId::new("users", num_users),
            num_users,
            |b, &num_users| {
                b.iter(|| {
                    let (ledger, _) = make_ledger();

                    (0..total_ops).into_par_iter().for_each(|i| {
                        let user = UserId(i % num_users);
                        let reference = format!("E-{i}");
                        ledger.earn(user, 10, false, &reference).unwrap();
                    });

                    black_box(&ledger);
                })
            },
        );
    }
    group.finish();
}

// =============================================================================
// Expiration Sweep
// =============================================================================

fn bench_expiration_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiration_sweep");

    for users in [100, 1_000].iter() {
        let lots_per_user = 10;
        group.throughput(Throughput::Elements(*users as u64 * lots_per_user as u64));
        group.bench_with_input(BenchmarkId::from_parameter(users), users, |b, &users| {
            b.iter_batched(
                || {
                    let (ledger, clock) = make_ledger();
                    (0..users).into_par_iter().for_each(|u| {
                        seed_lots(&ledger, UserId(u), lots_per_user, 100);
                    });
                    clock.advance(Duration::days(366));
                    ledger
                },
                |ledger| black_box(ledger.run_expiration(None)),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_earn,
    bench_earn_throughput,
    bench_use_across_lots,
    bench_partial_refunds,
    bench_contention,
    bench_expiration_sweep,
);
criterion_main!(benches);
