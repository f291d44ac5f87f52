// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the job store: job creation, the full
// claim/complete cycle, and scanning a backlog for claimable jobs.

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use printdesk_core::types::{OwnerId, PayloadRef};
use printdesk_print::blob::hash_bytes;
use printdesk_print::{JobStore, Transition};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn owner() -> OwnerId {
    OwnerId::new("bench")
}

fn payload() -> PayloadRef {
    PayloadRef::new(hash_bytes(b"%PDF-1.7 bench"))
}

/// A file-backed store in a fresh temp dir, so WAL and fsync costs are real.
fn file_store() -> (tempfile::TempDir, JobStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JobStore::open(dir.path().join("bench.db")).expect("open store");
    (dir, store)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_create(c: &mut Criterion) {
    let (_dir, store) = file_store();
    let (owner, payload) = (owner(), payload());

    c.bench_function("create job (file)", |b| {
        b.iter(|| {
            let job = store.create(&owner, &payload, "bench.pdf").expect("create");
            black_box(job);
        });
    });
}

/// Claim then complete one job: two compare-and-swap transactions.
fn bench_claim_complete(c: &mut Criterion) {
    let (_dir, store) = file_store();
    let (owner, payload) = (owner(), payload());

    c.bench_function("claim + complete (file)", |b| {
        b.iter_batched(
            || store.create(&owner, &payload, "bench.pdf").expect("create").id,
            |id| {
                store.transition(&id, Transition::claim()).expect("claim");
                let done = store
                    .transition(&id, Transition::complete().expecting_attempts(1))
                    .expect("complete");
                black_box(done);
            },
            BatchSize::SmallInput,
        );
    });
}

/// Pick the next batch out of a 1000-job backlog.
fn bench_list_pending(c: &mut Criterion) {
    let store = JobStore::open_in_memory().expect("open store");
    let (owner, payload) = (owner(), payload());
    for i in 0..1000 {
        store
            .create(&owner, &payload, &format!("{i}.pdf"))
            .expect("create");
    }

    c.bench_function("list_pending 16 of 1000 (memory)", |b| {
        b.iter(|| {
            let jobs = store.list_pending(black_box(16)).expect("list");
            assert_eq!(jobs.len(), 16);
        });
    });
}

criterion_group!(benches, bench_create, bench_claim_complete, bench_list_pending);
criterion_main!(benches);
