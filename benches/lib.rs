//! # lockweave benchmarks
//!
//! Criterion.rs benchmarks for the executor and its queue.
//!
//! ## Groups
//! - `queue`: single-threaded enqueue/dequeue cost of the priority queue
//! - `executor`: end-to-end throughput with and without lock contention
//!
//! ## Usage
//! ```bash
//! cargo bench           # run everything
//! cargo bench queue     # queue only
//! cargo bench executor  # executor only
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam::channel::unbounded;
use lockweave::{DynamicPriorityQueue, ExecutorManager, LockToken, TaskBuilder};

const BATCH: usize = 10_000;

// ============================================================================
// Queue
// ============================================================================

fn bench_queue_fill_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(BATCH as u64));

    for levels in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::new("fill_drain", levels), &levels, |b, &levels| {
            let queue = DynamicPriorityQueue::new(levels).unwrap();
            b.iter(|| {
                for i in 0..BATCH {
                    queue.enqueue(i, i % levels).unwrap();
                }
                while let Some(i) = queue.dequeue() {
                    black_box(i);
                }
            })
        });
    }
    group.finish();
}

// ============================================================================
// Executor
// ============================================================================

/// Schedule `BATCH` empty tasks drawing from `tokens` and wait for all of them.
fn run_batch(
    manager: &ExecutorManager,
    tokens: &[LockToken],
) {
    let (done_tx, done_rx) = unbounded();
    for i in 0..BATCH {
        let done_tx = done_tx.clone();
        let mut builder = TaskBuilder::new().priority(i % 8);
        if !tokens.is_empty() {
            builder = builder.lock(tokens[i % tokens.len()].clone());
        }
        let task = builder.build(move || {
            let _ = done_tx.send(());
        });
        manager.schedule(Arc::new(task)).unwrap();
    }
    for _ in 0..BATCH {
        done_rx.recv().unwrap();
    }
}

fn bench_executor_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.sample_size(10);

    let manager = ExecutorManager::with_workers(4).unwrap();
    let cases: [(&str, Vec<LockToken>); 3] = [
        ("lock_free", Vec::new()),
        ("disjoint_tokens", (0..64).map(|_| LockToken::new()).collect()),
        ("single_token", vec![LockToken::new()]),
    ];

    for (name, tokens) in &cases {
        group.bench_function(*name, |b| b.iter(|| run_batch(&manager, tokens)));
    }
    group.finish();
}

criterion_group!(queue, bench_queue_fill_drain);

criterion_group!(executor, bench_executor_throughput);

criterion_main!(queue, executor);
