//! Priority and lock ordering through the public API

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded};
use lockweave::{ExecutorConfig, ExecutorManager, LockToken, TaskBuilder};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_single_worker_drains_by_priority_then_fifo() {
    lockweave::util::logger::init();

    let manager = ExecutorManager::new(
        ExecutorConfig::default()
            .with_worker_threads(1)
            .with_priority_levels(4),
    )
    .unwrap();

    let (gate_tx, gate_rx) = bounded::<()>(0);
    let (started_tx, started_rx) = bounded::<()>(1);
    manager
        .schedule_fn(
            move || {
                started_tx.send(()).unwrap();
                gate_rx.recv().unwrap();
            },
            0,
        )
        .unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();

    let (log_tx, log_rx) = unbounded();
    for (label, priority) in [("e1", 2), ("e2", 0), ("e3", 0), ("e4", 3)] {
        let log_tx = log_tx.clone();
        manager
            .schedule_fn(move || log_tx.send(label).unwrap(), priority)
            .unwrap();
    }
    gate_tx.send(()).unwrap();

    let order: Vec<_> = (0..4)
        .map(|_| log_rx.recv_timeout(TIMEOUT).unwrap())
        .collect();
    assert_eq!(order, vec!["e2", "e3", "e1", "e4"]);
}

#[test]
fn test_shared_token_serializes_writers() {
    let manager = ExecutorManager::with_workers(4).unwrap();
    let ledger = LockToken::named("ledger");
    let balance = Arc::new(parking_lot::Mutex::new(0u64));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = unbounded();

    for i in 0..64u32 {
        let balance = balance.clone();
        let overlaps = overlaps.clone();
        let inside = inside.clone();
        let done_tx = done_tx.clone();
        let task = TaskBuilder::new()
            .name(format!("deposit-{}", i))
            .priority((i % 4) as usize)
            .lock(ledger.clone())
            .build(move || {
                if inside.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                // Split read and write: only exclusive access keeps the sum exact.
                let current = *balance.lock();
                std::thread::yield_now();
                *balance.lock() = current + 1;
                inside.store(false, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            });
        manager.schedule(Arc::new(task)).unwrap();
    }

    for _ in 0..64 {
        done_rx.recv_timeout(TIMEOUT).unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(*balance.lock(), 64);
}
