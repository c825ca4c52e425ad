//! Executor combined with the lifecycle primitives

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::bounded;
use lockweave::{
    BusyReferenceCounter, Cancellable, CancellationSignaller, ExecutorManager, LockToken,
    ObjectPool, SingleAssignmentMap, TaskBuilder,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_batch_completion_barrier() {
    let manager = ExecutorManager::with_workers(3).unwrap();
    let pending = Arc::new(BusyReferenceCounter::new());
    let results = Arc::new(SingleAssignmentMap::new());
    let pool = Arc::new(ObjectPool::new(
        2,
        || String::with_capacity(32),
        |_: &mut String| {},
        |buf: &mut String| buf.clear(),
    ));

    // Hold a reference while submitting so the barrier cannot fire early.
    pending.increment_ref_count();
    for shard in 0..16usize {
        pending.increment_ref_count();
        let pending = pending.clone();
        let results = results.clone();
        let pool = pool.clone();
        let task = TaskBuilder::new()
            .priority(shard % 3)
            .lock(LockToken::named(format!("shard-{}", shard % 4)))
            .build(move || {
                let mut buf = pool.alloc_guard();
                buf.push_str("shard-");
                buf.push_str(&shard.to_string());
                results.set(shard, (*buf).clone()).unwrap();
                pending.decrement_ref_count();
            });
        manager.schedule(Arc::new(task)).unwrap();
    }

    let (done_tx, done_rx) = bounded(1);
    pending.add_listener(move || done_tx.send(()).unwrap());
    pending.decrement_ref_count();
    done_rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(results.len(), 16);
    for shard in 0..16usize {
        assert_eq!(results.get(&shard).unwrap(), format!("shard-{}", shard));
    }
    assert!(pool.available() <= pool.capacity());
}

#[test]
fn test_cooperative_cancellation_of_queued_work() {
    let manager = ExecutorManager::with_workers(2).unwrap();
    let cancel = Cancellable::new();
    let skipped = Arc::new(AtomicUsize::new(0));
    let ran = Arc::new(AtomicUsize::new(0));
    let token = LockToken::new();

    let (gate_tx, gate_rx) = bounded::<()>(0);
    let (started_tx, started_rx) = bounded::<()>(1);
    let holder = TaskBuilder::new().lock(token.clone()).build(move || {
        started_tx.send(()).unwrap();
        gate_rx.recv().unwrap();
    });
    manager.schedule(Arc::new(holder)).unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();

    let counter = Arc::new(BusyReferenceCounter::new());
    for _ in 0..8 {
        let guard_counter = counter.clone();
        guard_counter.increment_ref_count();
        let cancel = cancel.clone();
        let skipped = skipped.clone();
        let ran = ran.clone();
        let task = TaskBuilder::new().lock(token.clone()).build(move || {
            if cancel.is_cancelled() {
                skipped.fetch_add(1, Ordering::SeqCst);
            } else {
                ran.fetch_add(1, Ordering::SeqCst);
            }
            guard_counter.decrement_ref_count();
        });
        manager.schedule(Arc::new(task)).unwrap();
    }

    cancel.cancel();
    gate_tx.send(()).unwrap();

    let (done_tx, done_rx) = bounded(1);
    counter.add_listener(move || done_tx.send(()).unwrap());
    done_rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(skipped.load(Ordering::SeqCst), 8);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_signaller_completed_from_task() {
    let manager = ExecutorManager::with_workers(1).unwrap();
    let signaller = Arc::new(CancellationSignaller::new(|_| {}));
    let (seen_tx, seen_rx) = bounded(1);
    signaller.add_listener(move |result| seen_tx.send(result.is_ok()).unwrap());

    let completer = signaller.clone();
    manager
        .schedule_fn(
            move || {
                completer.succeed();
            },
            0,
        )
        .unwrap();

    assert!(seen_rx.recv_timeout(TIMEOUT).unwrap());
    assert!(signaller.is_complete());
    assert!(!signaller.is_cancelled());
}
