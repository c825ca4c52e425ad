//! Lifecycle of the executor itself

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::bounded;
use lockweave::{EngineError, ExecutorConfig, ExecutorManager, WorkerState};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_shutdown_stops_idle_workers_promptly() {
    let manager = ExecutorManager::with_workers(4).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while manager
        .worker_states()
        .iter()
        .any(|state| *state != WorkerState::Parked)
    {
        assert!(Instant::now() < deadline, "workers never parked");
        thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    manager.shutdown();
    manager.join();
    assert!(started.elapsed() < TIMEOUT);
    assert!(manager
        .worker_states()
        .iter()
        .all(|state| *state == WorkerState::Shutdown));

    assert!(matches!(
        manager.schedule_fn(|| {}, 0),
        Err(EngineError::ShutDown)
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = ExecutorManager::new(ExecutorConfig::default().with_priority_levels(0)).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert!(err.to_string().contains("priority_levels"));
}

#[test]
fn test_join_from_inside_task_skips_caller() {
    let manager = Arc::new(ExecutorManager::with_workers(2).unwrap());
    let (done_tx, done_rx) = bounded(1);

    let inner = manager.clone();
    manager
        .schedule_fn(
            move || {
                inner.shutdown();
                inner.join();
                done_tx.send(()).unwrap();
            },
            0,
        )
        .unwrap();

    done_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(!manager.is_running());
}

#[test]
fn test_stack_size_and_names_apply() {
    let config = ExecutorConfig::default()
        .with_worker_threads(1)
        .with_thread_name("sized")
        .with_stack_size(256 * 1024);
    let manager = ExecutorManager::new(config).unwrap();
    let (name_tx, name_rx) = bounded(1);

    manager
        .schedule_fn(
            move || {
                let name = thread::current().name().map(str::to_string);
                name_tx.send(name).unwrap();
            },
            0,
        )
        .unwrap();

    assert_eq!(
        name_rx.recv_timeout(TIMEOUT).unwrap().as_deref(),
        Some("sized-0")
    );
}
