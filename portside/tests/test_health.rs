//! Health monitor retry-loop tests, driven on a fake clock

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{recording_sleep_fn, FakeRunner};
use portside::deploy::health::{cancellation, HealthMonitor, RetryPolicy};
use portside::errors::PortsideError;

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        retry_interval: Duration::from_secs(2),
        jitter: None,
    }
}

#[tokio::test]
async fn test_first_poll_success_never_sleeps() {
    let runner = FakeRunner::new();
    runner.healthy_after(4000, 0);

    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let monitor = HealthMonitor::new(policy(10), recording_sleep_fn(sleeps.clone()));
    let (_tx, mut cancel) = cancellation();

    let attempts = monitor
        .wait_until_active(runner.as_ref(), "webapp", 4000, &mut cancel)
        .await
        .unwrap();

    assert_eq!(attempts, 1);
    assert!(sleeps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_success_after_failures_sleeps_between_polls() {
    let runner = FakeRunner::new();
    runner.healthy_after(4000, 2);

    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let monitor = HealthMonitor::new(policy(10), recording_sleep_fn(sleeps.clone()));
    let (_tx, mut cancel) = cancellation();

    let attempts = monitor
        .wait_until_active(runner.as_ref(), "webapp", 4000, &mut cancel)
        .await
        .unwrap();

    assert_eq!(attempts, 3);
    let recorded = sleeps.lock().unwrap().clone();
    assert_eq!(recorded, vec![Duration::from_secs(2); 2]);
}

#[tokio::test]
async fn test_exhaustion_after_max_retries() {
    // No schedule for the port: it never becomes active.
    let runner = FakeRunner::new();

    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let monitor = HealthMonitor::new(policy(4), recording_sleep_fn(sleeps.clone()));
    let (_tx, mut cancel) = cancellation();

    let err = monitor
        .wait_until_active(runner.as_ref(), "webapp", 4001, &mut cancel)
        .await
        .unwrap_err();

    match err {
        PortsideError::HealthCheckExhausted { port, attempts } => {
            assert_eq!(port, 4001);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error: {}", other),
    }
    // No sleep after the final poll.
    assert_eq!(sleeps.lock().unwrap().len(), 3);
    let polls = runner
        .recorded()
        .iter()
        .filter(|c| c.contains("is-active"))
        .count();
    assert_eq!(polls, 4);
}

#[tokio::test]
async fn test_cancellation_aborts_before_polling() {
    let runner = FakeRunner::new();
    runner.healthy_after(4000, 0);

    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let monitor = HealthMonitor::new(policy(10), recording_sleep_fn(sleeps));
    let (tx, mut cancel) = cancellation();
    tx.send(true).unwrap();

    let err = monitor
        .wait_until_active(runner.as_ref(), "webapp", 4000, &mut cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PortsideError::Cancelled(_)));
    assert!(runner.recorded().is_empty());
}
