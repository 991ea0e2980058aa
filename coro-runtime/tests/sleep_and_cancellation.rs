//! Black-box coverage of timer/cancellation end-to-end scenarios, exercised through
//! the public API only.

use std::time::{Duration, Instant};

use coro_runtime::cancellation::{CancellationSource, CancellationToken};
use coro_runtime::coro::{sleep_for, sleep_until, spawn, sync_wait};
use coro_runtime::error::CoroError;
use coro_runtime::scheduler::Scheduler;

#[test]
fn sleep_for_one_second_completes_close_to_its_deadline() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();

    let start = Instant::now();
    let scheduler_clone = scheduler.clone();
    let task = spawn(&scheduler, CancellationToken::none(), async move {
        sleep_for(&scheduler_clone, Duration::from_secs(1)).await
    });
    let result = sync_wait(task).unwrap();

    scheduler.stop();
    scheduler.join();

    assert!(result.is_ok());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1200), "slept too long: {elapsed:?}");
}

#[test]
fn cancelling_a_long_sleep_wakes_it_in_under_a_hundred_millis() {
    let scheduler = Scheduler::new();
    scheduler.start().unwrap();

    let source = CancellationSource::new();
    let token = source.token();
    let scheduler_clone = scheduler.clone();
    let task = spawn(&scheduler, CancellationToken::none(), async move {
        sleep_until(&scheduler_clone, Instant::now() + Duration::from_secs(3600))
            .with_token(token)
            .await
    });

    std::thread::sleep(Duration::from_millis(10));
    let before_cancel = Instant::now();
    source.request_cancellation();

    let result = sync_wait(task).unwrap();
    let woke_after = before_cancel.elapsed();

    scheduler.stop();
    scheduler.join();

    assert!(matches!(result, Err(CoroError::Canceled)));
    assert!(woke_after < Duration::from_millis(100), "took too long to wake: {woke_after:?}");
}
