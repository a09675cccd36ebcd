use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn counting_task(counter: Arc<AtomicU32>, restart: bool) -> Task {
    Box::new(move || {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            restart
        })
    })
}

#[tokio::test]
async fn start_fires_task_once_when_not_restarting() {
    let counter = Arc::new(AtomicU32::new(0));
    let timer = Timer::new(Duration::from_millis(10), counting_task(counter.clone(), false));

    assert!(!timer.is_running().await);
    timer.start().await;
    assert!(timer.is_running().await);

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(!timer.is_running().await);
}

#[tokio::test]
async fn task_returning_true_reschedules_repeatedly() {
    let counter = Arc::new(AtomicU32::new(0));
    let timer = Timer::new(Duration::from_millis(5), counting_task(counter.clone(), true));

    timer.start().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    timer.stop().await;

    assert!(counter.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn stop_before_first_fire_prevents_task_from_running() {
    let counter = Arc::new(AtomicU32::new(0));
    let timer = Timer::new(Duration::from_millis(30), counting_task(counter.clone(), false));

    timer.start().await;
    timer.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(!timer.is_running().await);
}

#[tokio::test]
async fn set_interval_fails_while_running() {
    let counter = Arc::new(AtomicU32::new(0));
    let timer = Timer::new(Duration::from_millis(30), counting_task(counter, false));
    timer.start().await;
    assert!(!timer.set_interval(Duration::from_millis(5)).await);
    timer.stop().await;
}

#[tokio::test]
async fn restart_while_started_cancels_and_rearms() {
    let counter = Arc::new(AtomicU32::new(0));
    let timer = Timer::new(Duration::from_millis(40), counting_task(counter.clone(), false));

    timer.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    // restart the delay before it fires: the first arm's fire() should be a no-op
    timer.start().await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// `stop()` called while the task is actually running (`IN_TASK`) must move
/// to `IN_TASK_STOPPED` rather than stop the task outright, and must ignore
/// the task's return value once it completes (spec §4.4: "task return is
/// ignored"; spec §8.1's idempotence-of-stop invariant).
#[tokio::test]
async fn stop_during_task_execution_ignores_requested_restart() {
    let counter = Arc::new(AtomicU32::new(0));
    let entered_task = Arc::new(tokio::sync::Notify::new());
    let entered_task_task = entered_task.clone();
    let counter_task = counter.clone();
    let task: Task = Box::new(move || {
        let counter = counter_task.clone();
        let entered_task = entered_task_task.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            entered_task.notify_one();
            tokio::time::sleep(Duration::from_millis(40)).await;
            true // requests a restart; must be ignored once stop() wins
        })
    });
    let timer = Timer::new(Duration::from_millis(5), task);

    timer.start().await;
    entered_task.notified().await;
    assert!(timer.is_running().await);

    timer.stop().await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(!timer.is_running().await);
}
