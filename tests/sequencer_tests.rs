//! Tests for the settle-once task and the ordered queue combinator:
//! replay after settlement, callback ordering, strict sequencing, and
//! short-circuit on first failure.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use waypoint::sequencer::{queue, QueueStep, Task};
use waypoint::RouterError;

mod common;
use common::TestTracing;

fn log_push(log: &Arc<Mutex<Vec<String>>>, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

#[test]
fn test_task_settles_once() {
    let task = Task::new();
    task.resolve(json!(1));
    task.reject(RouterError::dispatch("late"));
    assert_eq!(task.result(), Some(Ok(json!(1))));
}

#[test]
fn test_task_wait_replays_settled_result() {
    let task = Task::resolved(json!("done"));
    assert_eq!(task.wait(), Ok(json!("done")));
    assert_eq!(task.wait(), Ok(json!("done")));
}

#[test]
fn test_callback_after_settlement_runs_immediately() {
    let task = Task::rejected(RouterError::dispatch("nope"));
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    task.on_settle(move |result| {
        *sink.lock().unwrap() = Some(result.clone());
    });
    assert_eq!(
        *seen.lock().unwrap(),
        Some(Err(RouterError::dispatch("nope")))
    );
}

#[test]
fn test_callbacks_run_in_registration_order() {
    let _tracing = TestTracing::init();
    let task = Task::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let log = Arc::clone(&log);
        task.on_settle(move |_| log_push(&log, name));
    }
    task.resolve(Value::Null);
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_wait_suspends_until_settled() {
    let _tracing = TestTracing::init();
    let task = Task::new();
    let settler = task.clone();
    may::go!(move || {
        may::coroutine::sleep(Duration::from_millis(30));
        settler.resolve(json!("late"));
    });
    assert_eq!(task.wait(), Ok(json!("late")));
}

#[test]
fn test_queue_empty_resolves_immediately() {
    let task = queue(Vec::new());
    assert_eq!(task.wait(), Ok(json!([])));
}

#[test]
fn test_queue_collects_results_in_order() {
    let _tracing = TestTracing::init();
    let steps: Vec<QueueStep> = vec![
        Box::new(|| Task::resolved(json!(1))),
        Box::new(|| Task::resolved(json!(2))),
        Box::new(|| Task::resolved(json!(3))),
    ];
    assert_eq!(queue(steps).wait(), Ok(json!([1, 2, 3])));
}

#[test]
fn test_queue_waits_for_slow_step_before_next() {
    let _tracing = TestTracing::init();
    let log = Arc::new(Mutex::new(Vec::new()));

    let slow_log = Arc::clone(&log);
    let slow: QueueStep = Box::new(move || {
        let task = Task::new();
        let settler = task.clone();
        may::go!(move || {
            may::coroutine::sleep(Duration::from_millis(50));
            log_push(&slow_log, "slow");
            settler.resolve(Value::Null);
        });
        task
    });

    let fast_log = Arc::clone(&log);
    let fast: QueueStep = Box::new(move || {
        log_push(&fast_log, "fast");
        Task::resolved(Value::Null)
    });

    assert!(queue(vec![slow, fast]).wait().is_ok());
    assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
}

#[test]
fn test_queue_short_circuits_on_first_rejection() {
    let _tracing = TestTracing::init();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first_log = Arc::clone(&log);
    let failing: QueueStep = Box::new(move || {
        log_push(&first_log, "failing");
        Task::rejected(RouterError::dispatch("boom"))
    });

    let second_log = Arc::clone(&log);
    let never: QueueStep = Box::new(move || {
        log_push(&second_log, "never");
        Task::resolved(Value::Null)
    });

    let result = queue(vec![failing, never]).wait();
    assert_eq!(result, Err(RouterError::dispatch("boom")));
    assert_eq!(*log.lock().unwrap(), vec!["failing"]);
}
