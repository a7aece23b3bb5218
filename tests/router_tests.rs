//! Tests for the router facade: start/stop lifecycle, registries,
//! base-path handling, history-change re-entry, and the navigation
//! entry points.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use waypoint::{is_same_origin, HandlerOutcome, HistoryBackend, RouterError, StartOptions};

mod common;
use common::{test_router, wait_until, TestTracing};

fn quiet_start() -> StartOptions {
    StartOptions {
        dispatch: false,
        ..StartOptions::default()
    }
}

#[test]
fn test_show_before_start_fails() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    assert_eq!(router.show("/a", None).unwrap_err(), RouterError::NotStarted);
    assert_eq!(
        router.replace("/a", None).unwrap_err(),
        RouterError::NotStarted
    );
}

#[test]
fn test_start_performs_initial_dispatch() {
    let _tracing = TestTracing::init();
    let (router, history) = test_router("/home");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    router
        .route("/home", move |req| {
            if req.env.is_first {
                sink.lock().unwrap().push("first".to_string());
            }
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();

    let initial = router.start(StartOptions::default()).expect("initial request");
    assert!(router.wait(initial).unwrap().is_ok());
    assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    assert_eq!(router.current_request().unwrap().path, "/home");
    // The initial dispatch replaces; it never pushes.
    assert_eq!(history.push_count(), 0);
}

#[test]
fn test_start_while_running_is_ignored() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    assert!(router.start(quiet_start()).is_some());
    assert!(router.start(quiet_start()).is_none());
}

#[test]
fn test_stop_clears_pointers_but_keeps_registries() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    let hits = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&hits);
    router
        .route("/a", move |_| {
            *sink.lock().unwrap() += 1;
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();

    router.start(quiet_start());
    let first = router.show("/a", None).unwrap();
    assert!(router.wait(first).unwrap().is_ok());

    router.stop();
    assert!(!router.is_running());
    assert!(router.current_request().is_none());
    assert!(router.previous_request().is_none());
    assert_eq!(router.len(), 0);
    assert_eq!(router.show("/a", None).unwrap_err(), RouterError::NotStarted);

    // Routes registered before the stop survive it.
    router.start(quiet_start());
    let second = router.show("/a", None).unwrap();
    assert!(router.wait(second).unwrap().is_ok());
    assert_eq!(*hits.lock().unwrap(), 2);
}

#[test]
fn test_base_prefix_is_stripped_from_paths() {
    let _tracing = TestTracing::init();
    let (router, history) = test_router("/app/home");
    router.set_base("/app");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    router
        .route("/x", move |req| {
            sink.lock().unwrap().push(req.path.clone());
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();
    router.start(quiet_start());

    assert_eq!(router.current_url_without_base().unwrap(), "/home");
    assert_eq!(router.current_url().unwrap(), "/app/home");

    let id = router.show("/x", None).unwrap();
    assert!(router.wait(id).unwrap().is_ok());

    let request = router.request(id).unwrap();
    assert_eq!(request.canonical_path, "/app/x");
    assert_eq!(request.path, "/x");
    assert_eq!(*seen.lock().unwrap(), vec!["/x"]);
    // The committed URL carries the base.
    assert!(wait_until(Duration::from_secs(1), || {
        history.push_count() == 1
    }));
}

#[test]
fn test_back_walks_history_and_redispatches() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    router
        .route("*", move |req| {
            if req.env.is_history {
                sink.lock().unwrap().push(format!("history:{}", req.path));
            }
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();
    router
        .not_found_any(|_| Ok(HandlerOutcome::Complete))
        .unwrap();
    router.start(quiet_start());

    let a = router.show("/a", None).unwrap();
    assert!(router.wait(a).unwrap().is_ok());
    let b = router.show("/b", None).unwrap();
    assert!(router.wait(b).unwrap().is_ok());
    assert_eq!(router.len(), 2);

    assert_eq!(router.back(None, None).unwrap(), None);
    assert_eq!(router.len(), 1);
    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().unwrap().iter().any(|e| e == "history:/a")
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        router
            .current_request()
            .map(|r| r.path == "/a")
            .unwrap_or(false)
    }));
}

#[test]
fn test_back_without_entries_uses_fallback() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    router
        .route("/fallback", move |_| {
            sink.lock().unwrap().push("fallback".to_string());
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();
    router.start(quiet_start());

    let id = router
        .back(Some("/fallback"), None)
        .unwrap()
        .expect("fallback navigation");
    assert!(router.wait(id).unwrap().is_ok());
    assert_eq!(*seen.lock().unwrap(), vec!["fallback"]);
}

#[test]
fn test_decode_query_populates_mapping() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    router
        .route("/search", move |req| {
            let query = req.query.clone().unwrap_or_default();
            sink.lock().unwrap().push(Value::Object(query));
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();
    router.start(StartOptions {
        dispatch: false,
        decode_query: true,
        ..StartOptions::default()
    });

    let id = router.show("/search?q=rust&tags[]=a&tags[]=b", None).unwrap();
    assert!(router.wait(id).unwrap().is_ok());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!({"q": "rust", "tags": ["a", "b"]})]
    );
}

#[test]
fn test_state_carries_path_for_restoration() {
    let _tracing = TestTracing::init();
    let (router, history) = test_router("/");
    router.route("/a", |_| Ok(HandlerOutcome::Complete)).unwrap();
    router.start(quiet_start());

    let id = router.show("/a", Some(json!({"scroll": 120}))).unwrap();
    assert!(router.wait(id).unwrap().is_ok());

    let state = history.current_state();
    assert_eq!(state.get("scroll"), Some(&json!(120)));
    assert_eq!(state.get("path"), Some(&json!("/a")));
}

#[test]
fn test_restore_request_redispatches_with_restore_flag() {
    let _tracing = TestTracing::init();
    let (router, _history) = test_router("/");
    let restores = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&restores);
    router
        .route("/a", move |req| {
            sink.lock()
                .unwrap()
                .push((req.env.is_restore, req.env.is_click));
            Ok(HandlerOutcome::Complete)
        })
        .unwrap();
    router.start(quiet_start());

    let id = router
        .show_with("/a", None, true, true, waypoint::NavEnv::click())
        .unwrap();
    assert!(router.wait(id).unwrap().is_ok());

    router.restore_request(id, true, true).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        restores.lock().unwrap().len() == 2
    }));
    // First run: a click. Second run: restore flag on, click cleared.
    assert_eq!(*restores.lock().unwrap(), vec![(false, true), (true, false)]);
    // The transient restore flag clears once the re-commit lands.
    assert!(wait_until(Duration::from_secs(2), || {
        router
            .request(id)
            .map(|r| !r.env.is_restore)
            .unwrap_or(false)
    }));
}

#[test]
fn test_replace_saves_state_before_dispatch() {
    let _tracing = TestTracing::init();
    let (router, history) = test_router("/");
    router.route("/b", |_| Ok(HandlerOutcome::Complete)).unwrap();
    router.start(quiet_start());

    let replaces_before = history.replace_count();
    let id = router.replace("/b", None).unwrap();
    assert!(router.wait(id).unwrap().is_ok());
    assert!(history.replace_count() > replaces_before);
    assert_eq!(history.push_count(), 0);
    assert_eq!(history.location(), "/b");
}

#[test]
fn test_same_origin_check() {
    assert!(is_same_origin(
        "https://example.com/docs",
        "https://example.com"
    ));
    assert!(!is_same_origin(
        "https://other.example/docs",
        "https://example.com"
    ));
    assert!(!is_same_origin("https://example.com/docs", ""));
}
