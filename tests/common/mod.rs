//! Shared test utilities: coroutine stack sizing, tracing capture, and
//! router construction over an in-memory history.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use waypoint::{MemoryHistory, Router};

pub struct TestTracing {
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestTracing {
    pub fn init() -> Self {
        let size = std::env::var("WAYP_STACK_SIZE")
            .ok()
            .and_then(|v| {
                if let Some(hex) = v.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).ok()
                } else {
                    v.parse().ok()
                }
            })
            .unwrap_or(0x8000);
        may::config().set_stack_size(size);
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        TestTracing {
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }
}

/// A router over a fresh in-memory history displaying `initial`.
pub fn test_router(initial: &str) -> (Router, Arc<MemoryHistory>) {
    let history = Arc::new(MemoryHistory::new(initial));
    let router = Router::new(Arc::clone(&history) as Arc<dyn waypoint::HistoryBackend>);
    (router, history)
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}
