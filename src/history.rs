//! # History Module
//!
//! The platform seam. The router talks to session history through the
//! [`HistoryBackend`] trait: reading the displayed location, pushing and
//! replacing entries, walking back, and receiving history-change
//! notifications (the `popstate` equivalent). A browser embedding
//! implements this over the History API; [`MemoryHistory`] implements it
//! in memory so the full lifecycle runs in tests and headless
//! embeddings.
//!
//! Click interception stays outside the router. An adapter that binds
//! to the platform's click events must, for a left click with no
//! modifier keys on a same-origin anchor lacking `download` or
//! `rel="external"`, suppress the platform navigation and call
//! `Router::show` with the anchor's path and a click env
//! ([`crate::NavEnv::click`]). [`is_same_origin`] is the helper for that
//! check.

use may::sync::mpsc;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A history-change notification delivered to subscribers.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    /// The platform moved to another session entry (back/forward).
    Pop {
        /// State stored with the entry, if any
        state: Option<Value>,
        /// The entry's URL
        url: String,
    },
}

/// Contract the router needs from the platform's session history.
pub trait HistoryBackend: Send + Sync {
    /// Currently displayed URL (pathname + search + hash).
    fn location(&self) -> String;

    /// Current document title, captured onto new requests.
    fn title(&self) -> String {
        String::new()
    }

    /// Append a session entry.
    fn push(&self, state: &Value, title: &str, url: &str);

    /// Replace the current session entry.
    fn replace(&self, state: &Value, title: &str, url: &str);

    /// Walk one entry back; implementations emit a
    /// [`HistoryEvent::Pop`] when the move lands.
    fn back(&self);

    /// Hard navigation: leave the routed application for `url`.
    fn navigate(&self, url: &str);

    /// Subscribe to history-change notifications.
    fn subscribe(&self) -> mpsc::Receiver<HistoryEvent>;
}

/// Check whether `href` shares `origin` (scheme + host + port). Click
/// adapters consult this before interception; cross-origin anchors keep
/// their platform behavior.
#[must_use]
pub fn is_same_origin(href: &str, origin: &str) -> bool {
    !origin.is_empty() && href.starts_with(origin)
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    state: Value,
    title: String,
    url: String,
}

/// In-memory session history.
///
/// Keeps the entry stack, delivers [`HistoryEvent::Pop`] notifications
/// on [`back`](HistoryBackend::back), and records hard navigations so
/// tests can observe the not-found fallback.
pub struct MemoryHistory {
    inner: Mutex<MemoryHistoryInner>,
    listeners: Mutex<Vec<mpsc::Sender<HistoryEvent>>>,
    pushes: AtomicUsize,
    replaces: AtomicUsize,
    title: Mutex<String>,
}

struct MemoryHistoryInner {
    entries: Vec<HistoryEntry>,
    index: usize,
    hard_navigations: Vec<String>,
}

impl MemoryHistory {
    /// Create a history whose single entry displays `initial_url`.
    pub fn new(initial_url: &str) -> Self {
        MemoryHistory {
            inner: Mutex::new(MemoryHistoryInner {
                entries: vec![HistoryEntry {
                    state: Value::Null,
                    title: String::new(),
                    url: initial_url.to_string(),
                }],
                index: 0,
                hard_navigations: Vec::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            pushes: AtomicUsize::new(0),
            replaces: AtomicUsize::new(0),
            title: Mutex::new(String::new()),
        }
    }

    /// Set the title reported to the router.
    pub fn set_title(&self, title: &str) {
        if let Ok(mut guard) = self.title.lock() {
            *guard = title.to_string();
        }
    }

    /// Number of entries currently on the stack.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    /// How many times an entry was pushed.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// How many times the current entry was replaced.
    #[must_use]
    pub fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    /// Hard navigations requested so far, oldest first.
    #[must_use]
    pub fn hard_navigations(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.hard_navigations.clone())
            .unwrap_or_default()
    }

    /// State stored with the displayed entry.
    #[must_use]
    pub fn current_state(&self) -> Value {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.entries.get(i.index).map(|e| e.state.clone()))
            .unwrap_or(Value::Null)
    }

    fn emit(&self, event: HistoryEvent) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl HistoryBackend for MemoryHistory {
    fn location(&self) -> String {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.entries.get(i.index).map(|e| e.url.clone()))
            .unwrap_or_default()
    }

    fn title(&self) -> String {
        self.title.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn push(&self, state: &Value, title: &str, url: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let index = inner.index;
        inner.entries.truncate(index + 1);
        inner.entries.push(HistoryEntry {
            state: state.clone(),
            title: title.to_string(),
            url: url.to_string(),
        });
        inner.index = inner.entries.len() - 1;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        debug!(url = %url, entries = inner.entries.len(), "history entry pushed");
    }

    fn replace(&self, state: &Value, title: &str, url: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let index = inner.index;
        inner.entries[index] = HistoryEntry {
            state: state.clone(),
            title: title.to_string(),
            url: url.to_string(),
        };
        self.replaces.fetch_add(1, Ordering::SeqCst);
        debug!(url = %url, "history entry replaced");
    }

    fn back(&self) {
        let event = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.index == 0 {
                warn!("history back with no earlier entry");
                return;
            }
            inner.index -= 1;
            let entry = &inner.entries[inner.index];
            HistoryEvent::Pop {
                state: (!entry.state.is_null()).then(|| entry.state.clone()),
                url: entry.url.clone(),
            }
        };
        self.emit(event);
    }

    fn navigate(&self, url: &str) {
        warn!(url = %url, "hard navigation requested");
        if let Ok(mut inner) = self.inner.lock() {
            inner.hard_navigations.push(url.to_string());
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<HistoryEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        rx
    }
}
