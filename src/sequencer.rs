//! # Sequencer Module
//!
//! A settle-once task handle and the ordered queue combinator built on
//! top of it. This is the backbone of the exit/enter/error/not-found
//! dispatch phases: each phase is one [`queue`] call over a registry of
//! middleware.
//!
//! ## Semantics
//!
//! A [`Task`] settles exactly once (`pending -> resolved | rejected`);
//! later settle attempts are ignored. Observers registered before
//! settlement are queued in registration order; observers registered
//! after settlement replay immediately with the stored result.
//!
//! [`queue`] runs its steps strictly in order - step `i` is invoked
//! only after step `i - 1`'s task settles. The first rejection aborts
//! the remaining steps and rejects the queue's own task with that
//! failure; when every step resolves, the queue resolves with the
//! ordered sequence of step results.

use may::coroutine;
use may::sync::mpsc;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use crate::error::RouterError;
use crate::runtime_config::RuntimeConfig;

/// Result a task settles with: a value on success, a router error on
/// failure.
pub type TaskResult = Result<Value, RouterError>;

type SettleCallback = Box<dyn FnOnce(&TaskResult) + Send>;

/// A deferred step of a [`queue`]: invoked when its turn comes, returns
/// the task to wait on before the next step runs.
pub type QueueStep = Box<dyn FnOnce() -> Task + Send>;

enum TaskState {
    Pending {
        waiters: Vec<mpsc::Sender<()>>,
        callbacks: Vec<SettleCallback>,
    },
    Settled(TaskResult),
}

/// Single-assignment asynchronous result with ordered callback replay.
///
/// Cloning shares the underlying state; any clone may settle or
/// observe. Waiting from a coroutine suspends it; waiting from a plain
/// thread blocks it.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Mutex<TaskState>>,
}

impl Task {
    /// Create a pending task.
    pub fn new() -> Self {
        Task {
            inner: Arc::new(Mutex::new(TaskState::Pending {
                waiters: Vec::new(),
                callbacks: Vec::new(),
            })),
        }
    }

    /// Create a task already resolved with `value`.
    pub fn resolved(value: Value) -> Self {
        let task = Task::new();
        task.resolve(value);
        task
    }

    /// Create a task already rejected with `error`.
    pub fn rejected(error: RouterError) -> Self {
        let task = Task::new();
        task.reject(error);
        task
    }

    /// Resolve the task. A no-op if the task already settled.
    pub fn resolve(&self, value: Value) {
        self.settle(Ok(value));
    }

    /// Reject the task. A no-op if the task already settled.
    pub fn reject(&self, error: RouterError) {
        self.settle(Err(error));
    }

    fn settle(&self, result: TaskResult) {
        let (waiters, callbacks) = {
            let mut state = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match &mut *state {
                TaskState::Settled(_) => return,
                TaskState::Pending { waiters, callbacks } => {
                    let drained = (std::mem::take(waiters), std::mem::take(callbacks));
                    *state = TaskState::Settled(result.clone());
                    drained
                }
            }
        };
        // Callbacks run outside the lock, in registration order.
        for callback in callbacks {
            callback(&result);
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Whether the task has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match self.inner.lock() {
            Ok(state) => matches!(*state, TaskState::Settled(_)),
            Err(poisoned) => matches!(*poisoned.into_inner(), TaskState::Settled(_)),
        }
    }

    /// Snapshot of the settled result, if any.
    #[must_use]
    pub fn result(&self) -> Option<TaskResult> {
        let state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &*state {
            TaskState::Settled(result) => Some(result.clone()),
            TaskState::Pending { .. } => None,
        }
    }

    /// Block the calling coroutine (or thread) until the task settles
    /// and return the stored result. Returns immediately when already
    /// settled.
    pub fn wait(&self) -> TaskResult {
        let receiver = {
            let mut state = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match &mut *state {
                TaskState::Settled(result) => return result.clone(),
                TaskState::Pending { waiters, .. } => {
                    let (tx, rx) = mpsc::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        let _ = receiver.recv();
        match self.result() {
            Some(result) => result,
            // Settle signalled without a stored result cannot happen;
            // fail closed instead of blocking forever.
            None => Err(RouterError::dispatch("task settled without a result")),
        }
    }

    /// Register an observer for both channels. Runs immediately with
    /// the stored result when the task already settled; otherwise runs
    /// at settlement, after earlier-registered observers.
    pub fn on_settle(&self, callback: impl FnOnce(&TaskResult) + Send + 'static) {
        let mut callback: Option<SettleCallback> = Some(Box::new(callback));
        let replay = {
            let mut state = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match &mut *state {
                TaskState::Settled(result) => Some(result.clone()),
                TaskState::Pending { callbacks, .. } => {
                    if let Some(cb) = callback.take() {
                        callbacks.push(cb);
                    }
                    None
                }
            }
        };
        if let (Some(result), Some(cb)) = (replay, callback) {
            cb(&result);
        }
    }

    /// Register an observer for the success channel only.
    pub fn on_resolve(&self, callback: impl FnOnce(&Value) + Send + 'static) {
        self.on_settle(move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        });
    }

    /// Register an observer for the failure channel only.
    pub fn on_reject(&self, callback: impl FnOnce(&RouterError) + Send + 'static) {
        self.on_settle(move |result| {
            if let Err(error) = result {
                callback(error);
            }
        });
    }
}

impl Default for Task {
    fn default() -> Self {
        Task::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result() {
            Some(Ok(_)) => f.write_str("Task(resolved)"),
            Some(Err(_)) => f.write_str("Task(rejected)"),
            None => f.write_str("Task(pending)"),
        }
    }
}

/// Run `steps` strictly in order on a fresh coroutine.
///
/// Step `i` is invoked only after step `i - 1`'s returned task
/// resolves. The first rejection aborts the remaining steps and rejects
/// the returned task with that failure; otherwise the returned task
/// resolves with the ordered array of every step's resolution value. An
/// empty step list resolves immediately.
pub fn queue(steps: Vec<QueueStep>) -> Task {
    let task = Task::new();
    if steps.is_empty() {
        task.resolve(Value::Array(Vec::new()));
        return task;
    }

    let result = task.clone();
    let total = steps.len();
    let stack_size = RuntimeConfig::from_env().stack_size;

    // SAFETY: coroutine::Builder::spawn is unsafe per the may runtime;
    // the closure is Send + 'static and settles `result` exactly once.
    let spawned = unsafe {
        coroutine::Builder::new()
            .stack_size(stack_size)
            .spawn(move || {
                let mut values = Vec::with_capacity(total);
                for (i, step) in steps.into_iter().enumerate() {
                    let step_task = step();
                    match step_task.wait() {
                        Ok(value) => values.push(value),
                        Err(e) => {
                            debug!(step = i, total = total, error = %e, "queue short-circuited");
                            result.reject(e);
                            return;
                        }
                    }
                }
                result.resolve(Value::Array(values));
            })
    };

    if let Err(e) = spawned {
        error!(error = %e, stack_size = stack_size, "Failed to spawn queue coroutine");
        task.reject(RouterError::dispatch(format!(
            "failed to spawn queue coroutine: {}",
            e
        )));
    }

    task
}
