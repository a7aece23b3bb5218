use dashmap::DashMap;
use may::coroutine;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::RouterError;
use crate::history::{HistoryBackend, HistoryEvent};
use crate::ids::RequestId;
use crate::request::{NavEnv, NavRequest, RequestOptions, SharedRequest};
use crate::route::{
    EnterMiddleware, ErrorHandler, ErrorMiddleware, ExitHandler, ExitMiddleware, HandlerKind,
    HandlerResult, Route, RouteHandler,
};
use crate::runtime_config::RuntimeConfig;
use crate::sequencer::{Task, TaskResult};

/// Lock a mutex, recovering the guard if a handler panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Options for [`Router::start`].
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Whether click adapters should intercept link clicks
    pub click: bool,
    /// Listen for history-change notifications
    pub popstate: bool,
    /// Perform the initial dispatch for the current location
    pub dispatch: bool,
    /// Percent-decode URL components during normalization
    pub decode_components: bool,
    /// Parse each request's query string into a mapping
    pub decode_query: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        StartOptions {
            click: true,
            popstate: true,
            dispatch: true,
            decode_components: true,
            decode_query: false,
        }
    }
}

/// Current/previous request pointers, swapped together under one lock.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Pointers {
    pub(crate) current: Option<RequestId>,
    pub(crate) previous: Option<RequestId>,
}

/// Shared state behind a [`Router`] and its dispatch coroutines. All
/// registries are append-only and survive `stop()`; only the request
/// pointers and the run state reset.
pub(crate) struct RouterContext {
    pub(crate) backend: Arc<dyn HistoryBackend>,
    pub(crate) runtime: RuntimeConfig,
    pub(crate) running: AtomicBool,
    listener_spawned: AtomicBool,
    pub(crate) click_enabled: AtomicBool,
    pub(crate) decode_components: AtomicBool,
    pub(crate) decode_query: AtomicBool,
    pub(crate) base: Mutex<String>,
    /// History entries this router pushed; `back()` consults it
    pub(crate) len: AtomicUsize,
    pub(crate) pointers: Mutex<Pointers>,
    /// Live requests, addressed by id; parent/sub links resolve here
    pub(crate) requests: DashMap<RequestId, SharedRequest>,
    /// Enter handlers, in registration order
    pub(crate) callbacks: Mutex<Vec<EnterMiddleware>>,
    /// Exit handlers, matched against the request being left
    pub(crate) exits: Mutex<Vec<ExitMiddleware>>,
    pub(crate) error_handlers: Mutex<Vec<ErrorMiddleware>>,
    pub(crate) not_found_handlers: Mutex<Vec<EnterMiddleware>>,
    /// The most recently submitted dispatch; later dispatches queue
    /// behind it in submission order
    pub(crate) last_dispatch: Mutex<Option<Task>>,
}

impl RouterContext {
    pub(crate) fn request(&self, id: RequestId) -> Option<SharedRequest> {
        self.requests.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn snapshot_request(&self, id: RequestId) -> Option<NavRequest> {
        self.request(id).map(|arc| lock(&arc).clone())
    }

    pub(crate) fn request_task(&self, id: RequestId) -> Option<Task> {
        self.request(id).map(|arc| lock(&arc).task())
    }

    pub(crate) fn base(&self) -> String {
        lock(&self.base).clone()
    }

    /// Build a request (and, recursively, any hash sub-requests) and
    /// register the chain in the request table.
    pub(crate) fn create_request(
        &self,
        path: &str,
        state: Option<Value>,
        env: NavEnv,
    ) -> RequestId {
        let opts = RequestOptions {
            base: self.base(),
            title: self.backend.title(),
            decode_components: self.decode_components.load(Ordering::SeqCst),
            decode_query: self.decode_query.load(Ordering::SeqCst),
        };
        let request = NavRequest::new(path, state, env, &opts);
        let id = request.id;
        let sub_path = request.sub_request_path().map(str::to_string);
        self.requests.insert(id, Arc::new(Mutex::new(request)));

        if let Some(sub_path) = sub_path {
            let child_id = self.create_request(&sub_path, None, env);
            if let Some(child) = self.request(child_id) {
                lock(&child).parent = Some(id);
            }
            if let Some(parent) = self.request(id) {
                lock(&parent).sub_request = Some(child_id);
            }
            debug!(parent = %id, child = %child_id, path = %sub_path, "sub-request attached");
        }
        id
    }

    /// Stop accepting navigations and clear the request pointers. The
    /// registries stay registered.
    pub(crate) fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut ptrs = lock(&self.pointers);
        ptrs.current = None;
        ptrs.previous = None;
        drop(ptrs);
        self.len.store(0, Ordering::SeqCst);
        info!("router stopped");
    }

    /// Settled requests stay addressable for a while after their
    /// dispatch, bounded by this window; the oldest unreferenced ones
    /// are evicted once the table outgrows it.
    const MAX_RETAINED_REQUESTS: usize = 64;

    /// Evict the oldest table entries that are neither reachable from
    /// the pointers nor still in flight, once the table outgrows the
    /// retention window.
    pub(crate) fn prune_requests(&self) {
        if self.requests.len() <= Self::MAX_RETAINED_REQUESTS {
            return;
        }
        let mut live = std::collections::HashSet::new();
        let mut stack: Vec<RequestId> = {
            let ptrs = lock(&self.pointers);
            [ptrs.current, ptrs.previous].into_iter().flatten().collect()
        };
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(arc) = self.request(id) {
                let req = lock(&arc);
                stack.extend(req.parent);
                stack.extend(req.sub_request);
            }
        }
        let mut evictable: Vec<RequestId> = self
            .requests
            .iter()
            .filter_map(|entry| {
                let id = *entry.key();
                if live.contains(&id) {
                    return None;
                }
                // try_lock: never block the table on a busy request
                let settled = entry
                    .value()
                    .try_lock()
                    .map(|req| req.task.is_settled())
                    .unwrap_or(false);
                settled.then_some(id)
            })
            .collect();
        evictable.sort_unstable();
        let excess = self
            .requests
            .len()
            .saturating_sub(Self::MAX_RETAINED_REQUESTS);
        for id in evictable.into_iter().take(excess) {
            self.requests.remove(&id);
            debug!(request_id = %id, "settled request evicted from the table");
        }
    }
}

/// The router facade: registries, run state, and the public navigation
/// operations. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Router {
    ctx: Arc<RouterContext>,
}

impl Router {
    /// Create a router over `backend`. Nothing dispatches until
    /// [`start`](Router::start).
    pub fn new(backend: Arc<dyn HistoryBackend>) -> Self {
        Router {
            ctx: Arc::new(RouterContext {
                backend,
                runtime: RuntimeConfig::from_env(),
                running: AtomicBool::new(false),
                listener_spawned: AtomicBool::new(false),
                click_enabled: AtomicBool::new(true),
                decode_components: AtomicBool::new(true),
                decode_query: AtomicBool::new(false),
                base: Mutex::new(String::new()),
                len: AtomicUsize::new(0),
                pointers: Mutex::new(Pointers::default()),
                requests: DashMap::new(),
                callbacks: Mutex::new(Vec::new()),
                exits: Mutex::new(Vec::new()),
                error_handlers: Mutex::new(Vec::new()),
                not_found_handlers: Mutex::new(Vec::new()),
                last_dispatch: Mutex::new(None),
            }),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.ctx))
    }

    /// The configured base path prefix.
    #[must_use]
    pub fn base(&self) -> String {
        self.ctx.base()
    }

    /// Set the path prefix stripped from all internal paths.
    pub fn set_base(&self, path: &str) {
        *lock(&self.ctx.base) = path.to_string();
    }

    /// Whether the router is between `start()` and `stop()`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Whether click adapters should intercept link clicks.
    #[must_use]
    pub fn click_enabled(&self) -> bool {
        self.ctx.click_enabled.load(Ordering::SeqCst)
    }

    /// Number of history entries this router has pushed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ctx.len.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Begin listening and perform the initial dispatch for the current
    /// location. Returns the initial request id, or `None` when the
    /// router was already running.
    pub fn start(&self, options: StartOptions) -> Option<RequestId> {
        if self.ctx.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.ctx
            .decode_components
            .store(options.decode_components, Ordering::SeqCst);
        self.ctx
            .decode_query
            .store(options.decode_query, Ordering::SeqCst);
        self.ctx.click_enabled.store(options.click, Ordering::SeqCst);

        if options.popstate && !self.ctx.listener_spawned.swap(true, Ordering::SeqCst) {
            self.spawn_history_listener();
        }

        let location = self.ctx.backend.location();
        info!(location = %location, "router started");
        self.replace_with(&location, None, options.dispatch, NavEnv::first())
            .ok()
    }

    /// Stop routing: clears the current/previous request pointers and
    /// the pushed-entry counter. Registries are kept; a later `start()`
    /// resumes with the same routes.
    pub fn stop(&self) {
        if !self.ctx.running.load(Ordering::SeqCst) {
            return;
        }
        self.ctx.halt();
    }

    fn spawn_history_listener(&self) {
        let router = self.clone();
        let receiver = self.ctx.backend.subscribe();
        let stack_size = self.ctx.runtime.stack_size;
        // SAFETY: coroutine spawn is unsafe per the may runtime; the
        // listener owns its receiver and touches shared state only
        // through the router facade.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || {
                    for event in receiver.iter() {
                        if !router.is_running() {
                            continue;
                        }
                        match event {
                            HistoryEvent::Pop { state, url } => {
                                let stored_path = state
                                    .as_ref()
                                    .and_then(|s| s.get("path"))
                                    .and_then(|p| p.as_str())
                                    .map(str::to_string);
                                let result = match (state, stored_path) {
                                    (Some(state), Some(path)) => router.replace_with(
                                        &path,
                                        Some(state),
                                        true,
                                        NavEnv::history(),
                                    ),
                                    _ => router.show_with(
                                        &url,
                                        None,
                                        true,
                                        false,
                                        NavEnv::history(),
                                    ),
                                };
                                if let Err(e) = result {
                                    warn!(error = %e, "history event dropped");
                                }
                            }
                        }
                    }
                })
        };
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn history listener coroutine");
        }
    }

    /// Register an enter handler for `template`. Handlers run in
    /// registration order during dispatch; a `*` template runs for
    /// every path without claiming the match.
    pub fn route<F>(&self, template: &str, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest) -> HandlerResult + Send + Sync + 'static,
    {
        let route = Arc::new(Route::new(template)?);
        let middleware =
            Route::enter_middleware(route, Arc::new(handler) as RouteHandler, HandlerKind::Route);
        lock(&self.ctx.callbacks).push(middleware);
        info!(template = %template, "route registered");
        Ok(())
    }

    /// Register an exit handler for `template`, called on the request
    /// being left when a new page is visited.
    pub fn exit<F>(&self, template: &str, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest, &NavRequest) -> HandlerResult + Send + Sync + 'static,
    {
        let route = Arc::new(Route::new(template)?);
        let middleware = Route::exit_middleware(route, Arc::new(handler) as ExitHandler);
        lock(&self.ctx.exits).push(middleware);
        info!(template = %template, "exit handler registered");
        Ok(())
    }

    /// Register an exit handler for every path.
    pub fn exit_any<F>(&self, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest, &NavRequest) -> HandlerResult + Send + Sync + 'static,
    {
        self.exit("*", handler)
    }

    /// Register an error handler for `template`, called with the failed
    /// request and the failure when a dispatch rejects.
    pub fn error<F>(&self, template: &str, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest, &RouterError) -> HandlerResult + Send + Sync + 'static,
    {
        let route = Arc::new(Route::new(template)?);
        let middleware = Route::error_middleware(route, Arc::new(handler) as ErrorHandler);
        lock(&self.ctx.error_handlers).push(middleware);
        info!(template = %template, "error handler registered");
        Ok(())
    }

    /// Register an error handler for every path.
    pub fn error_any<F>(&self, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest, &RouterError) -> HandlerResult + Send + Sync + 'static,
    {
        self.error("*", handler)
    }

    /// Register a not-found handler for `template`, consulted when no
    /// route claims a request.
    pub fn not_found<F>(&self, template: &str, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest) -> HandlerResult + Send + Sync + 'static,
    {
        let route = Arc::new(Route::new(template)?);
        let middleware = Route::enter_middleware(
            route,
            Arc::new(handler) as RouteHandler,
            HandlerKind::NotFound,
        );
        lock(&self.ctx.not_found_handlers).push(middleware);
        info!(template = %template, "not-found handler registered");
        Ok(())
    }

    /// Register a not-found handler for every path.
    pub fn not_found_any<F>(&self, handler: F) -> Result<(), RouterError>
    where
        F: Fn(&mut NavRequest) -> HandlerResult + Send + Sync + 'static,
    {
        self.not_found("*", handler)
    }

    /// Navigate to `path`, dispatching handlers and pushing a history
    /// entry on success.
    pub fn show(&self, path: &str, state: Option<Value>) -> Result<RequestId, RouterError> {
        self.show_with(path, state, true, true, NavEnv::default())
    }

    /// Navigate to `path` with explicit dispatch/push behavior and env
    /// flags.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotStarted`] before `start()`.
    pub fn show_with(
        &self,
        path: &str,
        state: Option<Value>,
        dispatch: bool,
        push: bool,
        env: NavEnv,
    ) -> Result<RequestId, RouterError> {
        if !self.is_running() {
            return Err(RouterError::NotStarted);
        }
        let id = self.ctx.create_request(path, state, env);
        info!(request_id = %id, path = %path, push = push, dispatch = dispatch, "show");
        self.dispatcher().process_request(id, dispatch, push);
        Ok(id)
    }

    /// Replace the current entry with `path`: the state is saved before
    /// dispatching (so a redirecting handler still leaves a restorable
    /// entry) and the URL is never pushed.
    pub fn replace(&self, path: &str, state: Option<Value>) -> Result<RequestId, RouterError> {
        self.replace_with(path, state, true, NavEnv::default())
    }

    /// Replace with explicit dispatch behavior and env flags.
    pub fn replace_with(
        &self,
        path: &str,
        state: Option<Value>,
        dispatch: bool,
        env: NavEnv,
    ) -> Result<RequestId, RouterError> {
        if !self.is_running() {
            return Err(RouterError::NotStarted);
        }
        let id = self.ctx.create_request(path, state, env);
        if let Some(arc) = self.ctx.request(id) {
            let mut req = lock(&arc);
            req.push = Some(false);
            req.env.is_state_save = true;
            // Save before dispatching, which may redirect.
            self.ctx
                .backend
                .replace(&req.state, &req.title, &req.canonical_path);
        }
        info!(request_id = %id, path = %path, dispatch = dispatch, "replace");
        self.dispatcher().process_request(id, dispatch, false);
        Ok(id)
    }

    /// Go back one entry pushed by this router; when none remain,
    /// navigate to `fallback` (or the base path).
    ///
    /// Returns the fallback request id when a fallback navigation ran.
    pub fn back(
        &self,
        fallback: Option<&str>,
        state: Option<Value>,
    ) -> Result<Option<RequestId>, RouterError> {
        if self.len() > 0 {
            self.ctx.backend.back();
            self.ctx.len.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        }
        let target = match fallback {
            Some(path) => path.to_string(),
            None => self.base(),
        };
        self.show(&target, state).map(Some)
    }

    /// Re-dispatch the current URL without pushing a history entry.
    pub fn reload(&self) -> Result<RequestId, RouterError> {
        let url = self
            .current_url()
            .ok_or_else(|| RouterError::InvalidArgument("no current request to reload".into()))?;
        self.show_with(&url, None, true, false, NavEnv::reload())
    }

    /// Re-process a stored request: per-trigger env flags are dropped
    /// and the transient restore flag set for the duration.
    pub fn restore_request(
        &self,
        id: RequestId,
        dispatch: bool,
        push: bool,
    ) -> Result<(), RouterError> {
        if !self.is_running() {
            return Err(RouterError::NotStarted);
        }
        let Some(arc) = self.ctx.request(id) else {
            return Err(RouterError::InvalidArgument(format!(
                "unknown request id {}",
                id
            )));
        };
        {
            let mut req = lock(&arc);
            req.env.clear_transient();
            req.env.is_restore = true;
            // The re-dispatch gets a fresh pending result and clean
            // outcome flags; the settled task stays with past waiters.
            req.task = Task::new();
            req.route_found = false;
            req.not_found_handled = false;
            req.error_handled = false;
            req.phase = crate::request::DispatchPhase::Created;
        }
        self.dispatcher().process_request(id, dispatch, push);
        Ok(())
    }

    /// Snapshot of the current request.
    #[must_use]
    pub fn current_request(&self) -> Option<NavRequest> {
        let id = lock(&self.ctx.pointers).current?;
        self.ctx.snapshot_request(id)
    }

    /// Snapshot of the previous request.
    #[must_use]
    pub fn previous_request(&self) -> Option<NavRequest> {
        let id = lock(&self.ctx.pointers).previous?;
        self.ctx.snapshot_request(id)
    }

    /// Current URL, base prefix included.
    #[must_use]
    pub fn current_url(&self) -> Option<String> {
        self.current_request().map(|r| r.canonical_path)
    }

    /// Current URL without the part provided via the base path.
    #[must_use]
    pub fn current_url_without_base(&self) -> Option<String> {
        self.current_request().map(|r| r.path)
    }

    /// Previous URL, base prefix included.
    #[must_use]
    pub fn previous_url(&self) -> Option<String> {
        self.previous_request().map(|r| r.canonical_path)
    }

    /// Previous URL without the part provided via the base path.
    #[must_use]
    pub fn previous_url_without_base(&self) -> Option<String> {
        self.previous_request().map(|r| r.path)
    }

    /// Snapshot of any live request by id.
    #[must_use]
    pub fn request(&self, id: RequestId) -> Option<NavRequest> {
        self.ctx.snapshot_request(id)
    }

    /// The pending dispatch result for a live request.
    #[must_use]
    pub fn task(&self, id: RequestId) -> Option<Task> {
        self.ctx.request_task(id)
    }

    /// Block until the request's dispatch settles and return the
    /// result. `None` for an unknown id.
    pub fn wait(&self, id: RequestId) -> Option<TaskResult> {
        self.task(id).map(|task| task.wait())
    }
}
