use may::coroutine;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::RouterError;
use crate::ids::RequestId;
use crate::request::{DispatchPhase, NavRequest};
use crate::router::{lock, RouterContext};
use crate::sequencer::{queue, QueueStep, Task};

/// Pre-dispatch copies of the request pointers and their entities, kept
/// for rollback. Task handles inside the copies are shared, not
/// duplicated, so an in-flight observer still sees the settlement.
struct Snapshot {
    current: Option<(RequestId, NavRequest)>,
    previous: Option<(RequestId, NavRequest)>,
}

/// The request lifecycle controller.
///
/// Owns no state of its own; it drives the shared [`RouterContext`]
/// through the dispatch phases:
///
/// ```text
/// created -> dispatching -> { routed | not-found | errored }
/// ```
///
/// Dispatches serialize on the previously submitted dispatch's task
/// rather than a global lock, so a navigation started while another is
/// mid-pipeline queues behind it in submission order and is never
/// interleaved with it.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    ctx: Arc<RouterContext>,
}

impl Dispatcher {
    pub(crate) fn new(ctx: Arc<RouterContext>) -> Self {
        Dispatcher { ctx }
    }

    /// Execute a freshly built (or restored) request: dispatch it, or
    /// just advance the pointers and commit when dispatching is off.
    pub(crate) fn process_request(&self, id: RequestId, dispatch: bool, push: bool) {
        if !push {
            if let Some(arc) = self.ctx.request(id) {
                lock(&arc).push = Some(false);
            }
        }
        if dispatch {
            self.dispatch(id);
            return;
        }
        {
            let mut ptrs = lock(&self.ctx.pointers);
            ptrs.previous = ptrs.current;
            ptrs.current = Some(id);
        }
        let push_allowed = self
            .ctx
            .request(id)
            .map(|arc| !matches!(lock(&arc).push, Some(false)))
            .unwrap_or(false);
        if push_allowed {
            self.commit(id);
        }
    }

    /// Submit the request's dispatch. The submission order defines the
    /// supersession order: the coroutine first waits for the previously
    /// submitted dispatch to fully settle, success or failure.
    pub(crate) fn dispatch(&self, id: RequestId) {
        let Some(task) = self.ctx.request_task(id) else {
            warn!(request_id = %id, "dispatch of unknown request dropped");
            return;
        };
        let predecessor = {
            let mut last = lock(&self.ctx.last_dispatch);
            std::mem::replace(&mut *last, Some(task.clone()))
        };
        let dispatcher = self.clone();
        let stack_size = self.ctx.runtime.stack_size;
        // SAFETY: coroutine spawn is unsafe per the may runtime; the
        // closure owns its dispatcher clone and settles the request's
        // task on every path out.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || dispatcher.run(id, predecessor))
        };
        if let Err(e) = spawned {
            error!(request_id = %id, error = %e, "Failed to spawn dispatch coroutine");
            task.reject(RouterError::dispatch(format!(
                "failed to spawn dispatch coroutine: {}",
                e
            )));
        }
    }

    /// The dispatch state machine body. Runs on its own coroutine.
    fn run(&self, id: RequestId, predecessor: Option<Task>) {
        if let Some(prev_task) = predecessor {
            if !prev_task.is_settled() {
                debug!(request_id = %id, "dispatch queued behind in-flight navigation");
            }
            // Outcome irrelevant: exits must simply see a stable
            // current request.
            let _ = prev_task.wait();
        }

        let Some(task) = self.ctx.request_task(id) else {
            return;
        };

        let snapshot = self.capture_snapshot();
        let leaving = {
            let mut ptrs = lock(&self.ctx.pointers);
            let leaving = ptrs.current;
            ptrs.previous = ptrs.current;
            ptrs.current = Some(id);
            leaving
        };
        self.set_phase(id, DispatchPhase::Dispatching);
        info!(request_id = %id, "dispatch started");

        let pipeline: Result<(), RouterError> = (|| {
            if let Some(prev_id) = leaving {
                self.run_exits(prev_id, id)?;
            }
            self.run_enters(id)?;
            Ok(())
        })();

        match pipeline {
            Ok(()) => self.settle_success(id, &task, &snapshot),
            Err(e) => self.fail(id, &task, e, &snapshot),
        }

        self.ctx.prune_requests();
    }

    /// Success path: commit and resolve when a route (or a not-found
    /// handler) claimed the request; otherwise fall through to the
    /// not-found fallback.
    fn settle_success(&self, id: RequestId, task: &Task, snapshot: &Snapshot) {
        let route_found = self
            .ctx
            .request(id)
            .map(|arc| lock(&arc).route_found)
            .unwrap_or(false);

        if route_found {
            self.commit(id);
            self.set_phase(id, DispatchPhase::Routed);
            self.dispatch_sub_request(id);
            task.resolve(Value::Null);
            return;
        }

        debug!(request_id = %id, "no route claimed the request; running not-found handlers");
        match self.run_not_found(id) {
            Ok(()) => {}
            Err(e) => {
                // A failing not-found handler rejects like any other
                // handler failure.
                self.fail(id, task, e, snapshot);
                return;
            }
        }

        let claimed = self
            .ctx
            .request(id)
            .map(|arc| lock(&arc).not_found_handled)
            .unwrap_or(false);
        self.set_phase(id, DispatchPhase::NotFound);
        if claimed {
            self.commit(id);
            task.resolve(Value::Null);
        } else {
            let path = self.unhandled(id);
            task.reject(RouterError::UnhandledRoute { path });
        }
    }

    /// On success with a linked sub-request: dispatch the child behind
    /// this dispatch and restore the request pointers toward the parent
    /// once the child settles.
    fn dispatch_sub_request(&self, id: RequestId) {
        let sub = self
            .ctx
            .request(id)
            .and_then(|arc| lock(&arc).sub_request);
        let Some(child_id) = sub else {
            return;
        };
        let Some(child_task) = self.ctx.request_task(child_id) else {
            return;
        };
        let restore = {
            let ptrs = lock(&self.ctx.pointers);
            (ptrs.current, ptrs.previous)
        };
        let ctx = Arc::clone(&self.ctx);
        child_task.on_settle(move |_| {
            let mut ptrs = lock(&ctx.pointers);
            ptrs.current = restore.0;
            ptrs.previous = restore.1;
            debug!(parent = ?restore.0, "pointers restored after sub-request");
        });
        info!(parent = %id, child = %child_id, "dispatching sub-request");
        self.dispatch(child_id);
    }

    /// Failure path: offer the failure to the error registry; an
    /// unclaimed failure is logged and rolls the pre-dispatch state
    /// back. Rejection never commits history.
    fn fail(&self, id: RequestId, task: &Task, failure: RouterError, snapshot: &Snapshot) {
        warn!(request_id = %id, error = %failure, "dispatch rejected; running error handlers");

        let handlers = lock(&self.ctx.error_handlers).clone();
        let steps: Vec<QueueStep> = handlers
            .into_iter()
            .map(|middleware| {
                let ctx = Arc::clone(&self.ctx);
                let failure = failure.clone();
                Box::new(move || {
                    let Some(arc) = ctx.request(id) else {
                        return Task::resolved(Value::Null);
                    };
                    let mut req = lock(&arc);
                    middleware(&mut req, &failure)
                }) as QueueStep
            })
            .collect();
        if let Err(inner) = queue(steps).wait() {
            error!(request_id = %id, error = %inner, "error handler itself failed");
        }

        let claimed = self
            .ctx
            .request(id)
            .map(|arc| lock(&arc).error_handled)
            .unwrap_or(false);
        self.set_phase(id, DispatchPhase::Errored);

        if !claimed {
            error!(request_id = %id, error = %failure, "unhandled dispatch error; rolling back");
            self.rollback(snapshot);
        }
        task.reject(failure);
    }

    /// Run the exit registry against the request being left. Exit
    /// handlers receive the leaving request mutably and a snapshot of
    /// the entering one.
    fn run_exits(&self, leaving_id: RequestId, entering_id: RequestId) -> Result<(), RouterError> {
        let exits = lock(&self.ctx.exits).clone();
        if exits.is_empty() {
            return Ok(());
        }
        debug!(leaving = %leaving_id, entering = %entering_id, handlers = exits.len(), "exit phase");
        let steps: Vec<QueueStep> = exits
            .into_iter()
            .map(|middleware| {
                let ctx = Arc::clone(&self.ctx);
                Box::new(move || {
                    let Some(leaving) = ctx.request(leaving_id) else {
                        return Task::resolved(Value::Null);
                    };
                    // Snapshot the entering request so only one lock is
                    // ever held; a restore can make both ids the same
                    // request.
                    let entering_snapshot = if leaving_id == entering_id {
                        Some(lock(&leaving).clone())
                    } else {
                        ctx.snapshot_request(entering_id)
                    };
                    let Some(entering) = entering_snapshot else {
                        return Task::resolved(Value::Null);
                    };
                    let mut req = lock(&leaving);
                    middleware(&mut req, &entering)
                }) as QueueStep
            })
            .collect();
        queue(steps).wait().map(|_| ())
    }

    /// Run the enter registry against the request.
    fn run_enters(&self, id: RequestId) -> Result<(), RouterError> {
        let callbacks = lock(&self.ctx.callbacks).clone();
        debug!(request_id = %id, handlers = callbacks.len(), "enter phase");
        let steps: Vec<QueueStep> = callbacks
            .into_iter()
            .map(|middleware| {
                let ctx = Arc::clone(&self.ctx);
                Box::new(move || {
                    let Some(arc) = ctx.request(id) else {
                        return Task::resolved(Value::Null);
                    };
                    let mut req = lock(&arc);
                    middleware(&mut req)
                }) as QueueStep
            })
            .collect();
        queue(steps).wait().map(|_| ())
    }

    /// Run the not-found registry against the request.
    fn run_not_found(&self, id: RequestId) -> Result<(), RouterError> {
        let handlers = lock(&self.ctx.not_found_handlers).clone();
        if handlers.is_empty() {
            return Ok(());
        }
        let steps: Vec<QueueStep> = handlers
            .into_iter()
            .map(|middleware| {
                let ctx = Arc::clone(&self.ctx);
                Box::new(move || {
                    let Some(arc) = ctx.request(id) else {
                        return Task::resolved(Value::Null);
                    };
                    let mut req = lock(&arc);
                    middleware(&mut req)
                }) as QueueStep
            })
            .collect();
        queue(steps).wait().map(|_| ())
    }

    /// Commit the request's URL to session history, exactly once per
    /// successful dispatch: a push for a new URL, a replace when the
    /// backend already displays this URL or the request forbids
    /// pushing. Clears the transient restore flag.
    fn commit(&self, id: RequestId) {
        let Some(arc) = self.ctx.request(id) else {
            return;
        };
        let mut req = lock(&arc);
        if req.parent.is_some() {
            // A sub-request's URL rides on its parent's entry; its
            // dispatch never touches session history itself.
            debug!(request_id = %id, "sub-request commit skipped");
            req.env.is_restore = false;
            return;
        }
        let push_allowed = !matches!(req.push, Some(false));
        let displayed = self.ctx.backend.location();
        if push_allowed && displayed != req.canonical_path {
            self.ctx.len.fetch_add(1, Ordering::SeqCst);
            self.ctx
                .backend
                .push(&req.state, &req.title, &req.canonical_path);
            info!(request_id = %id, url = %req.canonical_path, "history state pushed");
        } else {
            self.ctx
                .backend
                .replace(&req.state, &req.title, &req.canonical_path);
            info!(request_id = %id, url = %req.canonical_path, "history state replaced");
        }
        req.env.is_restore = false;
    }

    /// The not-found fallback: when the backend displays something
    /// other than the request's canonical path, give up gracefully by
    /// stopping the router and asking for a hard navigation. Returns
    /// the canonical path.
    fn unhandled(&self, id: RequestId) -> String {
        let canonical = self
            .ctx
            .request(id)
            .map(|arc| lock(&arc).canonical_path.clone())
            .unwrap_or_default();
        let displayed = self.ctx.backend.location();
        if displayed == canonical {
            debug!(path = %canonical, "unhandled request already displayed");
            return canonical;
        }
        warn!(path = %canonical, "no route matched; falling back to hard navigation");
        self.ctx.halt();
        self.ctx.backend.navigate(&canonical);
        canonical
    }

    fn set_phase(&self, id: RequestId, phase: DispatchPhase) {
        if let Some(arc) = self.ctx.request(id) {
            lock(&arc).phase = phase;
        }
    }

    fn capture_snapshot(&self) -> Snapshot {
        let (current_id, previous_id) = {
            let ptrs = lock(&self.ctx.pointers);
            (ptrs.current, ptrs.previous)
        };
        let copy = |id: Option<RequestId>| {
            id.and_then(|i| self.ctx.snapshot_request(i).map(|req| (i, req)))
        };
        Snapshot {
            current: copy(current_id),
            previous: copy(previous_id),
        }
    }

    /// Restore the pre-dispatch pointers and request entities. The
    /// user-visible URL never advanced (rejection never commits), so
    /// only in-memory state needs to move back.
    fn rollback(&self, snapshot: &Snapshot) {
        for (id, req) in [&snapshot.current, &snapshot.previous].into_iter().flatten() {
            self.ctx
                .requests
                .insert(*id, Arc::new(Mutex::new(req.clone())));
        }
        let mut ptrs = lock(&self.ctx.pointers);
        ptrs.current = snapshot.current.as_ref().map(|(id, _)| *id);
        ptrs.previous = snapshot.previous.as_ref().map(|(id, _)| *id);
        drop(ptrs);
        warn!("request pointers rolled back to pre-dispatch snapshot");
    }
}
