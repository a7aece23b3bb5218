//! # Route Module
//!
//! Binds a compiled path pattern to handler functions and produces the
//! phase-specific middleware wrappers the dispatcher queues: each
//! wrapper tests the match, records the phase outcome on the request,
//! and adapts the handler's return value into the sequencer's
//! success/failure channel. A non-matching wrapper resolves immediately
//! as a no-op so it never blocks the chain.

use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

use crate::error::RouterError;
use crate::pattern::{compile, MatchOptions, ParamKey, PathPattern, PathSpec};
use crate::request::{decode_component, NavRequest};
use crate::sequencer::Task;

/// Maximum number of captured params before heap allocation.
/// Most route templates carry well under 8 captures.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated param storage. Keys are `Arc<str>` because they come
/// from the compiled pattern's key list; values are per-request capture
/// text, `None` when an optional capture did not participate.
pub type ParamVec = SmallVec<[(Arc<str>, Option<String>); MAX_INLINE_PARAMS]>;

/// What a handler produced.
pub enum HandlerOutcome {
    /// The handler finished synchronously.
    Complete,
    /// The handler continues elsewhere; the chain waits on this task.
    Pending(Task),
}

/// Return type of every handler: complete/pending on success, a router
/// error to short-circuit the chain.
pub type HandlerResult = Result<HandlerOutcome, RouterError>;

/// Enter / not-found handler: receives the request being entered.
pub type RouteHandler = Arc<dyn Fn(&mut NavRequest) -> HandlerResult + Send + Sync>;

/// Exit handler: receives the request being left and the one being
/// entered.
pub type ExitHandler = Arc<dyn Fn(&mut NavRequest, &NavRequest) -> HandlerResult + Send + Sync>;

/// Error handler: receives the failed request and the failure.
pub type ErrorHandler = Arc<dyn Fn(&mut NavRequest, &RouterError) -> HandlerResult + Send + Sync>;

/// Middleware stored in the enter and not-found registries.
pub(crate) type EnterMiddleware = Arc<dyn Fn(&mut NavRequest) -> Task + Send + Sync>;

/// Middleware stored in the exit registry.
pub(crate) type ExitMiddleware = Arc<dyn Fn(&mut NavRequest, &NavRequest) -> Task + Send + Sync>;

/// Middleware stored in the error registry.
pub(crate) type ErrorMiddleware =
    Arc<dyn Fn(&mut NavRequest, &RouterError) -> Task + Send + Sync>;

/// Which outcome flag a matching wrapper records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerKind {
    Route,
    NotFound,
}

/// A compiled path pattern bound to handlers.
///
/// The `*` template is the "match everything" wildcard; it is
/// distinguished because wildcard matches never claim `route_found`, so
/// `*` serves as global middleware without claiming the match.
#[derive(Debug, Clone)]
pub struct Route {
    /// The template this route was registered under
    pub template: String,
    /// Compiled matcher and ordered keys
    pub pattern: PathPattern,
    /// Whether this is the `*` wildcard
    pub wildcard: bool,
}

impl Route {
    /// Compile `template` with default options.
    pub fn new(template: &str) -> Result<Self, RouterError> {
        Route::with_options(template, &MatchOptions::default())
    }

    /// Compile `template` with explicit matching options.
    pub fn with_options(template: &str, options: &MatchOptions) -> Result<Self, RouterError> {
        if template.is_empty() {
            return Err(RouterError::InvalidArgument(
                "route template must not be empty; use '*' to match all paths".to_string(),
            ));
        }
        let wildcard = template == "*";
        let source = if wildcard { "(.*)" } else { template };
        let pattern = compile(&PathSpec::from(source), options)?;
        Ok(Route {
            template: template.to_string(),
            pattern,
            wildcard,
        })
    }

    /// Test `path` against this route and, on success, accumulate the
    /// captured params.
    ///
    /// Any query string is stripped before matching and the remaining
    /// pathname percent-decoded. A captured value only overwrites an
    /// existing entry when it is defined; earlier-set values are never
    /// clobbered by a later route's unmatched optional capture.
    pub fn match_path(&self, path: &str, params: &mut ParamVec, decode: bool) -> bool {
        let pathname = match path.find('?') {
            Some(i) => &path[..i],
            None => path,
        };
        let pathname = match urlencoding::decode(pathname) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => pathname.to_string(),
        };

        let Some(captures) = self.pattern.regex.captures(&pathname) else {
            return false;
        };

        for (i, key) in self.pattern.keys.iter().enumerate() {
            let value = captures
                .get(i + 1)
                .map(|m| decode_component(m.as_str(), decode));
            set_param(params, &key.name, value);
        }
        debug!(template = %self.template, path = %pathname, "route matched");
        true
    }

    /// Test a request against this route, accumulating into its params.
    pub fn matches_request(&self, request: &mut NavRequest) -> bool {
        self.match_path(&request.path, &mut request.params, request.decode_components)
    }

    /// Wrap `handler` for the enter or not-found registry. On a match
    /// the phase's outcome flag is set *before* the handler runs, so a
    /// failing handler still leaves an accurate "this phase was offered"
    /// flag for rollback decisions upstream.
    pub(crate) fn enter_middleware(
        route: Arc<Route>,
        handler: RouteHandler,
        kind: HandlerKind,
    ) -> EnterMiddleware {
        Arc::new(move |request: &mut NavRequest| {
            if !route.matches_request(request) {
                return Task::resolved(Value::Null);
            }
            match kind {
                HandlerKind::Route => {
                    if !route.wildcard {
                        request.route_found = true;
                    }
                }
                HandlerKind::NotFound => request.not_found_handled = true,
            }
            adapt(handler(request))
        })
    }

    /// Wrap `handler` for the exit registry. The match runs against the
    /// request being left.
    pub(crate) fn exit_middleware(route: Arc<Route>, handler: ExitHandler) -> ExitMiddleware {
        Arc::new(move |leaving: &mut NavRequest, entering: &NavRequest| {
            if !route.matches_request(leaving) {
                return Task::resolved(Value::Null);
            }
            adapt(handler(leaving, entering))
        })
    }

    /// Wrap `handler` for the error registry. A match claims the error
    /// before the handler runs.
    pub(crate) fn error_middleware(route: Arc<Route>, handler: ErrorHandler) -> ErrorMiddleware {
        Arc::new(move |request: &mut NavRequest, error: &RouterError| {
            if !route.matches_request(request) {
                return Task::resolved(Value::Null);
            }
            request.error_handled = true;
            adapt(handler(request, error))
        })
    }
}

/// Adapt a handler's return value into a task.
fn adapt(result: HandlerResult) -> Task {
    match result {
        Ok(HandlerOutcome::Complete) => Task::resolved(Value::Null),
        Ok(HandlerOutcome::Pending(task)) => task,
        Err(e) => Task::rejected(e),
    }
}

/// Insert a captured value under the accumulate-don't-clobber rule:
/// keys stay unique, and an existing entry is only overwritten when the
/// new value is defined.
fn set_param(params: &mut ParamVec, key: &ParamKey, value: Option<String>) {
    let name = key.to_string();
    if let Some(slot) = params.iter_mut().find(|(k, _)| k.as_ref() == name) {
        if value.is_some() {
            slot.1 = value;
        }
        return;
    }
    params.push((Arc::from(name.as_str()), value));
}
