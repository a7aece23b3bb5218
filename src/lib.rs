//! # Waypoint
//!
//! **Waypoint** is a coroutine-powered client-side navigation router: it
//! turns a URL into a structured request, matches the request against
//! registered path patterns, and runs an ordered, asynchronous pipeline
//! of handlers before committing the new URL to session history.
//!
//! ## Overview
//!
//! Waypoint targets single-page applications and other embeddings that
//! manage their own navigation. The platform's session history (the
//! browser History API, or anything equivalent) sits behind the
//! [`HistoryBackend`] trait; an in-memory implementation ships with the
//! crate so the full lifecycle runs in tests and headless hosts.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`pattern`]** - Path-pattern compiler: templates like
//!   `/user/:id` become matchers with ordered capture extraction, plus
//!   the reverse renderer that rebuilds a path from data
//! - **[`query`]** - Query-string codec with PHP-style bracket nesting
//! - **[`route`]** - Binds compiled patterns to handlers and wraps them
//!   into test-and-dispatch middleware
//! - **[`sequencer`]** - Settle-once task handles and the ordered queue
//!   combinator behind every dispatch phase
//! - **[`request`]** - The navigation request entity: normalization,
//!   hash sub-requests, params, outcome flags
//! - **[`router`]** - The facade: registries, run state, and the public
//!   navigation operations (`show`, `replace`, `back`, `reload`)
//! - **[`history`]** - The platform seam and the in-memory backend
//!
//! ## Request Handling Flow
//!
//! A navigation trigger (intercepted click, history notification, or an
//! explicit `show`) constructs a request. The dispatcher waits for the
//! previously submitted dispatch to settle, runs the exit handlers of
//! the request being left, then the enter handlers of the new request,
//! each registry strictly in registration order. On success the URL is
//! committed to history (push, or replace when the URL is already
//! displayed) and any hash sub-request (`#!/inner`) dispatches in turn.
//! An unclaimed path falls to the not-found registry, then to a hard
//! navigation; a failed handler routes the request through the error
//! registry, and an unclaimed failure rolls the pre-dispatch state
//! back, so the user-visible URL never advances on an unhandled error.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypoint::{HandlerOutcome, MemoryHistory, Router, StartOptions};
//!
//! let router = Router::new(Arc::new(MemoryHistory::new("/")));
//!
//! router
//!     .route("/user/:id", |req| {
//!         let id = req.param("id").unwrap_or_default().to_string();
//!         tracing::info!(%id, "user page entered");
//!         Ok(HandlerOutcome::Complete)
//!     })
//!     .expect("register route");
//!
//! router.start(StartOptions::default());
//! router.show("/user/42", None).expect("navigate");
//! ```
//!
//! ## Runtime Considerations
//!
//! Waypoint uses the `may` coroutine runtime, not tokio or async-std.
//! This means:
//!
//! - Dispatch pipelines run in coroutines (lightweight threads)
//! - Stack size is configurable via the `WAYP_STACK_SIZE` environment
//!   variable
//! - Handlers must not block inside the callback; asynchronous work
//!   returns [`HandlerOutcome::Pending`] with a task the handler
//!   settles from its own coroutine

pub mod error;
pub mod history;
pub mod ids;
pub mod pattern;
pub mod query;
pub mod request;
pub mod route;
pub mod router;
pub mod runtime_config;
pub mod sequencer;

mod dispatcher;

pub use error::RouterError;
pub use history::{is_same_origin, HistoryBackend, HistoryEvent, MemoryHistory};
pub use ids::RequestId;
pub use request::{DispatchPhase, NavEnv, NavRequest, SUB_REQUEST_MARKER};
pub use route::{HandlerOutcome, HandlerResult, ParamVec, Route};
pub use router::{Router, StartOptions};
pub use sequencer::{Task, TaskResult};
