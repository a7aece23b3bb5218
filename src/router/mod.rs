//! # Router Module
//!
//! The public facade: process-wide registries (routes, exits, error
//! handlers, not-found handlers) and the navigation operations that
//! compose the pattern compiler, the sequencer, and the dispatch state
//! machine.
//!
//! ## Overview
//!
//! A [`Router`] owns one shared context holding:
//! - The four append-only handler registries, in registration order
//! - The current/previous request pointers and the live request table
//! - The base path, decode flags, and run state
//! - The supersession chain: the most recently submitted dispatch task
//!
//! Registries survive `stop()`; only the pointers and run state reset,
//! so a router can be started again with its routes intact.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waypoint::{HandlerOutcome, MemoryHistory, Router, StartOptions};
//!
//! let router = Router::new(Arc::new(MemoryHistory::new("/")));
//! router
//!     .route("/user/:id", |req| {
//!         let id = req.param("id").unwrap_or_default().to_string();
//!         tracing::info!(%id, "user page entered");
//!         Ok(HandlerOutcome::Complete)
//!     })
//!     .expect("register route");
//! router.start(StartOptions::default());
//! router.show("/user/42", None).expect("navigate");
//! ```

mod core;

pub use core::{Router, StartOptions};

pub(crate) use core::{lock, RouterContext};
