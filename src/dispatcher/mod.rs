//! # Dispatcher Module
//!
//! The request lifecycle controller: it serializes dispatches on the
//! previously submitted dispatch's task, runs the exit -> enter ->
//! (not-found | error) phases through the sequencer, decides between a
//! history push and replace on success, rolls back on unhandled
//! failure, and chains hash sub-requests behind their parent.

mod core;

pub(crate) use core::Dispatcher;
