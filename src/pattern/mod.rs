//! # Pattern Compiler Module
//!
//! Compiles path templates into matchers with ordered capture
//! extraction, and re-renders templates from data (the reverse
//! direction).
//!
//! ## Overview
//!
//! The compiler is responsible for:
//! - Tokenizing templates into literal and parameter tokens
//! - Building a regex matcher whose capture groups line up with the
//!   ordered parameter keys
//! - Rendering a template back into a concrete path from a data mapping
//!
//! ## Template grammar
//!
//! Templates support escaped literals (`\\(`), named captures (`:id`),
//! named captures with an inline pattern (`:id(\\d+)`), anonymous
//! capture groups (`(.*)`), a bare wildcard `*`, and the suffix
//! quantifiers `?` (optional), `+` (one or more) and `*` (zero or
//! more) on the preceding capture. An unconstrained `:name` matches one
//! or more characters excluding its segment delimiter, so `:id` in
//! `/user/:id` cannot itself contain a slash.
//!
//! ## Example
//!
//! ```rust
//! use waypoint::pattern::{compile, MatchOptions, PathSpec};
//!
//! let pattern = compile(&PathSpec::from("/user/:id"), &MatchOptions::default()).unwrap();
//! let caps = pattern.regex.captures("/user/42").unwrap();
//! assert_eq!(caps.get(1).map(|m| m.as_str()), Some("42"));
//! ```

mod compile;
mod render;
#[cfg(test)]
mod tests;
mod token;

pub use compile::{compile, MatchOptions, PathPattern, PathSpec};
pub use render::PathRenderer;
pub use token::{ParamKey, ParamToken, Token};
