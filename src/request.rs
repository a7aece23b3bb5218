//! # Request Module
//!
//! The central navigation entity. A [`NavRequest`] is one navigation
//! attempt: it carries the normalized path, extracted params, opaque
//! state, the env flags describing what caused the navigation, and the
//! dispatch outcome flags. Requests are identified by their monotonic
//! [`RequestId`]; parent/sub-request links are non-owning ids resolved
//! through the router's request table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::ids::RequestId;
use crate::query;
use crate::route::ParamVec;
use crate::sequencer::Task;

/// Marker introducing a hash-encoded sub-request: `#!/inner/path`.
pub const SUB_REQUEST_MARKER: char = '!';

/// Shared handle to a live request in the router's request table.
pub(crate) type SharedRequest = Arc<Mutex<NavRequest>>;

/// Flags describing what caused a navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavEnv {
    /// First dispatch after `start()`
    pub is_first: bool,
    /// Triggered by an intercepted link click
    pub is_click: bool,
    /// Triggered by a history-change notification
    pub is_history: bool,
    /// Triggered by `reload()`
    pub is_reload: bool,
    /// Transient: a stored request being re-processed
    pub is_restore: bool,
    /// State was saved to history before dispatching
    pub is_state_save: bool,
}

impl NavEnv {
    pub fn first() -> Self {
        NavEnv {
            is_first: true,
            ..NavEnv::default()
        }
    }

    pub fn click() -> Self {
        NavEnv {
            is_click: true,
            ..NavEnv::default()
        }
    }

    pub fn history() -> Self {
        NavEnv {
            is_history: true,
            ..NavEnv::default()
        }
    }

    pub fn reload() -> Self {
        NavEnv {
            is_reload: true,
            ..NavEnv::default()
        }
    }

    /// Drop the per-trigger flags before a stored request is
    /// re-processed.
    pub(crate) fn clear_transient(&mut self) {
        self.is_history = false;
        self.is_reload = false;
        self.is_click = false;
        self.is_state_save = false;
    }
}

/// Lifecycle states of a request's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Created,
    Dispatching,
    Routed,
    NotFound,
    Errored,
}

/// Context a request is normalized against.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Path prefix stripped from all internal paths
    pub base: String,
    /// Title captured for history entries
    pub title: String,
    /// Percent-decode URL components during normalization
    pub decode_components: bool,
    /// Parse the query string into a mapping
    pub decode_query: bool,
}

/// One navigation attempt.
#[derive(Debug, Clone)]
pub struct NavRequest {
    /// Monotonic identity; never reused
    pub id: RequestId,
    /// Path as supplied by the caller, base prefix included
    pub canonical_path: String,
    /// Base-stripped path, query string included, hash excluded
    pub path: String,
    /// Decoded pathname without the query string
    pub pathname: String,
    /// Raw query string (decoded when `decode_components` is on)
    pub querystring: String,
    /// Parsed query mapping when `decode_query` is on
    pub query: Option<Map<String, Value>>,
    /// Decoded hash fragment, `#` and sub-request marker excluded
    pub hash: String,
    /// Params accumulated across the matching middleware chain
    pub params: ParamVec,
    /// Opaque payload persisted to history; carries the canonical path
    /// under the `"path"` key for restoration
    pub state: Value,
    /// Title captured at construction
    pub title: String,
    /// What caused this navigation
    pub env: NavEnv,
    /// Push/replace override; `Some(false)` forces replace
    pub push: Option<bool>,
    /// A non-wildcard route claimed this request
    pub route_found: bool,
    /// A not-found handler claimed this request
    pub not_found_handled: bool,
    /// An error handler claimed this request
    pub error_handled: bool,
    /// Dispatch lifecycle state
    pub phase: DispatchPhase,
    /// Enclosing request when this is a hash sub-request
    pub parent: Option<RequestId>,
    /// Nested hash sub-request, dispatched after this request commits
    pub sub_request: Option<RequestId>,
    /// Whether captured values get percent-decoded during matching
    pub(crate) decode_components: bool,
    /// Pending result of the in-flight dispatch
    pub(crate) task: Task,
}

impl NavRequest {
    /// Normalize `path` into a request.
    ///
    /// Absolute URLs are reduced to path + query + fragment. A path
    /// inside the configured base keeps its canonical form while
    /// `path`/`pathname` have the base stripped. The query string is
    /// split off at the first `?`, the hash at the first `#`; a hash
    /// beginning with the sub-request marker is left for the router to
    /// decompose into a child request.
    pub fn new(path: &str, state: Option<Value>, env: NavEnv, opts: &RequestOptions) -> Self {
        let mut path = path.to_string();

        // A full URL from a click adapter reduces to its in-app form.
        if path.contains("://") {
            if let Ok(parsed) = url::Url::parse(&path) {
                if parsed.has_host() {
                    let mut rebuilt = parsed.path().to_string();
                    if let Some(q) = parsed.query() {
                        rebuilt.push('?');
                        rebuilt.push_str(q);
                    }
                    if let Some(frag) = parsed.fragment() {
                        rebuilt.push('#');
                        rebuilt.push_str(frag);
                    }
                    path = rebuilt;
                }
            }
        }

        if path.starts_with('/') && !path.starts_with(&opts.base) {
            path = format!("{}{}", opts.base, path);
        }

        let canonical_path = path.clone();
        let mut stripped = if opts.base.is_empty() {
            path.clone()
        } else {
            path.replacen(&opts.base, "", 1)
        };
        if stripped.is_empty() {
            stripped = "/".to_string();
        }

        let query_at = canonical_path.find('?');
        let mut querystring = match query_at {
            Some(i) => decode_component(&canonical_path[i + 1..], opts.decode_components),
            None => String::new(),
        };
        let pathname = decode_component(
            match query_at {
                Some(i) => &canonical_path[..i],
                None => &canonical_path,
            },
            opts.decode_components,
        );

        // Fragment: the hash rides on the stripped path until here.
        let mut hash = String::new();
        if let Some(h) = stripped.find('#') {
            hash = decode_component(&stripped[h + 1..], opts.decode_components);
            stripped.truncate(h);
            if let Some(q) = querystring.find('#') {
                querystring.truncate(q);
            }
        }

        let query = if opts.decode_query {
            Some(query::parse(&querystring))
        } else {
            None
        };

        let state = match state {
            None | Some(Value::Null) => {
                let mut map = Map::new();
                map.insert("path".to_string(), Value::String(canonical_path.clone()));
                Value::Object(map)
            }
            Some(mut value) => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("path".to_string(), Value::String(canonical_path.clone()));
                } else {
                    debug!(path = %canonical_path, "non-object state left untouched");
                }
                value
            }
        };

        NavRequest {
            id: RequestId::new(),
            canonical_path,
            path: stripped,
            pathname,
            querystring,
            query,
            hash,
            params: ParamVec::new(),
            state,
            title: opts.title.clone(),
            env,
            push: None,
            route_found: false,
            not_found_handled: false,
            error_handled: false,
            phase: DispatchPhase::Created,
            parent: None,
            sub_request: None,
            decode_components: opts.decode_components,
            task: Task::new(),
        }
    }

    /// The hash-encoded sub-request path, when the hash carries one.
    #[must_use]
    pub fn sub_request_path(&self) -> Option<&str> {
        self.hash.strip_prefix(SUB_REQUEST_MARKER)
    }

    /// Look up a captured param by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Pending result of this request's dispatch.
    #[must_use]
    pub fn task(&self) -> Task {
        self.task.clone()
    }
}

/// Remove URL encoding from `val`, accommodating whitespace in both
/// `x-www-form-urlencoded` and regular percent-encoded form. Returns
/// the input untouched when decoding is disabled or the escape
/// sequences are malformed.
pub(crate) fn decode_component(val: &str, decode: bool) -> String {
    if !decode {
        return val.to_string();
    }
    let spaced = val.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
