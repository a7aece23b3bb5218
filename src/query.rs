//! # Query Codec Module
//!
//! Parses and serializes query strings with PHP-style bracket nesting.
//!
//! `a[b]=1` becomes `{"a": {"b": "1"}}`, `a[]=1&a[]=2` becomes
//! `{"a": ["1", "2"]}`, and a bare `foo` becomes `{"foo": ""}`. A key
//! first used as a sequence is promoted to a mapping once a non-integer
//! sub-key appears, with the sequence contents copied to index keys:
//! `a[]=x&a[b]=y` yields `{"a": {"0": "x", "b": "y"}}`.
//!
//! Values land in [`serde_json::Value`] so nested results compose with
//! the rest of the crate's state handling.

use serde_json::{Map, Value};
use std::collections::VecDeque;

use crate::error::RouterError;

/// Parse a query string into a nested mapping.
///
/// Pairs are split on `&`, percent- and `+`-decoded, then split on the
/// first `=` that is not inside a bracket pair. Repeating a scalar key
/// collects the values into a sequence.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
///
/// let q = waypoint::query::parse("user[name]=tj&tags[]=a&tags[]=b");
/// assert_eq!(q.get("user"), Some(&json!({"name": "tj"})));
/// assert_eq!(q.get("tags"), Some(&json!(["a", "b"])));
/// ```
pub fn parse(input: &str) -> Map<String, Value> {
    let mut root = Value::Object(Map::new());
    if input.is_empty() {
        return Map::new();
    }
    for pair in input.split('&') {
        let decoded = decode_pair(pair);
        let eql = decoded.find('=');
        let brace = last_brace_in_key(&decoded);
        let cut = match brace {
            Some(i) if i > 0 => Some(i),
            _ => eql,
        };
        let (mut key, mut val) = match cut {
            Some(c) => {
                let rest = &decoded[c..];
                let value = match rest.find('=') {
                    Some(j) => &rest[j + 1..],
                    None => rest,
                };
                (decoded[..c].to_string(), value.to_string())
            }
            None => (String::new(), String::new()),
        };
        // `?foo` style bare flag
        if key.is_empty() {
            key = decoded;
            val = String::new();
        }
        merge(&mut root, &key, Value::String(val));
    }
    match root {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Re-merge a flat mapping whose keys may carry bracket paths.
///
/// The object-input form of [`parse`]: `{"a[b]": 1}` becomes
/// `{"a": {"b": 1}}`. Values pass through untouched.
pub fn parse_pairs(pairs: &Map<String, Value>) -> Map<String, Value> {
    let mut root = Value::Object(Map::new());
    for (name, value) in pairs {
        merge(&mut root, name, value.clone());
    }
    match root {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Serialize a nested mapping back into a query string.
///
/// The structural inverse of [`parse`]: nested mappings and sequences
/// recurse with bracket-suffixed prefixes. Fails with
/// [`RouterError::InvalidArgument`] when handed a bare scalar, which has
/// no key to serialize under.
pub fn stringify(value: &Value) -> Result<String, RouterError> {
    stringify_prefixed(value, None)
}

fn stringify_prefixed(value: &Value, prefix: Option<&str>) -> Result<String, RouterError> {
    match value {
        Value::Object(map) => {
            let mut parts = Vec::with_capacity(map.len());
            for (key, child) in map {
                let child_prefix = match prefix {
                    Some(p) => format!("{}[{}]", p, urlencoding::encode(key)),
                    None => urlencoding::encode(key).into_owned(),
                };
                parts.push(stringify_prefixed(child, Some(&child_prefix))?);
            }
            Ok(parts.join("&"))
        }
        Value::Array(items) => {
            let p = require_prefix(prefix)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                parts.push(stringify_prefixed(item, Some(&format!("{}[{}]", p, i)))?);
            }
            Ok(parts.join("&"))
        }
        Value::String(s) => {
            let p = require_prefix(prefix)?;
            Ok(format!("{}={}", p, urlencoding::encode(s)))
        }
        other => {
            let p = require_prefix(prefix)?;
            Ok(format!("{}={}", p, other))
        }
    }
}

fn require_prefix(prefix: Option<&str>) -> Result<&str, RouterError> {
    prefix.ok_or_else(|| RouterError::InvalidArgument("stringify expects a mapping".to_string()))
}

/// Decode one `&`-delimited pair, accommodating both percent encoding
/// and `+` form encoding. Malformed escapes leave the pair untouched.
fn decode_pair(pair: &str) -> String {
    let spaced = pair.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Locate the first `=` that sits outside any bracket pair.
fn last_brace_in_key(s: &str) -> Option<usize> {
    let mut in_brace = false;
    for (i, c) in s.char_indices() {
        match c {
            ']' => in_brace = false,
            '[' => in_brace = true,
            '=' if !in_brace => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_int(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn merge(root: &mut Value, key: &str, val: Value) {
    if key.is_empty() {
        return;
    }
    if key.contains(']') {
        let mut parts: VecDeque<&str> = key.split('[').collect();
        parse_path(&mut parts, root, val);
    } else if let Value::Object(map) = root {
        match map.get_mut(key) {
            None => {
                map.insert(key.to_string(), val);
            }
            Some(Value::Array(items)) => items.push(val),
            Some(existing) => {
                let old = existing.take();
                *existing = Value::Array(vec![old, val]);
            }
        }
    }
}

fn parse_path(parts: &mut VecDeque<&str>, root: &mut Value, val: Value) {
    // The first piece of the bracket path is the top-level key; the root
    // itself is always a mapping, so it never needs promotion.
    match parts.pop_front() {
        None | Some("") => assign_leaf_in_place(root, val),
        Some("]") => append_item_in_place(root, val),
        Some(part) => {
            let sub = part.strip_suffix(']').unwrap_or(part);
            descend(parts, root, sub, val);
        }
    }
}

/// One step of the bracket-path walk: resolve `key` under `parent`,
/// then either assign, append, or keep walking.
fn descend(parts: &mut VecDeque<&str>, parent: &mut Value, key: &str, val: Value) {
    let Some(slot) = child_slot(parent, key) else {
        return;
    };
    match parts.pop_front() {
        None | Some("") => assign_leaf_in_place(slot, val),
        Some("]") => append_item_in_place(slot, val),
        Some(part) => {
            let sub = part.strip_suffix(']').unwrap_or(part);
            ensure_container(slot);
            if !is_int(sub) && slot.is_array() {
                promote(slot);
            }
            descend(parts, slot, sub, val);
        }
    }
}

/// Resolve the mutable slot for `key`, creating it when absent.
/// Returns `None` when a scalar already claimed the spot; the nested
/// assignment is dropped in that case.
fn child_slot<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match parent {
        Value::Object(map) => Some(map.entry(key.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let idx: usize = match key.parse() {
                Ok(i) => i,
                Err(_) => {
                    // Promotion keeps non-integer keys away from
                    // sequences; a stray one appends.
                    items.push(Value::Null);
                    items.len() - 1
                }
            };
            while items.len() <= idx {
                items.push(Value::Null);
            }
            Some(&mut items[idx])
        }
        _ => None,
    }
}

fn ensure_container(slot: &mut Value) {
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
}

fn assign_leaf_in_place(slot: &mut Value, val: Value) {
    match slot {
        Value::Null => *slot = val,
        Value::Array(items) => items.push(val),
        Value::Object(_) => *slot = val,
        existing => {
            let old = existing.take();
            *existing = Value::Array(vec![old, val]);
        }
    }
}

fn append_item_in_place(slot: &mut Value, val: Value) {
    ensure_container(slot);
    match slot {
        Value::Array(items) => {
            if val != Value::String(String::new()) {
                items.push(val);
            }
        }
        Value::Object(map) => {
            map.insert(map.len().to_string(), val);
        }
        existing => {
            let old = existing.take();
            *existing = Value::Array(vec![old, val]);
        }
    }
}

/// Promote a sequence to a mapping: contents move to index keys. The
/// disambiguation policy for `a[]=x&a[b]=y`.
fn promote(slot: &mut Value) {
    if let Value::Array(items) = slot {
        let drained = std::mem::take(items);
        let mut map = Map::new();
        for (i, item) in drained.into_iter().enumerate() {
            map.insert(i.to_string(), item);
        }
        *slot = Value::Object(map);
    }
}
