//! Memory namespaces (C4)
//!
//! Four logical key/value spaces — `user`, `team`, `chat`, `context` —
//! each exposing the same uniform operation set: scalar get/set with
//! optional TTL, exact/wildcard delete, has, get-and-delete, keys,
//! length, clear, atomic counters, list push/pop/pull, a unique-value
//! set, and indexed-array accessors. `user`/`team`/`chat` are durable
//! for the lifetime of the process; `context` is cleared when its
//! owning Context releases (spec §4.5).
//!
//! Backed by `DashMap` so namespace access never contends on a single
//! crate-wide lock (spec §5 "Shared-resource policy").

use crate::error::{Error, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Stored {
    Scalar(Value),
    List(Vec<Value>),
    Set(Vec<Value>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn scalar(value: Value, ttl: Option<u64>) -> Self {
        Self {
            value: Stored::Scalar(value),
            expires_at: ttl.map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if Instant::now() >= at)
    }
}

/// One scoped key/value space.
#[derive(Debug, Default)]
pub struct Namespace {
    store: DashMap<String, Entry>,
}

impl Namespace {
    pub fn new() -> Self {
        Self { store: DashMap::new() }
    }

    /// Lazily evict `key` if its TTL has elapsed; returns `true` if it
    /// was evicted (or already absent).
    fn evict_if_expired(&self, key: &str) -> bool {
        let expired = self.store.get(key).is_some_and(|e| e.is_expired());
        if expired {
            self.store.remove(key);
        }
        expired
    }

    pub fn set(&self, key: impl Into<String>, value: Value, ttl_secs: Option<u64>) {
        self.store.insert(key.into(), Entry::scalar(value, ttl_secs));
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.evict_if_expired(key);
        self.store.get(key).and_then(|e| match &e.value {
            Stored::Scalar(v) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.evict_if_expired(key);
        self.store.contains_key(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    /// Remove every key matching `prefix:*`; `prefix` excludes the `*`.
    pub fn delete_wildcard(&self, prefix: &str) -> usize {
        let to_remove: Vec<String> = self
            .store
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        let count = to_remove.len();
        for key in to_remove {
            self.store.remove(&key);
        }
        count
    }

    pub fn get_and_delete(&self, key: &str) -> Option<Value> {
        self.evict_if_expired(key);
        self.store.remove(key).and_then(|(_, e)| match e.value {
            Stored::Scalar(v) => Some(v),
            _ => None,
        })
    }

    pub fn keys(&self) -> Vec<String> {
        let all: Vec<String> = self.store.iter().map(|e| e.key().clone()).collect();
        all.into_iter().filter(|k| !self.evict_if_expired(k)).collect()
    }

    pub fn length(&self) -> usize {
        self.keys().len()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Atomically add `delta` (negative for decrement) to a numeric key,
    /// creating it at 0 first if absent.
    pub fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.evict_if_expired(key);
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Entry::scalar(Value::from(0i64), None));
        let current = match &entry.value {
            Stored::Scalar(v) => v.as_i64().ok_or_else(|| {
                Error::precondition(format!("key {key} does not hold a counter"))
            })?,
            _ => return Err(Error::precondition(format!("key {key} is not a scalar"))),
        };
        let next = current + delta;
        entry.value = Stored::Scalar(Value::from(next));
        Ok(next)
    }

    // --- Lists -----------------------------------------------------------

    pub fn list_push(&self, key: &str, value: Value) {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: Stored::List(Vec::new()), expires_at: None });
        match &mut entry.value {
            Stored::List(list) => list.push(value),
            _ => entry.value = Stored::List(vec![value]),
        }
    }

    pub fn list_pop(&self, key: &str) -> Option<Value> {
        let mut entry = self.store.get_mut(key)?;
        match &mut entry.value {
            Stored::List(list) => list.pop(),
            _ => None,
        }
    }

    /// Remove and return the first `n` elements (FIFO pull).
    pub fn list_pull(&self, key: &str, count: usize) -> Vec<Value> {
        let Some(mut entry) = self.store.get_mut(key) else {
            return Vec::new();
        };
        match &mut entry.value {
            Stored::List(list) => {
                let n = count.min(list.len());
                list.drain(0..n).collect()
            }
            _ => Vec::new(),
        }
    }

    // --- Unique sets -------------------------------------------------------

    pub fn set_add(&self, key: &str, value: Value) -> bool {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: Stored::Set(Vec::new()), expires_at: None });
        match &mut entry.value {
            Stored::Set(items) => {
                if items.contains(&value) {
                    false
                } else {
                    items.push(value);
                    true
                }
            }
            _ => {
                entry.value = Stored::Set(vec![value]);
                true
            }
        }
    }

    // --- Indexed arrays ----------------------------------------------------

    fn array_of(&self, key: &str) -> Vec<Value> {
        self.store
            .get(key)
            .map(|e| match &e.value {
                Stored::List(list) | Stored::Set(list) => list.clone(),
                Stored::Scalar(_) => Vec::new(),
            })
            .unwrap_or_default()
    }

    pub fn array_length(&self, key: &str) -> usize {
        self.array_of(key).len()
    }

    fn resolve_index(len: usize, index: i64) -> Option<usize> {
        if index >= 0 {
            let i = index as usize;
            (i < len).then_some(i)
        } else {
            let from_end = (-index) as usize;
            (from_end <= len).then(|| len - from_end)
        }
    }

    pub fn array_get(&self, key: &str, index: i64) -> Option<Value> {
        let arr = self.array_of(key);
        Self::resolve_index(arr.len(), index).map(|i| arr[i].clone())
    }

    pub fn array_set(&self, key: &str, index: i64, value: Value) -> Result<()> {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: Stored::List(Vec::new()), expires_at: None });
        let list = match &mut entry.value {
            Stored::List(list) | Stored::Set(list) => list,
            Stored::Scalar(_) => return Err(Error::precondition(format!("key {key} is not an array"))),
        };
        let Some(i) = Self::resolve_index(list.len(), index) else {
            return Err(Error::precondition(format!("index {index} out of range for key {key}")));
        };
        list[i] = value;
        Ok(())
    }

    pub fn array_slice(&self, key: &str, start: i64, end: i64) -> Vec<Value> {
        let arr = self.array_of(key);
        let len = arr.len();
        let Some(start) = Self::resolve_index(len, start) else { return Vec::new() };
        let end = if end < 0 {
            Self::resolve_index(len, end).map(|i| i + 1).unwrap_or(0)
        } else {
            (end as usize).min(len)
        };
        if start >= end {
            return Vec::new();
        }
        arr[start..end].to_vec()
    }

    /// 1-indexed paging: page 1 returns elements `0..size-1`.
    pub fn array_page(&self, key: &str, page: u64, size: u64) -> Vec<Value> {
        if page == 0 || size == 0 {
            return Vec::new();
        }
        let arr = self.array_of(key);
        let start = ((page - 1) * size) as usize;
        if start >= arr.len() {
            return Vec::new();
        }
        let end = (start + size as usize).min(arr.len());
        arr[start..end].to_vec()
    }

    pub fn array_all(&self, key: &str) -> Vec<Value> {
        self.array_of(key)
    }
}

/// The four scoped namespaces a Context carries. `user`/`team`/`chat` are
/// durable; `context` is cleared on `Context::release` (spec §4.5).
#[derive(Debug, Default)]
pub struct MemoryNamespaces {
    pub user: Namespace,
    pub team: Namespace,
    pub chat: Namespace,
    pub context: Namespace,
}

impl MemoryNamespaces {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_roundtrip() {
        let ns = Namespace::new();
        ns.set("k", json!(42), None);
        assert_eq!(ns.get("k"), Some(json!(42)));
        assert!(ns.has("k"));
    }

    #[test]
    fn ttl_expiry_evicts_on_read() {
        let ns = Namespace::new();
        ns.store.insert(
            "k".to_string(),
            Entry { value: Stored::Scalar(json!(1)), expires_at: Some(Instant::now() - Duration::from_secs(1)) },
        );
        assert_eq!(ns.get("k"), None);
        assert!(!ns.has("k"));
    }

    #[test]
    fn wildcard_delete_removes_matching_prefix() {
        let ns = Namespace::new();
        ns.set("session:1", json!(1), None);
        ns.set("session:2", json!(2), None);
        ns.set("other", json!(3), None);
        let removed = ns.delete_wildcard("session:");
        assert_eq!(removed, 2);
        assert!(ns.has("other"));
        assert!(!ns.has("session:1"));
    }

    #[test]
    fn get_and_delete_removes_key() {
        let ns = Namespace::new();
        ns.set("k", json!("v"), None);
        assert_eq!(ns.get_and_delete("k"), Some(json!("v")));
        assert!(!ns.has("k"));
    }

    #[test]
    fn incr_and_decr_are_atomic_over_existing_counter() {
        let ns = Namespace::new();
        assert_eq!(ns.incr("c", 5).unwrap(), 5);
        assert_eq!(ns.incr("c", -2).unwrap(), 3);
    }

    #[test]
    fn list_push_pop_and_pull() {
        let ns = Namespace::new();
        ns.list_push("l", json!(1));
        ns.list_push("l", json!(2));
        ns.list_push("l", json!(3));
        assert_eq!(ns.list_pop("l"), Some(json!(3)));
        assert_eq!(ns.list_pull("l", 1), vec![json!(1)]);
        assert_eq!(ns.array_all("l"), vec![json!(2)]);
    }

    #[test]
    fn unique_set_rejects_duplicates() {
        let ns = Namespace::new();
        assert!(ns.set_add("s", json!("a")));
        assert!(!ns.set_add("s", json!("a")));
        assert!(ns.set_add("s", json!("b")));
        assert_eq!(ns.array_length("s"), 2);
    }

    #[test]
    fn array_get_supports_negative_indices() {
        let ns = Namespace::new();
        ns.list_push("a", json!(10));
        ns.list_push("a", json!(20));
        ns.list_push("a", json!(30));
        assert_eq!(ns.array_get("a", -1), Some(json!(30)));
        assert_eq!(ns.array_get("a", 0), Some(json!(10)));
        assert_eq!(ns.array_get("a", -4), None);
    }

    #[test]
    fn array_set_by_negative_index() {
        let ns = Namespace::new();
        ns.list_push("a", json!(1));
        ns.list_push("a", json!(2));
        ns.array_set("a", -1, json!(99)).unwrap();
        assert_eq!(ns.array_all("a"), vec![json!(1), json!(99)]);
    }

    #[test]
    fn array_page_is_one_indexed() {
        let ns = Namespace::new();
        for i in 0..5 {
            ns.list_push("a", json!(i));
        }
        assert_eq!(ns.array_page("a", 1, 2), vec![json!(0), json!(1)]);
        assert_eq!(ns.array_page("a", 2, 2), vec![json!(2), json!(3)]);
        assert_eq!(ns.array_page("a", 3, 2), vec![json!(4)]);
        assert_eq!(ns.array_page("a", 4, 2), Vec::<Value>::new());
    }

    #[test]
    fn array_slice_handles_negative_end() {
        let ns = Namespace::new();
        for i in 0..5 {
            ns.list_push("a", json!(i));
        }
        assert_eq!(ns.array_slice("a", 1, -1), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn clear_empties_namespace() {
        let ns = Namespace::new();
        ns.set("a", json!(1), None);
        ns.set("b", json!(2), None);
        ns.clear();
        assert_eq!(ns.length(), 0);
    }

    #[test]
    fn namespaces_are_independent() {
        let spaces = MemoryNamespaces::new();
        spaces.user.set("k", json!(1), None);
        spaces.context.set("k", json!(2), None);
        assert_eq!(spaces.user.get("k"), Some(json!(1)));
        assert_eq!(spaces.context.get("k"), Some(json!(2)));
        spaces.context.clear();
        assert_eq!(spaces.context.get("k"), None);
        assert_eq!(spaces.user.get("k"), Some(json!(1)));
    }
}
