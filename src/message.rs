//! Message envelope and delta types (C1)
//!
//! An [`Envelope`] is the record that crosses the wire to the client: a
//! semantic `type`, a rendering `props` payload, and the set of identifiers
//! and delta fields described in spec §3. Delta application (the shared
//! reconstruction rule used by both the output writer's client-side
//! contract and the chat buffer's durable mirror) lives here so both
//! collaborators apply exactly the same semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Incremental mutation kind for a streaming message delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    /// Concatenate a string onto the existing string at `delta_path`.
    Append,
    /// Substitute the whole message content.
    Replace,
    /// Shallow-merge keys into the target object at `delta_path`.
    Merge,
    /// Create or overwrite exactly `delta_path`.
    Set,
}

/// A message envelope: the wire-format record described in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: Value,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub delta: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_action: Option<DeltaAction>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Default JSON-pointer-like dotted path used by delta ops that don't
/// specify one explicitly. Rooted at the envelope the client reconstructs
/// against, not at the `props` payload alone.
pub const DEFAULT_DELTA_PATH: &str = "props.content";

/// Re-root an envelope-relative delta path (e.g. `"props.content"`) onto the
/// `props` payload itself. The writer and chat buffer only ever hold the
/// `props` value, not the whole envelope, so a path meant for the client's
/// copy needs its leading `props` segment stripped before it's applied or
/// read locally. Paths that don't start with `props` pass through
/// unchanged, since they're already relative to whatever was handed in.
pub fn strip_props_prefix(path: &str) -> &str {
    path.strip_prefix("props.")
        .or_else(|| if path == "props" { Some("") } else { None })
        .unwrap_or(path)
}

impl Envelope {
    /// Build a fresh, non-delta envelope. `message_id` must already have
    /// been allocated by the caller (writer owns id allocation).
    pub fn new(kind: impl Into<String>, props: Value, message_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props,
            message_id: message_id.into(),
            block_id: None,
            thread_id: None,
            chunk_id: None,
            delta: false,
            delta_path: None,
            delta_action: None,
            metadata: Value::Null,
        }
    }

    /// Build a delta chunk envelope inheriting `block_id`/`thread_id` from
    /// the originating message unless explicitly overridden by the caller.
    pub fn delta_chunk(
        message_id: impl Into<String>,
        chunk_id: impl Into<String>,
        action: DeltaAction,
        path: impl Into<String>,
        value: Value,
        block_id: Option<String>,
        thread_id: Option<String>,
    ) -> Self {
        Self {
            kind: "delta".to_string(),
            props: value,
            message_id: message_id.into(),
            block_id,
            thread_id,
            chunk_id: Some(chunk_id.into()),
            delta: true,
            delta_path: Some(path.into()),
            delta_action: Some(action),
            metadata: Value::Null,
        }
    }

    pub fn is_event(&self) -> bool {
        self.kind == "event"
    }
}

/// Set the value at a dotted path (e.g. `props.content`) inside a JSON
/// object, creating intermediate objects as needed. `append`, `merge`,
/// `replace`, and `set` all route through here with different combine
/// rules, matching the reconstruction contract in spec §4.1.
pub fn apply_delta(target: &mut Value, path: &str, action: DeltaAction, value: &Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    apply_at(target, &segments, action, value);
}

fn apply_at(target: &mut Value, segments: &[&str], action: DeltaAction, value: &Value) {
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Some((head, rest)) = segments.split_first() else {
        combine(target, action, value);
        return;
    };
    if rest.is_empty() {
        let map = target.as_object_mut().expect("ensured object above");
        let slot = map.entry((*head).to_string()).or_insert(Value::Null);
        combine(slot, action, value);
    } else {
        let map = target.as_object_mut().expect("ensured object above");
        let slot = map
            .entry((*head).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        apply_at(slot, rest, action, value);
    }
}

fn combine(slot: &mut Value, action: DeltaAction, value: &Value) {
    match action {
        DeltaAction::Append => {
            let existing = slot.as_str().unwrap_or("").to_string();
            let addition = value.as_str().unwrap_or_default();
            *slot = Value::String(existing + addition);
        }
        DeltaAction::Set | DeltaAction::Replace => {
            *slot = value.clone();
        }
        DeltaAction::Merge => {
            if !slot.is_object() {
                *slot = Value::Object(serde_json::Map::new());
            }
            if let (Some(target_map), Some(src_map)) = (slot.as_object_mut(), value.as_object()) {
                for (k, v) in src_map {
                    target_map.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

/// Read the value at a dotted path, if present.
pub fn read_path<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = target;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        cur = cur.get(segment)?;
    }
    Some(cur)
}

/// Canonical JSON serialization: object keys sorted recursively. Used by
/// the chat-id continuation hash (spec §4.6) so that field ordering in a
/// client's request body cannot perturb the content hash.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
