//! Trace recorder (C6)
//!
//! A developer/user-visible tree of execution events parallel to the
//! stack tree (C5), grouped into named "visual spaces" (e.g. a
//! reasoning lane vs a tool-call lane) for presentation. Unlike the
//! stack tree, trace nodes do not gate control flow; they are a pure
//! record, so there is no "current" pointer or `done_fn` — callers hold
//! the trace id returned by `start` and pass it back to `complete`/`fail`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    User,
    Dev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TraceNode {
    pub id: String,
    pub stack_id: Option<String>,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub visibility: Visibility,
    pub space: String,
    pub label: String,
    pub data: serde_json::Value,
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Append-only registry of trace nodes for one Context. Shared with
/// fan-out sub-Contexts (unlike the output writer, the trace recorder is
/// not suppressed — spec §4.4 "suppresses C2" but reuses C3 and C6).
pub struct TraceRecorder {
    nodes: DashMap<String, TraceNode>,
    counter: AtomicU64,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self { nodes: DashMap::new(), counter: AtomicU64::new(0) }
    }

    fn next_id(&self) -> String {
        format!("X{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Start a new trace node under `parent_id` (if any), tagged with the
    /// stack node it occurred in and the visual space it belongs to.
    pub fn start(
        &self,
        stack_id: Option<String>,
        parent_id: Option<&str>,
        visibility: Visibility,
        space: impl Into<String>,
        label: impl Into<String>,
        data: serde_json::Value,
    ) -> String {
        let id = self.next_id();
        let depth = parent_id
            .and_then(|p| self.nodes.get(p).map(|n| n.depth + 1))
            .unwrap_or(0);
        self.nodes.insert(
            id.clone(),
            TraceNode {
                id: id.clone(),
                stack_id,
                parent_id: parent_id.map(str::to_string),
                depth,
                visibility,
                space: space.into(),
                label: label.into(),
                data,
                status: TraceStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                error: None,
            },
        );
        id
    }

    pub fn complete(&self, id: &str, data: Option<serde_json::Value>) {
        if let Some(mut node) = self.nodes.get_mut(id) {
            if node.status == TraceStatus::Running {
                node.status = TraceStatus::Completed;
                node.completed_at = Some(Utc::now());
                node.duration_ms = Some((Utc::now() - node.started_at).num_milliseconds().max(0));
                if let Some(data) = data {
                    node.data = data;
                }
            }
        }
    }

    pub fn fail(&self, id: &str, err: impl Into<String>) {
        if let Some(mut node) = self.nodes.get_mut(id) {
            if node.status == TraceStatus::Running {
                node.status = TraceStatus::Failed;
                node.completed_at = Some(Utc::now());
                node.duration_ms = Some((Utc::now() - node.started_at).num_milliseconds().max(0));
                node.error = Some(err.into());
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<TraceNode> {
        self.nodes.get(id).map(|e| e.clone())
    }

    /// All nodes belonging to one visual space, in insertion order (by id).
    pub fn nodes_in_space(&self, space: &str) -> Vec<TraceNode> {
        let mut out: Vec<TraceNode> = self
            .nodes
            .iter()
            .filter(|e| e.value().space == space)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Nodes visible at a given audience level; `Visibility::User` filters
    /// out dev-only nodes, `Visibility::Dev` returns everything.
    pub fn visible(&self, audience: Visibility) -> Vec<TraceNode> {
        let mut out: Vec<TraceNode> = self
            .nodes
            .iter()
            .filter(|e| audience == Visibility::Dev || e.value().visibility == Visibility::User)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub type SharedTraceRecorder = Arc<TraceRecorder>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_without_parent_is_root_depth_zero() {
        let tracer = TraceRecorder::new();
        let id = tracer.start(None, None, Visibility::User, "reasoning", "think", json!({}));
        assert_eq!(tracer.get(&id).unwrap().depth, 0);
    }

    #[test]
    fn child_depth_increments_from_parent() {
        let tracer = TraceRecorder::new();
        let root = tracer.start(None, None, Visibility::Dev, "tool", "call", json!({}));
        let child = tracer.start(None, Some(&root), Visibility::Dev, "tool", "subcall", json!({}));
        assert_eq!(tracer.get(&child).unwrap().depth, 1);
    }

    #[test]
    fn complete_sets_status_and_is_idempotent() {
        let tracer = TraceRecorder::new();
        let id = tracer.start(None, None, Visibility::User, "output", "emit", json!({}));
        tracer.complete(&id, Some(json!({"done": true})));
        tracer.fail(&id, "too late"); // must not override completed
        let node = tracer.get(&id).unwrap();
        assert_eq!(node.status, TraceStatus::Completed);
        assert_eq!(node.data, json!({"done": true}));
    }

    #[test]
    fn visible_user_filters_dev_only_nodes() {
        let tracer = TraceRecorder::new();
        tracer.start(None, None, Visibility::User, "output", "a", json!({}));
        tracer.start(None, None, Visibility::Dev, "internal", "b", json!({}));
        assert_eq!(tracer.visible(Visibility::User).len(), 1);
        assert_eq!(tracer.visible(Visibility::Dev).len(), 2);
    }

    #[test]
    fn nodes_in_space_groups_by_tag() {
        let tracer = TraceRecorder::new();
        tracer.start(None, None, Visibility::Dev, "tool", "a", json!({}));
        tracer.start(None, None, Visibility::Dev, "reasoning", "b", json!({}));
        tracer.start(None, None, Visibility::Dev, "tool", "c", json!({}));
        assert_eq!(tracer.nodes_in_space("tool").len(), 2);
    }
}
