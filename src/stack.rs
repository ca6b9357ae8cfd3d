//! Stack manager (C5)
//!
//! Tracks the tree of nested agent invocations within one Context. Every
//! `EnterStack` call pushes a new current stack node (root or child) and
//! returns a `done_fn` closure that restores the caller's prior current
//! stack on exit, mirroring a call-stack discipline without an actual
//! native call stack (nested invocations may cross task boundaries).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// The request's originator channel, drawn from a closed set (spec
/// GLOSSARY "Referer").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Referer {
    Api,
    Agent,
    Process,
    Mcp,
    Tool,
}

impl Referer {
    pub fn as_str(self) -> &'static str {
        match self {
            Referer::Api => "api",
            Referer::Agent => "agent",
            Referer::Process => "process",
            Referer::Mcp => "mcp",
            Referer::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl Status {
    fn is_terminal(self) -> bool {
        !matches!(self, Status::Running)
    }
}

/// One node in the invocation tree.
#[derive(Debug, Clone)]
pub struct StackNode {
    pub id: String,
    pub trace_id: String,
    pub assistant_id: String,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub path: Vec<String>,
    pub referer: Referer,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl StackNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Extra, optional parameters for `EnterStack`.
#[derive(Debug, Clone, Default)]
pub struct EnterStackOpts {
    pub referer: Option<Referer>,
    pub trace_id: Option<String>,
}

struct Inner {
    current: Option<String>,
    counter: AtomicU64,
}

/// Owns the Context's entire stack tree: the flat, append-only registry
/// of every node ever created, and the single "current" pointer.
pub struct StackManager {
    nodes: DashMap<String, StackNode>,
    inner: Mutex<Inner>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl StackManager {
    pub fn new(cancelled: Arc<std::sync::atomic::AtomicBool>) -> Self {
        Self {
            nodes: DashMap::new(),
            inner: Mutex::new(Inner { current: None, counter: AtomicU64::new(0) }),
            cancelled,
        }
    }

    fn next_id(&self, guard: &Inner) -> String {
        let n = guard.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("S{n}")
    }

    pub fn current_id(&self) -> Option<String> {
        self.inner.lock().unwrap().current.clone()
    }

    pub fn get(&self, id: &str) -> Option<StackNode> {
        self.nodes.get(id).map(|e| e.clone())
    }

    /// Enter a new stack node. If there is no current stack, this becomes
    /// a root (new `trace_id` unless `opts.trace_id` supplies one to
    /// inherit); otherwise a child of the current stack. Returns the new
    /// node's id, its `trace_id`, and a `done_fn` that restores the prior
    /// current stack and marks this node terminal.
    pub fn enter_stack(
        &self,
        assistant_id: impl Into<String>,
        opts: EnterStackOpts,
    ) -> (StackNode, impl Fn() + '_) {
        let assistant_id = assistant_id.into();
        let mut guard = self.inner.lock().unwrap();
        let id = self.next_id(&guard);
        let prior_current = guard.current.clone();

        let node = match &prior_current {
            None => StackNode {
                id: id.clone(),
                trace_id: opts.trace_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                assistant_id,
                parent_id: None,
                depth: 0,
                path: vec![id.clone()],
                referer: opts.referer.unwrap_or(Referer::Api),
                status: Status::Running,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                error: None,
            },
            Some(parent_id) => {
                let parent = self.nodes.get(parent_id).expect("current stack must exist");
                let mut path = parent.path.clone();
                path.push(id.clone());
                StackNode {
                    id: id.clone(),
                    trace_id: parent.trace_id.clone(),
                    assistant_id,
                    parent_id: Some(parent_id.clone()),
                    depth: parent.depth + 1,
                    path,
                    referer: opts.referer.unwrap_or(parent.referer),
                    status: Status::Running,
                    started_at: Utc::now(),
                    completed_at: None,
                    duration_ms: None,
                    error: None,
                }
            }
        };

        self.nodes.insert(id.clone(), node.clone());
        guard.current = Some(id.clone());
        drop(guard);

        let done = {
            let id = id.clone();
            let prior = prior_current;
            move || self.finish(&id, Status::Completed, None, prior.clone())
        };
        (node, done)
    }

    fn finish(&self, id: &str, status: Status, error: Option<String>, restore_to: Option<String>) {
        if let Some(mut node) = self.nodes.get_mut(id) {
            if !node.status.is_terminal() {
                let effective = if self.cancelled.load(Ordering::SeqCst) && status == Status::Completed {
                    Status::Timeout
                } else {
                    status
                };
                node.status = effective;
                node.completed_at = Some(Utc::now());
                node.duration_ms = Some((Utc::now() - node.started_at).num_milliseconds().max(0));
                node.error = error;
            }
        }
        let mut guard = self.inner.lock().unwrap();
        if guard.current.as_deref() == Some(id) {
            guard.current = restore_to;
        }
    }

    /// Transition a specific stack node to `failed`, recording `err`.
    /// No-op if the node is already terminal.
    pub fn fail(&self, id: &str, err: impl Into<String>) {
        self.finish(id, Status::Failed, Some(err.into()), self.current_parent_of(id));
    }

    /// Transition a specific stack node to `timeout`. No-op if terminal.
    pub fn timeout(&self, id: &str) {
        self.finish(id, Status::Timeout, None, self.current_parent_of(id));
    }

    fn current_parent_of(&self, id: &str) -> Option<String> {
        self.nodes.get(id).and_then(|n| n.parent_id.clone())
    }

    /// Close every still-running stack, per `Context::release`: `timeout`
    /// if cancellation fired, else `completed`.
    pub fn close_all(&self) {
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        let running: Vec<String> = self
            .nodes
            .iter()
            .filter(|e| !e.value().status.is_terminal())
            .map(|e| e.key().clone())
            .collect();
        for id in running {
            let status = if cancelled { Status::Timeout } else { Status::Completed };
            self.finish(&id, status, None, None);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn manager() -> StackManager {
        StackManager::new(Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn root_stack_has_depth_zero_and_is_root() {
        let mgr = manager();
        let (node, _done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        assert_eq!(node.depth, 0);
        assert!(node.is_root());
        assert_eq!(node.path, vec![node.id.clone()]);
    }

    #[test]
    fn child_inherits_trace_id_and_extends_path() {
        let mgr = manager();
        let (root, _root_done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        let (child, _child_done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(child.path, vec![root.id.clone(), child.id.clone()]);
        assert_eq!(child.depth as usize, child.path.len() - 1);
    }

    #[test]
    fn done_fn_restores_prior_current_and_marks_completed() {
        let mgr = manager();
        let (root, root_done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        let (child, child_done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        assert_eq!(mgr.current_id().as_deref(), Some(child.id.as_str()));
        child_done();
        assert_eq!(mgr.current_id().as_deref(), Some(root.id.as_str()));
        assert_eq!(mgr.get(&child.id).unwrap().status, Status::Completed);
        root_done();
        assert_eq!(mgr.current_id(), None);
    }

    #[test]
    fn done_fn_is_idempotent() {
        let mgr = manager();
        let (root, done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        done();
        done();
        assert_eq!(mgr.get(&root.id).unwrap().status, Status::Completed);
    }

    #[test]
    fn fail_marks_terminal_and_is_immutable_afterward() {
        let mgr = manager();
        let (root, _done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        mgr.fail(&root.id, "boom");
        assert_eq!(mgr.get(&root.id).unwrap().status, Status::Failed);
        mgr.timeout(&root.id); // must not override a terminal status
        assert_eq!(mgr.get(&root.id).unwrap().status, Status::Failed);
    }

    #[test]
    fn close_all_marks_running_stacks_timeout_when_cancelled() {
        let mgr = StackManager::new(Arc::new(AtomicBool::new(true)));
        let (root, _done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        mgr.close_all();
        assert_eq!(mgr.get(&root.id).unwrap().status, Status::Timeout);
    }

    #[test]
    fn close_all_marks_running_stacks_completed_when_not_cancelled() {
        let mgr = manager();
        let (root, _done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
        mgr.close_all();
        assert_eq!(mgr.get(&root.id).unwrap().status, Status::Completed);
    }

    #[test]
    fn registry_is_append_only_across_many_enters() {
        let mgr = manager();
        for _ in 0..5 {
            let (_n, done) = mgr.enter_stack("asst-1", EnterStackOpts::default());
            done();
        }
        assert_eq!(mgr.len(), 5);
    }
}
