//! Chat buffer (C3)
//!
//! In-memory mirror of everything the writer emits that is *durable*
//! (i.e. not `event`-typed), plus a parallel log of resume steps. All
//! mutations are mutex-guarded. Message ids are supplied by the writer
//! and reused here verbatim; the buffer never allocates its own message
//! ids except when a caller asks for one directly through the writer.

use crate::error::{Error, Result};
use crate::message::{
    apply_delta, read_path, strip_props_prefix, DeltaAction, Envelope, DEFAULT_DELTA_PATH,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Who produced a buffered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Assistant-message production mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Chat,
    Task,
}

/// One durable record in the chat buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub seq: u64,
    pub message_id: String,
    pub block_id: Option<String>,
    pub thread_id: Option<String>,
    pub kind: String,
    pub role: Role,
    pub connector: Option<String>,
    pub mode: Option<Mode>,
    pub props: Value,
    pub streaming: bool,
    pub final_: bool,
}

/// One execution stage, per spec §3 "Resume step".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Input,
    HookCreate,
    Llm,
    Tool,
    HookNext,
    Delegate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeStep {
    pub seq: u64,
    pub step_type: StepType,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub space_snapshot: Value,
    pub stack_id: Option<String>,
}

struct StreamingEntry {
    index: usize,
}

struct BufferInner {
    messages: Vec<BufferedMessage>,
    streaming: HashMap<String, StreamingEntry>,
    steps: Vec<ResumeStep>,
    current_step: Option<usize>,
    message_seq: u64,
    step_seq: u64,
}

/// Append-only, mutex-guarded accumulation of messages and resume steps
/// for one Context.
pub struct ChatBuffer {
    inner: Mutex<BufferInner>,
}

impl Default for ChatBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                messages: Vec::new(),
                streaming: HashMap::new(),
                steps: Vec::new(),
                current_step: None,
                message_seq: 0,
                step_seq: 0,
            }),
        }
    }

    fn next_message_seq(guard: &mut BufferInner) -> u64 {
        guard.message_seq += 1;
        guard.message_seq
    }

    /// Record a message that was sent user-side (role `user`). The only
    /// producer of role `user` records, per spec §3.
    pub async fn record_user_input(&self, message_id: impl Into<String>, content: Value) -> u64 {
        let mut guard = self.inner.lock().await;
        let seq = Self::next_message_seq(&mut guard);
        guard.messages.push(BufferedMessage {
            seq,
            message_id: message_id.into(),
            block_id: None,
            thread_id: None,
            kind: "text".to_string(),
            role: Role::User,
            connector: None,
            mode: None,
            props: content,
            streaming: false,
            final_: true,
        });
        seq
    }

    /// Mirror a complete (non-streaming) assistant envelope into the buffer.
    pub async fn record_complete(&self, envelope: &Envelope) -> u64 {
        if envelope.is_event() {
            return 0;
        }
        let mut guard = self.inner.lock().await;
        let seq = Self::next_message_seq(&mut guard);
        guard.messages.push(BufferedMessage {
            seq,
            message_id: envelope.message_id.clone(),
            block_id: envelope.block_id.clone(),
            thread_id: envelope.thread_id.clone(),
            kind: envelope.kind.clone(),
            role: Role::Assistant,
            connector: None,
            mode: Some(Mode::Chat),
            props: envelope.props.clone(),
            streaming: false,
            final_: true,
        });
        seq
    }

    /// Install streaming state for a message started via `SendStream`.
    pub async fn begin_streaming(&self, envelope: &Envelope) -> u64 {
        let mut guard = self.inner.lock().await;
        let seq = Self::next_message_seq(&mut guard);
        let index = guard.messages.len();
        guard.messages.push(BufferedMessage {
            seq,
            message_id: envelope.message_id.clone(),
            block_id: envelope.block_id.clone(),
            thread_id: envelope.thread_id.clone(),
            kind: envelope.kind.clone(),
            role: Role::Assistant,
            connector: None,
            mode: Some(Mode::Chat),
            props: envelope.props.clone(),
            streaming: true,
            final_: false,
        });
        guard.streaming.insert(envelope.message_id.clone(), StreamingEntry { index });
        seq
    }

    /// Returns `(block_id, thread_id)` inherited from a streaming message,
    /// or `None` if `id` is not currently streaming (including unknown or
    /// already-final ids).
    pub async fn streaming_affinity(&self, id: &str) -> Option<(Option<String>, Option<String>)> {
        let guard = self.inner.lock().await;
        let entry = guard.streaming.get(id)?;
        let msg = &guard.messages[entry.index];
        Some((msg.block_id.clone(), msg.thread_id.clone()))
    }

    /// Apply the same delta reconstruction rule the client uses, to the
    /// buffer's own copy, so buffer and client never diverge. `path` is
    /// relative to the stored `props` payload (e.g. `"content"`), not the
    /// envelope-rooted path the client receives over the wire — callers
    /// holding an envelope-relative path must re-root it first with
    /// [`crate::message::strip_props_prefix`].
    pub async fn apply_delta(
        &self,
        id: &str,
        path: &str,
        action: DeltaAction,
        value: &Value,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let index = guard
            .streaming
            .get(id)
            .map(|e| e.index)
            .ok_or_else(|| Error::precondition(format!("message {id} is not streaming")))?;
        let msg = &mut guard.messages[index];
        apply_delta(&mut msg.props, path, action, value);
        Ok(())
    }

    /// Flip a streaming message to final and return its accumulated
    /// content at the default delta path, for inclusion in `message_end`.
    pub async fn complete_streaming(&self, id: &str) -> Result<Value> {
        let mut guard = self.inner.lock().await;
        let index = guard
            .streaming
            .remove(id)
            .map(|e| e.index)
            .ok_or_else(|| Error::precondition(format!("message {id} is not streaming")))?;
        let msg = &mut guard.messages[index];
        msg.streaming = false;
        msg.final_ = true;
        Ok(read_path(&msg.props, strip_props_prefix(DEFAULT_DELTA_PATH))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Snapshot of every non-event message recorded so far, in sequence
    /// order. Handed to external persistence at request end.
    pub async fn messages(&self) -> Vec<BufferedMessage> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    // --- Resume steps ---------------------------------------------------

    /// Begin a new resume step. A Context has at most one running step at
    /// a time; beginning a new one does not implicitly fail a prior
    /// running step (callers are expected to complete/fail before
    /// beginning the next).
    pub async fn begin_step(
        &self,
        step_type: StepType,
        input: Value,
        stack_id: Option<String>,
        space_snapshot: Value,
    ) -> u64 {
        let mut guard = self.inner.lock().await;
        guard.step_seq += 1;
        let seq = guard.step_seq;
        let index = guard.steps.len();
        guard.steps.push(ResumeStep {
            seq,
            step_type,
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            space_snapshot,
            stack_id,
        });
        guard.current_step = Some(index);
        seq
    }

    /// Complete the currently running step with `output`.
    pub async fn complete_step(&self, output: Value) {
        let mut guard = self.inner.lock().await;
        if let Some(index) = guard.current_step.take() {
            guard.steps[index].status = StepStatus::Completed;
            guard.steps[index].output = Some(output);
        }
    }

    /// Fail the currently running step. Idempotent: a no-op if there is no
    /// running step (already completed/failed).
    pub async fn fail_current_step(&self, status: StepStatus, err: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        if let Some(index) = guard.current_step.take() {
            guard.steps[index].status = status;
            guard.steps[index].error = Some(err.into());
        }
    }

    /// Per spec §4.2: empty when `final_status == "completed"`, otherwise
    /// the full step list with any still-running step flipped to the
    /// requested failure status.
    pub async fn steps_for_resume(&self, final_status: &str) -> Vec<ResumeStep> {
        if final_status == "completed" {
            return Vec::new();
        }
        let status = match final_status {
            "timeout" => StepStatus::Timeout,
            "interrupted" => StepStatus::Interrupted,
            _ => StepStatus::Failed,
        };
        let mut guard = self.inner.lock().await;
        if let Some(index) = guard.current_step {
            guard.steps[index].status = status;
        }
        guard.steps.clone()
    }
}
