//! Output writer (C2)
//!
//! The writer is the single serialization point for a request's output
//! stream: every `Send`/`SendStream`/`Append`/`Replace`/`Merge`/`Set`/`End`/
//! `EndBlock` call funnels through one internal mutex so that envelopes
//! reach the transport in the exact order they were issued (spec §5
//! "Ordering guarantees"). It also mirrors every non-event envelope into
//! the chat buffer (C3), since the buffer never allocates its own message
//! ids — it reuses whatever the writer assigned.

use crate::buffer::ChatBuffer;
use crate::error::{Error, Result};
use crate::ids::IdAllocator;
use crate::message::{strip_props_prefix, DeltaAction, Envelope, DEFAULT_DELTA_PATH};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Output-envelope encoding selected by the request's negotiated `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    Standard,
    CuiWeb,
    CuiNative,
    CuiDesktop,
}

impl AcceptMode {
    /// Derive the accept mode from an explicit value, or, if absent, from
    /// the request's user-agent (spec §6).
    pub fn resolve(explicit: Option<&str>, user_agent: &str) -> Self {
        if let Some(value) = explicit {
            return match value {
                "cui-web" => AcceptMode::CuiWeb,
                "cui-native" => AcceptMode::CuiNative,
                "cui-desktop" => AcceptMode::CuiDesktop,
                _ => AcceptMode::Standard,
            };
        }
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("android") || ua.contains("iphone") || ua.contains("ipad") {
            AcceptMode::CuiNative
        } else if ua.contains("windows") || ua.contains("macintosh") || ua.contains("linux") {
            AcceptMode::CuiDesktop
        } else if ua.contains("mozilla") {
            AcceptMode::CuiWeb
        } else {
            AcceptMode::Standard
        }
    }

    fn is_cui(self) -> bool {
        !matches!(self, AcceptMode::Standard)
    }
}

/// Encode one envelope for the wire according to the accept mode.
pub fn encode(envelope: &Envelope, mode: AcceptMode) -> Result<String> {
    let body = serde_json::to_string(envelope)?;
    Ok(if mode.is_cui() {
        format!("data: {}\n\n", body)
    } else {
        format!("{}\n", body)
    })
}

/// Abstracts the underlying HTTP/SSE transport. The core never speaks raw
/// sockets; it hands already-encoded lines/events to a sink.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, encoded: &str) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

/// An [`OutputSink`] that drops everything. Used by fan-out sub-Contexts,
/// which suppress direct writes to the parent stream (spec §4.4), and by
/// tests that only care about the chat-buffer mirror.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn write(&self, _encoded: &str) -> Result<()> {
        Ok(())
    }
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// An [`OutputSink`] that buffers every encoded line into memory, handy for
/// tests asserting the literal stream contents.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub lines: Mutex<Vec<String>>,
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write(&self, encoded: &str) -> Result<()> {
        self.lines.lock().await.push(encoded.to_string());
        Ok(())
    }
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct BlockState {
    first_seen_at: chrono::DateTime<Utc>,
    message_count: u64,
    ended: bool,
}

struct WriterInner {
    blocks: HashMap<String, BlockState>,
    closed: bool,
}

/// The output writer. One instance per Context; shared with fan-out
/// sub-Contexts only through the `skip_output` flag, never through the
/// sink itself (sub-Contexts get their own writer wired to a [`NullSink`]
/// or with `skip_output` asserted).
pub struct OutputWriter {
    ids: Arc<IdAllocator>,
    sink: Arc<dyn OutputSink>,
    accept: AcceptMode,
    buffer: Arc<ChatBuffer>,
    skip_output: Arc<AtomicBool>,
    inner: Mutex<WriterInner>,
}

impl OutputWriter {
    pub fn new(sink: Arc<dyn OutputSink>, accept: AcceptMode, buffer: Arc<ChatBuffer>) -> Self {
        Self {
            ids: Arc::new(IdAllocator::new()),
            sink,
            accept,
            buffer,
            skip_output: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(WriterInner {
                blocks: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Construct a writer for a fan-out sub-Context: same id allocator
    /// namespace as the parent is NOT shared (sub-Contexts get their own),
    /// but output is suppressed from the start.
    pub fn new_suppressed(accept: AcceptMode, buffer: Arc<ChatBuffer>) -> Self {
        let writer = Self::new(Arc::new(NullSink), accept, buffer);
        writer.skip_output.store(true, Ordering::SeqCst);
        writer
    }

    pub fn id_allocator(&self) -> Arc<IdAllocator> {
        self.ids.clone()
    }

    pub fn skip_output_flag(&self) -> Arc<AtomicBool> {
        self.skip_output.clone()
    }

    pub fn message_id(&self) -> String {
        self.ids.next_message_id()
    }

    pub fn block_id(&self) -> String {
        self.ids.next_block_id()
    }

    pub fn thread_id(&self) -> String {
        self.ids.next_thread_id()
    }

    async fn emit(&self, envelope: &Envelope) -> Result<()> {
        if self.skip_output.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Err(Error::stream("writer is closed"));
        }
        let line = encode(envelope, self.accept)?;
        self.sink.write(&line).await?;
        self.sink.flush().await?;
        drop(guard);
        Ok(())
    }

    /// Emit a lifecycle envelope with a freshly allocated message id (used
    /// for block and stream bookends, which aren't tied to one message).
    async fn lifecycle_event(&self, event: &str, props: Value) -> Result<()> {
        self.lifecycle_event_for(event, self.ids.next_message_id(), props)
            .await
    }

    /// Emit a lifecycle envelope carrying `message_id` as its own id field
    /// (used for `message_start`/`message_end`, which reference an existing
    /// message rather than minting a new one — spec §8: "at most one
    /// message_start and at most one message_end with message_id = m").
    async fn lifecycle_event_for(
        &self,
        event: &str,
        message_id: impl Into<String>,
        mut props: Value,
    ) -> Result<()> {
        if let Value::Object(ref mut map) = props {
            map.insert("event".to_string(), json!(event));
        }
        let envelope = Envelope::new("event", props, message_id);
        self.emit(&envelope).await
    }

    /// Track block-lifecycle bookkeeping and emit `block_start` the first
    /// time a block id is observed. No-ops (without reviving) once a block
    /// has been ended.
    async fn touch_block(&self, block_id: &str) -> Result<()> {
        let should_start = {
            let mut guard = self.inner.lock().await;
            match guard.blocks.get_mut(block_id) {
                Some(state) => {
                    if !state.ended {
                        state.message_count += 1;
                    }
                    false
                }
                None => {
                    guard.blocks.insert(
                        block_id.to_string(),
                        BlockState {
                            first_seen_at: Utc::now(),
                            message_count: 1,
                            ended: false,
                        },
                    );
                    true
                }
            }
        };
        if should_start {
            self.lifecycle_event("block_start", json!({"block_id": block_id}))
                .await?;
        }
        Ok(())
    }

    /// Send a complete (non-streaming) message: `message_start`, the
    /// envelope, then `message_end`, atomically with respect to other
    /// writer calls.
    pub async fn send(&self, mut envelope: Envelope, block_id: Option<&str>) -> Result<String> {
        if envelope.block_id.is_none() {
            envelope.block_id = block_id.map(|s| s.to_string());
        }
        if envelope.message_id.is_empty() {
            envelope.message_id = self.ids.next_message_id();
        }
        let message_id = envelope.message_id.clone();

        if let Some(block_id) = envelope.block_id.clone() {
            self.touch_block(&block_id).await?;
        }

        self.lifecycle_event_for(
            "message_start",
            message_id.clone(),
            json!({"message_id": message_id}),
        )
        .await?;
        self.emit(&envelope).await?;
        if !envelope.is_event() {
            self.buffer.record_complete(&envelope).await;
        }
        self.lifecycle_event_for(
            "message_end",
            message_id.clone(),
            json!({"message_id": message_id, "extra": {"content": crate::message::read_path(&envelope.props, strip_props_prefix(DEFAULT_DELTA_PATH)).cloned().unwrap_or(Value::Null)}}),
        )
        .await?;
        Ok(message_id)
    }

    /// Start a streaming message: emits `message_start` and the initial
    /// envelope, but not `message_end`. Installs streaming state in the
    /// chat buffer.
    pub async fn send_stream(&self, mut envelope: Envelope, block_id: Option<&str>) -> Result<String> {
        if envelope.block_id.is_none() {
            envelope.block_id = block_id.map(|s| s.to_string());
        }
        if envelope.message_id.is_empty() {
            envelope.message_id = self.ids.next_message_id();
        }
        let message_id = envelope.message_id.clone();

        if let Some(block_id) = envelope.block_id.clone() {
            self.touch_block(&block_id).await?;
        }

        self.lifecycle_event_for(
            "message_start",
            message_id.clone(),
            json!({"message_id": message_id}),
        )
        .await?;
        self.emit(&envelope).await?;
        self.buffer.begin_streaming(&envelope).await;
        Ok(message_id)
    }

    /// Append a string delta to `path` (default `props.content`) of a
    /// streaming message.
    pub async fn append(&self, id: &str, content: &str, path: Option<&str>) -> Result<String> {
        self.delta(id, DeltaAction::Append, path, json!(content))
            .await
    }

    /// Wholesale-replace the client-visible content of a streaming message.
    pub async fn replace(&self, id: &str, value: Value, path: Option<&str>) -> Result<String> {
        self.delta(id, DeltaAction::Replace, path, value).await
    }

    /// Shallow-merge an object delta into `path`.
    pub async fn merge(&self, id: &str, value: Value, path: &str) -> Result<String> {
        if !value.is_object() {
            return Err(Error::precondition("Merge requires an object-typed delta"));
        }
        self.delta(id, DeltaAction::Merge, Some(path), value).await
    }

    /// Create or overwrite exactly `path`.
    pub async fn set(&self, id: &str, value: Value, path: &str) -> Result<String> {
        self.delta(id, DeltaAction::Set, Some(path), value).await
    }

    async fn delta(
        &self,
        id: &str,
        action: DeltaAction,
        path: Option<&str>,
        value: Value,
    ) -> Result<String> {
        let path = path.unwrap_or(DEFAULT_DELTA_PATH);
        let (block_id, thread_id) = self
            .buffer
            .streaming_affinity(id)
            .await
            .ok_or_else(|| Error::precondition(format!("message {id} is not streaming")))?;

        self.buffer
            .apply_delta(id, strip_props_prefix(path), action, &value)
            .await?;

        let chunk_id = self.ids.next_chunk_id();
        let envelope =
            Envelope::delta_chunk(id, chunk_id, action, path, value, block_id, thread_id);
        self.emit(&envelope).await?;
        Ok(id.to_string())
    }

    /// End a streaming message: optionally append a final `tail`, then
    /// emit `message_end` carrying the full accumulated content and mark
    /// the message final. No further delta operations are accepted.
    pub async fn end(&self, id: &str, tail: Option<&str>) -> Result<String> {
        if let Some(tail) = tail {
            self.append(id, tail, None).await?;
        }
        let content = self.buffer.complete_streaming(id).await?;
        self.lifecycle_event_for(
            "message_end",
            id.to_string(),
            json!({"message_id": id, "extra": {"content": content}}),
        )
        .await?;
        Ok(id.to_string())
    }

    /// End a block: emits `block_end` exactly once, with the accumulated
    /// message count and duration. Safe to call on an unknown block id
    /// (no-op) since a block observed only on a suppressed sub-Context may
    /// never have been seen by this writer.
    pub async fn end_block(&self, block_id: &str) -> Result<()> {
        let ended_now = {
            let mut guard = self.inner.lock().await;
            match guard.blocks.get_mut(block_id) {
                Some(state) if !state.ended => {
                    state.ended = true;
                    true
                }
                _ => false,
            }
        };
        if !ended_now {
            return Ok(());
        }
        let (message_count, duration_ms) = {
            let guard = self.inner.lock().await;
            let state = &guard.blocks[block_id];
            let duration = Utc::now() - state.first_seen_at;
            (state.message_count, duration.num_milliseconds().max(0))
        };
        self.lifecycle_event(
            "block_end",
            json!({
                "block_id": block_id,
                "timestamp": Utc::now().to_rfc3339(),
                "duration_ms": duration_ms,
                "message_count": message_count,
                "status": "completed",
            }),
        )
        .await
    }

    /// Emit `stream_start` / `stream_end` bookends for the whole request.
    pub async fn stream_start(&self) -> Result<()> {
        self.lifecycle_event("stream_start", json!({})).await
    }

    pub async fn stream_end(&self) -> Result<()> {
        self.lifecycle_event("stream_end", json!({})).await
    }

    /// Close the writer. Subsequent emits fail; already-buffered chat
    /// history is unaffected.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        guard.closed = true;
    }
}
