//! Context object (C7)
//!
//! Aggregates every per-request collaborator (writer, buffer, memory
//! namespaces, stack manager, trace recorder, request logger) behind one
//! handle, plus the identifiers and opaque `metadata`/`authorized`/`space`
//! maps a hook host reads and writes over the life of a request (spec
//! §4.5). A `Context` is created once per inbound request and consumed by
//! `release()` at its end.

use crate::buffer::ChatBuffer;
use crate::error::Result;
use crate::logger::{LogContext, RequestLogger};
use crate::memory::MemoryNamespaces;
use crate::stack::{EnterStackOpts, Referer, StackManager, StackNode};
use crate::trace::TraceRecorder;
use crate::writer::{AcceptMode, OutputSink, OutputWriter};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Who/what is making the request, resolved once at `Context::new` and
/// immutable thereafter.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub client_type: String,
    pub user_agent: String,
    pub ip: String,
}

/// The identifiers a Context carries for its whole lifetime (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct Identifiers {
    pub chat_id: String,
    pub assistant_id: String,
    pub locale: Option<String>,
    pub theme: Option<String>,
    pub accept: String,
    pub route: Option<String>,
    pub referer: String,
    pub client: ClientInfo,
}

/// Consumes a Context's finished chat buffer at `release()`. The core
/// never implements a persistence engine itself (spec §9.6) — a host
/// supplies whatever storage backs this trait (a database, a file, an
/// in-memory test double).
#[async_trait]
pub trait ChatPersistence: Send + Sync {
    async fn persist(&self, chat_id: &str, messages: Vec<crate::buffer::BufferedMessage>) -> Result<()>;
}

/// A `ChatPersistence` that discards everything; the default when a host
/// hasn't wired real storage yet (mirrors `RequestLogger::noop`).
#[derive(Debug, Default)]
pub struct NullPersistence;

#[async_trait]
impl ChatPersistence for NullPersistence {
    async fn persist(&self, _chat_id: &str, _messages: Vec<crate::buffer::BufferedMessage>) -> Result<()> {
        Ok(())
    }
}

/// Everything a request needs, aggregated behind one handle. Cheap to
/// clone (every field is an `Arc`), so the same Context can be handed
/// into fan-out sub-tasks that need the shared namespaces and trace
/// recorder alongside their own suppressed writer.
#[derive(Clone)]
pub struct Context {
    pub ids: Identifiers,
    pub metadata: Arc<Mutex<Value>>,
    pub authorized: Arc<Mutex<Value>>,
    pub space: Arc<Mutex<Value>>,
    pub writer: Arc<OutputWriter>,
    pub buffer: Arc<ChatBuffer>,
    pub memory: Arc<MemoryNamespaces>,
    pub stacks: Arc<StackManager>,
    pub trace: Arc<TraceRecorder>,
    pub logger: Arc<RequestLogger>,
    persistence: Arc<dyn ChatPersistence>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// Build a fresh Context. `sink` is the request's real output
    /// transport; fan-out sub-Contexts are built separately via
    /// `Context::sub_context`, which wires a suppressed writer instead.
    pub fn new(
        ids: Identifiers,
        sink: Arc<dyn OutputSink>,
        persistence: Arc<dyn ChatPersistence>,
    ) -> Self {
        let accept = match ids.accept.as_str() {
            "cui-web" => AcceptMode::CuiWeb,
            "cui-native" => AcceptMode::CuiNative,
            "cui-desktop" => AcceptMode::CuiDesktop,
            _ => AcceptMode::Standard,
        };
        let buffer = Arc::new(ChatBuffer::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let log_ctx = LogContext {
            chat_id: ids.chat_id.clone(),
            assistant_id: ids.assistant_id.clone(),
            trace_id: String::new(),
        };
        Self {
            ids,
            metadata: Arc::new(Mutex::new(Value::Object(Default::default()))),
            authorized: Arc::new(Mutex::new(Value::Null)),
            space: Arc::new(Mutex::new(Value::Object(Default::default()))),
            writer: Arc::new(OutputWriter::new(sink, accept, buffer.clone())),
            buffer,
            memory: Arc::new(MemoryNamespaces::new()),
            stacks: Arc::new(StackManager::new(cancelled.clone())),
            trace: Arc::new(TraceRecorder::new()),
            logger: Arc::new(RequestLogger::new(std::io::stderr(), log_ctx, crate::config::RunMode::Production)),
            persistence,
            cancelled,
        }
    }

    /// Build a suppressed sub-Context for a fan-out sub-task (spec §4.4
    /// "Output-stream safety"): shares this Context's buffer, memory,
    /// stack manager, and trace recorder, but gets its own writer wired to
    /// a null sink so its message/block ids don't collide with the
    /// parent's direct output stream.
    pub fn sub_context(&self) -> Self {
        let writer = Arc::new(OutputWriter::new_suppressed(AcceptMode::Standard, self.buffer.clone()));
        Self {
            ids: self.ids.clone(),
            metadata: self.metadata.clone(),
            authorized: self.authorized.clone(),
            space: self.space.clone(),
            writer,
            buffer: self.buffer.clone(),
            memory: self.memory.clone(),
            stacks: self.stacks.clone(),
            trace: self.trace.clone(),
            logger: self.logger.clone(),
            persistence: self.persistence.clone(),
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Enter a stack node for a nested agent invocation under this
    /// Context's current stack (spec §4.3).
    pub fn enter_stack(&self, assistant_id: impl Into<String>, referer: Referer) -> (StackNode, impl Fn() + '_) {
        self.stacks.enter_stack(assistant_id, EnterStackOpts { referer: Some(referer), trace_id: None })
    }

    /// `release()`: close the writer, flush the chat buffer to
    /// persistence, close every still-running stack (`timeout` if
    /// cancellation fired, else `completed`), clear the `context` memory
    /// namespace, and stop the request logger (spec §4.5).
    pub async fn release(self) -> Result<()> {
        self.writer.close().await;
        let messages = self.buffer.messages().await;
        self.persistence.persist(&self.ids.chat_id, messages).await?;
        self.stacks.close_all();
        self.memory.context.clear();
        Ok(())
    }
}
