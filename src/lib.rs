//! # agent-context
//!
//! An execution-context runtime for LLM-agent hosts: a streaming message
//! envelope format, a chat buffer that durably mirrors everything sent to
//! a client, a tree of nested agent invocations (the "stack"), a parallel
//! trace of execution events for presentation, four uniform memory
//! namespaces, a request identifier resolver, and `All`/`Any`/`Race`
//! fan-out over tools, sub-agents, and LLM connectors.
//!
//! ## Request lifecycle
//!
//! A host adapter parses an inbound request into a [`request::RequestSurface`],
//! resolves `assistant_id`/`chat_id` with [`resolver`], builds a
//! [`context::Context`], and drives it through the request: the output
//! writer ([`writer`]) streams content to the client while mirroring it
//! into the chat buffer ([`buffer`]); nested agent calls enter/exit the
//! stack ([`stack`]); fan-out calls ([`fanout`]) dispatch tool/sub-agent/
//! connector work; a hook host reaches everything through the bridge
//! ([`bridge`]). `Context::release` tears the request down.
//!
//! ## Architecture
//!
//! - **message**: wire envelope format and delta reconstruction (C1)
//! - **writer**: the single serialization point for a request's output stream (C2)
//! - **buffer**: durable in-memory mirror of sent messages and resume steps (C3)
//! - **memory**: four uniform key/value namespaces (C4)
//! - **stack**: the tree of nested agent invocations (C5)
//! - **trace**: a parallel, presentation-facing record of execution events (C6)
//! - **context**: aggregates every collaborator behind one request handle (C7)
//! - **fanout**: `All`/`Any`/`Race` over tools, sub-agents, and connectors (C8)
//! - **resolver**: `assistant_id`/`chat_id` resolution (C9)
//! - **logger**: the non-blocking, per-request structured logger (C10)
//! - **bridge**: the hook-host arena and object-identity bridge (C11)
//! - **tools**: MCP-style tool targets the fan-out coordinator calls
//! - **connector**: the LLM connector interface and an OpenAI-compatible example
//! - **request**: the already-parsed request surface the resolver and Context consume
//! - **config**: process-level runtime configuration
//! - **retry**: exponential backoff with jitter, shared by connectors and fan-out
//! - **ids**: monotonic message/block/thread/chunk id allocation
//! - **error**: the crate's error taxonomy

mod buffer;
mod bridge;
mod config;
mod connector;
mod context;
mod error;
mod fanout;
mod ids;
mod logger;
mod memory;
mod message;
mod request;
mod resolver;
mod stack;
mod tools;
mod trace;
mod writer;

/// Exponential backoff with jitter, shared by connectors and fan-out
/// coordinators for transient-failure retries.
pub mod retry;

// --- Error handling ---

pub use error::{Error, Result};

// --- C1: message envelope ---

pub use message::{apply_delta, canonicalize, read_path, DeltaAction, Envelope, DEFAULT_DELTA_PATH};

// --- C2: output writer ---

pub use writer::{encode, AcceptMode, MemorySink, NullSink, OutputSink, OutputWriter};

// --- C3: chat buffer ---

pub use buffer::{
    BufferedMessage, ChatBuffer, Mode, ResumeStep, Role, StepStatus, StepType,
};

// --- C4: memory namespaces ---

pub use memory::{MemoryNamespaces, Namespace};

// --- C5: stack manager ---

pub use stack::{EnterStackOpts, Referer, StackManager, StackNode, Status as StackStatus};

// --- C6: trace recorder ---

pub use trace::{SharedTraceRecorder, TraceNode, TraceRecorder, TraceStatus, Visibility};

// --- C7: Context object ---

pub use context::{ChatPersistence, ClientInfo, Context, Identifiers, NullPersistence};

// --- C8: fan-out coordinators ---

pub use fanout::{
    all, any, emit_chunk, parse_mcp_result, race, CancelToken, ChunkCallback, FanoutRequest,
    FanoutResult, Producer,
};

// --- C9: request identifier resolver ---

pub use resolver::{
    resolve_assistant_id, resolve_chat_id, ChatIdResolution, ContinuationCache,
};

// --- C10: request logger ---

pub use logger::{LogContext, RequestLogger, SharedLogger};

// --- C11: hook-host bridge ---

pub use bridge::{ArenaKey, BridgedObject, HookArena};

// --- Tool targets ---

pub use tools::{tool, Tool, ToolBuilder, ToolHandler};

// --- LLM connectors ---

pub use connector::{ConnectorChunk, ConnectorStream, LlmConnector, OpenAiCompatibleConnector, ScriptedConnector};

// --- Request surface ---

pub use request::{ContentPart, ImageUrl, InputAudio, Message as RequestMessage, MessageContent, MessageRole, RequestSurface};

// --- Configuration ---

pub use config::{LogSink, RunMode, RuntimeConfig};

// --- IDs ---

pub use ids::IdAllocator;

/// Convenience re-exports for typical usage:
/// `use agent_context::prelude::*;`
pub mod prelude {
    pub use crate::{
        AcceptMode, ChatBuffer, ChatPersistence, Context, DeltaAction, Envelope, Error,
        FanoutResult, Identifiers, MemoryNamespaces, OutputWriter, Referer, RequestSurface,
        Result, StackManager, Tool, TraceRecorder, tool,
    };
}
