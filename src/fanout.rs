//! Fan-out coordinators (C8)
//!
//! `All`/`Any`/`Race` over MCP tools, sub-agents, and LLM connectors (spec
//! §4.4). The control flow is identical across target kinds — only the
//! producer future differs — so every primitive here is generic over a
//! `Future<Output = Result<Value>>` rather than one trait per target.

use crate::error::Error;
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One fan-out slot's outcome: its input-order index plus either the
/// producer's parsed content or a captured error string. Producer errors
/// never propagate out of a coordinator call (spec §7) — they are always
/// data inside this struct.
#[derive(Debug, Clone)]
pub struct FanoutResult {
    pub index: usize,
    pub content: Option<Value>,
    pub error: Option<String>,
}

impl FanoutResult {
    fn ok(index: usize, content: Value) -> Self {
        Self { index, content: Some(content), error: None }
    }

    fn err(index: usize, error: impl Into<String>) -> Self {
        Self { index, content: None, error: Some(error.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A boxed, type-erased producer future — one per fan-out slot.
pub type Producer = Pin<Box<dyn Future<Output = crate::Result<Value>> + Send>>;

/// Invoked with `(producer_id, index, chunk)` under a coordinator-internal
/// lock, guaranteeing no interleaving within one callback call (spec §4.4
/// "Output-stream safety").
pub type ChunkCallback = Arc<dyn Fn(&str, usize, &Value) + Send + Sync>;

/// One fan-out request: an opaque producer id (for the chunk callback) and
/// the future that produces its result.
pub struct FanoutRequest {
    pub producer_id: String,
    pub future: Producer,
}

impl FanoutRequest {
    pub fn new(producer_id: impl Into<String>, future: Producer) -> Self {
        Self { producer_id: producer_id.into(), future }
    }
}

/// Shared cancellation flag handed to every sub-task; `Any`/`Race` set it
/// once a qualifying termination occurs so siblings observe it cooperatively
/// (spec §4.4 "Cancellation propagation" — this crate has no preemptive
/// task-kill primitive, so producers are expected to poll it between
/// suspension points, the same contract `Context::cancelled` offers).
pub type CancelToken = Arc<AtomicBool>;

/// `All(reqs)`: run every request to completion (success or error) and
/// return results in input order.
pub async fn all(reqs: Vec<FanoutRequest>) -> Vec<FanoutResult> {
    let n = reqs.len();
    let mut handles = Vec::with_capacity(n);
    for (index, req) in reqs.into_iter().enumerate() {
        handles.push(tokio::spawn(async move {
            match req.future.await {
                Ok(content) => FanoutResult::ok(index, content),
                Err(e) => FanoutResult::err(index, e.to_string()),
            }
        }));
    }
    let mut results = Vec::with_capacity(n);
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(join_err) => results.push(FanoutResult::err(results.len(), join_err.to_string())),
        }
    }
    results.sort_by_key(|r| r.index);
    results
}

/// `Any(reqs)`: return as soon as one request succeeds (or all fail).
/// Entries completed before (and including) the first success are kept;
/// remaining tasks are cancelled via `token` and their completions
/// discarded.
pub async fn any(reqs: Vec<FanoutRequest>, token: CancelToken) -> Vec<FanoutResult> {
    let n = reqs.len();
    let results: Arc<Mutex<Vec<FanoutResult>>> = Arc::new(Mutex::new(Vec::with_capacity(n)));
    let success_seen = Arc::new(AtomicBool::new(false));

    let mut handles = FuturesUnordered::new();
    for (index, req) in reqs.into_iter().enumerate() {
        let results = results.clone();
        let success_seen = success_seen.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            if token.load(Ordering::SeqCst) {
                return;
            }
            let outcome = req.future.await;
            if success_seen.load(Ordering::SeqCst) {
                return;
            }
            let result = match outcome {
                Ok(content) => {
                    success_seen.store(true, Ordering::SeqCst);
                    token.store(true, Ordering::SeqCst);
                    FanoutResult::ok(index, content)
                }
                Err(e) => FanoutResult::err(index, e.to_string()),
            };
            results.lock().await.push(result);
        }));
    }

    // Drain completions as they arrive rather than joining in spawn order,
    // so a win stops us as soon as it lands instead of waiting on whichever
    // producer happens to be slowest.
    while let Some(joined) = handles.next().await {
        let _ = joined;
        if success_seen.load(Ordering::SeqCst) {
            break;
        }
    }

    let mut out = results.lock().await.clone();
    out.sort_by_key(|r| r.index);
    out
}

/// `Race(reqs)`: return as soon as any one request completes, success or
/// failure. Remaining tasks are cancelled via `token`.
pub async fn race(reqs: Vec<FanoutRequest>, token: CancelToken) -> Option<FanoutResult> {
    if reqs.is_empty() {
        return None;
    }
    let futures: Vec<_> = reqs
        .into_iter()
        .enumerate()
        .map(|(index, req)| {
            Box::pin(async move {
                let outcome = req.future.await;
                match outcome {
                    Ok(content) => FanoutResult::ok(index, content),
                    Err(e) => FanoutResult::err(index, e.to_string()),
                }
            })
            .boxed()
        })
        .collect();
    let (result, _index, _remaining) = futures::future::select_all(futures).await;
    token.store(true, Ordering::SeqCst);
    Some(result)
}

/// Dispatch one chunk through the shared callback, if present, under the
/// coordinator-internal lock described in spec §4.4.
pub async fn emit_chunk(
    callback: &Option<ChunkCallback>,
    lock: &Mutex<()>,
    producer_id: &str,
    index: usize,
    chunk: &Value,
) {
    if let Some(cb) = callback {
        let _guard = lock.lock().await;
        cb(producer_id, index, chunk);
    }
}

/// Parse a raw MCP tool response into its fan-out "content" value per the
/// rules in spec §4.4. Delegates to the same parser `tools::Tool` uses so
/// MCP-shaped responses are interpreted identically regardless of whether
/// they arrived through a locally-registered tool or a remote MCP server.
pub fn parse_mcp_result(items: &[Value]) -> Value {
    crate::tools::Tool::parse_mcp_content(items)
}

pub(crate) fn producer_error(msg: impl Into<String>) -> Error {
    Error::producer(msg)
}
