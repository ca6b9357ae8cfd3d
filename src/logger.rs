//! Request logger (C10)
//!
//! A non-blocking single-consumer queue backed by a dedicated
//! background task, built on `tracing-appender::non_blocking` (spec
//! §4.9). Every entry is a `tracing` event tagged with the owning
//! request's identifiers, so a host that installs a `tracing-subscriber`
//! layer gets structured logs without this crate owning a sink.

use crate::config::RunMode;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

/// Identifiers every log line is tagged with.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub chat_id: String,
    pub assistant_id: String,
    pub trace_id: String,
}

/// The request logger. Each Context owns one. `close` drains the
/// non-blocking queue and joins its writer thread.
pub struct RequestLogger {
    ctx: LogContext,
    mode: RunMode,
    _writer: Option<NonBlocking>,
    guard: Option<WorkerGuard>,
    active: bool,
}

impl RequestLogger {
    /// Build a logger backed by a non-blocking writer over `sink`
    /// (typically `std::io::stderr()` or a file appender the host
    /// supplies). The returned logger owns the `WorkerGuard`; dropping
    /// it (or calling `close`) flushes and joins the background thread.
    pub fn new<W>(sink: W, ctx: LogContext, mode: RunMode) -> Self
    where
        W: std::io::Write + Send + 'static,
    {
        let (writer, guard) = tracing_appender::non_blocking(sink);
        Self {
            ctx,
            mode,
            _writer: Some(writer),
            guard: Some(guard),
            active: true,
        }
    }

    /// A logger that discards everything. Matches "a no-op logger is
    /// available for nil-safety" (spec §4.9).
    pub fn noop() -> Self {
        Self {
            ctx: LogContext::default(),
            mode: RunMode::Production,
            _writer: None,
            guard: None,
            active: false,
        }
    }

    fn emit(&self, level: &str, message: &str) {
        if !self.active {
            return;
        }
        let LogContext { chat_id, assistant_id, trace_id } = &self.ctx;
        match level {
            "trace" => trace!(chat_id = %chat_id, assistant_id = %assistant_id, trace_id = %trace_id, "{message}"),
            "debug" => debug!(chat_id = %chat_id, assistant_id = %assistant_id, trace_id = %trace_id, "{message}"),
            "info" => info!(chat_id = %chat_id, assistant_id = %assistant_id, trace_id = %trace_id, "{message}"),
            "warn" => warn!(chat_id = %chat_id, assistant_id = %assistant_id, trace_id = %trace_id, "{message}"),
            "error" => error!(chat_id = %chat_id, assistant_id = %assistant_id, trace_id = %trace_id, "{message}"),
            _ => info!(chat_id = %chat_id, assistant_id = %assistant_id, trace_id = %trace_id, "{message}"),
        }
    }

    pub fn trace(&self, message: &str) {
        self.emit("trace", message);
    }
    pub fn debug(&self, message: &str) {
        self.emit("debug", message);
    }
    pub fn info(&self, message: &str) {
        self.emit("info", message);
    }
    pub fn warn(&self, message: &str) {
        self.emit("warn", message);
    }
    pub fn error(&self, message: &str) {
        self.emit("error", message);
    }

    pub fn phase(&self, name: &str) {
        self.emit("info", &format!("phase start: {name}"));
    }

    pub fn phase_complete(&self, name: &str) {
        self.emit("info", &format!("phase complete: {name}"));
    }

    pub fn phase_skip(&self, name: &str, reason: &str) {
        self.emit("debug", &format!("phase skipped: {name} ({reason})"));
    }

    pub fn llm_start(&self, connector: &str) {
        self.emit("info", &format!("llm start: {connector}"));
    }

    pub fn llm_end(&self, connector: &str, ok: bool) {
        self.emit("info", &format!("llm end: {connector} ok={ok}"));
    }

    pub fn tool_start(&self, tool: &str) {
        self.emit("info", &format!("tool start: {tool}"));
    }

    pub fn tool_end(&self, tool: &str, ok: bool) {
        self.emit("info", &format!("tool end: {tool} ok={ok}"));
    }

    pub fn hook_start(&self, hook: &str) {
        self.emit("debug", &format!("hook start: {hook}"));
    }

    pub fn hook_end(&self, hook: &str, ok: bool) {
        self.emit("debug", &format!("hook end: {hook} ok={ok}"));
    }

    pub fn request_start(&self) {
        self.emit("info", "request start");
    }

    pub fn request_end(&self, success: bool, err: Option<&str>) {
        match err {
            Some(err) => self.emit("error", &format!("request end: success={success} err={err}")),
            None => self.emit("info", &format!("request end: success={success}")),
        }
    }

    pub fn is_development(&self) -> bool {
        self.mode == RunMode::Development
    }

    /// Drain the queue and join the background writer thread.
    pub fn close(mut self) {
        self.active = false;
        self._writer.take();
        self.guard.take();
    }
}

pub type SharedLogger = Arc<RequestLogger>;
