//! Process-level configuration
//!
//! Per spec §6 "process/environment boundary": the runtime reads two
//! knobs from the environment once at startup — never per request.
//! Mirrors the teacher's `get_base_url`/`get_model` environment-variable
//! convention, but as a single struct read once rather than ad hoc calls
//! scattered through request handling.

use std::env;

/// Development vs production rendering mode for the request logger
/// (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Development,
    Production,
}

/// Where the request logger forwards entries once development-mode
/// color rendering is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Human-readable, ANSI-colored output on stderr (typical for
    /// `RunMode::Development`).
    Stderr,
    /// Structured JSON lines on stdout, for a host to forward to an
    /// external sink (spec §4.9 "in production, forwarded to an
    /// external structured sink").
    Json,
}

/// Process-wide configuration, read once at startup from
/// `AGENT_CONTEXT_ENV` and `AGENT_CONTEXT_LOG_SINK`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: RunMode,
    pub log_sink: LogSink,
}

impl RuntimeConfig {
    /// Read configuration from the process environment. Unset or
    /// unrecognized values fall back to `RunMode::Production` /
    /// `LogSink::Json`, the conservative choice for a host that forgot
    /// to set either variable.
    pub fn from_env() -> Self {
        let mode = match env::var("AGENT_CONTEXT_ENV").as_deref() {
            Ok("development") | Ok("dev") => RunMode::Development,
            _ => RunMode::Production,
        };
        let log_sink = match env::var("AGENT_CONTEXT_LOG_SINK").as_deref() {
            Ok("stderr") => LogSink::Stderr,
            _ => match mode {
                RunMode::Development => LogSink::Stderr,
                RunMode::Production => LogSink::Json,
            },
        };
        Self { mode, log_sink }
    }

    pub fn is_development(&self) -> bool {
        self.mode == RunMode::Development
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { mode: RunMode::Production, log_sink: LogSink::Json }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_production_json_when_unset() {
        // SAFETY: test-local env var, not read by anything else in this process.
        unsafe {
            env::remove_var("AGENT_CONTEXT_ENV");
            env::remove_var("AGENT_CONTEXT_LOG_SINK");
        }
        let config = RuntimeConfig::from_env();
        assert_eq!(config.mode, RunMode::Production);
        assert_eq!(config.log_sink, LogSink::Json);
    }

    #[test]
    fn development_mode_defaults_log_sink_to_stderr() {
        // SAFETY: test-local env var, not read by anything else in this process.
        unsafe {
            env::set_var("AGENT_CONTEXT_ENV", "development");
            env::remove_var("AGENT_CONTEXT_LOG_SINK");
        }
        let config = RuntimeConfig::from_env();
        assert!(config.is_development());
        assert_eq!(config.log_sink, LogSink::Stderr);
        unsafe {
            env::remove_var("AGENT_CONTEXT_ENV");
        }
    }

    #[test]
    fn explicit_log_sink_overrides_mode_default() {
        // SAFETY: test-local env var, not read by anything else in this process.
        unsafe {
            env::set_var("AGENT_CONTEXT_ENV", "production");
            env::set_var("AGENT_CONTEXT_LOG_SINK", "stderr");
        }
        let config = RuntimeConfig::from_env();
        assert_eq!(config.log_sink, LogSink::Stderr);
        unsafe {
            env::remove_var("AGENT_CONTEXT_ENV");
            env::remove_var("AGENT_CONTEXT_LOG_SINK");
        }
    }
}
