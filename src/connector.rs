//! LLM connectors
//!
//! An `LlmConnector` is an opaque producer of typed chunks (spec §9
//! "Design notes" — dynamic values at the host bridge cross a narrow,
//! typed seam rather than a raw wire format). The core never parses LLM
//! wire formats beyond this one example connector, which talks to any
//! OpenAI-compatible `/chat/completions` endpoint over SSE — the same
//! surface the teacher's `client::query` speaks to LM Studio/Ollama/
//! llama.cpp/vLLM, generalized here into a fan-out producer rather than a
//! standalone streaming function.

use crate::error::{Error, Result};
use crate::retry::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// One unit of a connector's streamed response.
#[derive(Debug, Clone)]
pub enum ConnectorChunk {
    TextDelta(String),
    ToolCall { name: String, arguments: Value },
    Done,
}

pub type ConnectorStream = Pin<Box<dyn Stream<Item = Result<ConnectorChunk>> + Send>>;

/// The interface a fan-out coordinator consumes for the "LLM connector"
/// target kind (spec §4.4); concrete connectors are opaque beyond this.
#[async_trait]
pub trait LlmConnector: Send + Sync {
    async fn stream(&self, messages: Vec<Value>, tools: Vec<Value>) -> Result<ConnectorStream>;
}

/// Talks to an OpenAI-compatible `/chat/completions` endpoint. Request
/// construction mirrors the teacher's `OpenAIRequest`/`query` shape;
/// connection setup goes through `retry_with_backoff` so a cold local
/// server (LM Studio still loading a model, for example) doesn't fail
/// the whole fan-out slot on the first attempt.
pub struct OpenAiCompatibleConnector {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryConfig,
}

impl OpenAiCompatibleConnector {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn open_stream(&self, messages: &[Value], tools: &[Value]) -> Result<reqwest::Response> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(Error::Http)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("connector returned {status}: {text}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmConnector for OpenAiCompatibleConnector {
    async fn stream(&self, messages: Vec<Value>, tools: Vec<Value>) -> Result<ConnectorStream> {
        let retry = self.retry.clone();
        let response = retry_with_backoff(retry, || self.open_stream(&messages, &tools)).await?;

        let byte_stream = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));
        let events = byte_stream.eventsource();

        let mapped = events.filter_map(|event| async move {
            let event = match event {
                Ok(e) => e,
                Err(e) => return Some(Err(Error::stream(e.to_string()))),
            };
            if event.data == "[DONE]" {
                return Some(Ok(ConnectorChunk::Done));
            }
            let parsed: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(e) => return Some(Err(Error::Json(e))),
            };
            let delta = parsed
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("delta"))
                .cloned()
                .unwrap_or(Value::Null);
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                return Some(Ok(ConnectorChunk::TextDelta(text.to_string())));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                if let Some(call) = calls.first() {
                    let name = call
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let args_raw = call
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    let arguments = serde_json::from_str(args_raw).unwrap_or(Value::Null);
                    return Some(Ok(ConnectorChunk::ToolCall { name, arguments }));
                }
            }
            None
        });

        Ok(Box::pin(mapped))
    }
}

/// A fixed-script connector useful in tests and as a nil-safe default: it
/// replays a pre-built sequence of chunks instead of making a network
/// call.
pub struct ScriptedConnector {
    script: Vec<ConnectorChunk>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<ConnectorChunk>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl LlmConnector for ScriptedConnector {
    async fn stream(&self, _messages: Vec<Value>, _tools: Vec<Value>) -> Result<ConnectorStream> {
        let items: Vec<Result<ConnectorChunk>> = self.script.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_connector_replays_chunks_in_order() {
        let connector = ScriptedConnector::new(vec![
            ConnectorChunk::TextDelta("Hel".to_string()),
            ConnectorChunk::TextDelta("lo".to_string()),
            ConnectorChunk::Done,
        ]);
        let mut stream = connector.stream(vec![], vec![]).await.unwrap();
        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                ConnectorChunk::TextDelta(d) => text.push_str(&d),
                ConnectorChunk::Done => saw_done = true,
                ConnectorChunk::ToolCall { .. } => {}
            }
        }
        assert_eq!(text, "Hello");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn empty_script_yields_empty_stream() {
        let connector = ScriptedConnector::new(vec![]);
        let mut stream = connector.stream(vec![], vec![]).await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
