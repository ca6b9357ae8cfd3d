//! Request surface (C9 input)
//!
//! An already-parsed view of an inbound request: no HTTP parsing,
//! sockets, or routing live here (spec §6 "process/environment
//! boundary" — the runtime itself never touches raw HTTP). A host
//! adapter is expected to populate this from whatever transport it
//! speaks and hand it to the resolver and to `Context::new`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `messages[*].content` accepts either a plain string or a list of
/// typed parts in the wire format (spec §9 Open Question). Both shapes
/// are kept distinct here rather than normalized to multipart: the
/// continuation hash is defined over canonical JSON of whichever shape
/// arrived, so collapsing `Plain` into a single-element `Parts` list
/// would change the hash for clients that only ever send plain strings,
/// silently breaking their continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Plain(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the inbound `messages` array, kept alongside its raw
/// JSON form so the continuation hash can be computed over exactly what
/// the client sent.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
    pub raw: Value,
}

impl Message {
    pub fn from_raw(raw: Value) -> Option<Self> {
        let role = match raw.get("role").and_then(Value::as_str)? {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => return None,
        };
        let content_value = raw.get("content")?.clone();
        let content: MessageContent = serde_json::from_value(content_value).ok()?;
        Some(Self { role, content, raw })
    }
}

/// Everything the resolver and `Context::new` need from an inbound
/// request, already parsed by the host adapter.
#[derive(Debug, Clone)]
pub struct RequestSurface {
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub model: Option<String>,
    pub messages: Vec<Message>,
}

impl RequestSurface {
    /// Case-insensitive header lookup (HTTP header names are not
    /// case-sensitive; hosts may hand us either casing).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == name)
            .map(|(_, v)| v.as_str())
    }

    /// `accept` is one of `standard|cui-web|cui-native|cui-desktop`;
    /// resolved from query, then header, falling back to `None` so the
    /// writer can derive it from user-agent instead.
    pub fn accept(&self) -> Option<&str> {
        self.query
            .get("accept")
            .map(String::as_str)
            .or_else(|| self.header("x-yao-accept"))
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// `referer` is one of `api|agent|process|mcp|tool`; unrecognized
    /// values fall back to `api` (spec §6).
    pub fn referer(&self) -> crate::stack::Referer {
        use crate::stack::Referer;
        let raw = self
            .query
            .get("referer")
            .map(String::as_str)
            .or_else(|| self.header("x-yao-referer"))
            .unwrap_or("api");
        match raw {
            "agent" => Referer::Agent,
            "process" => Referer::Process,
            "mcp" => Referer::Mcp,
            "tool" => Referer::Tool,
            _ => Referer::Api,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_from_raw_parses_plain_content() {
        let m = Message::from_raw(json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(m.role, MessageRole::User);
        assert!(matches!(m.content, MessageContent::Plain(ref s) if s == "hi"));
    }

    #[test]
    fn message_from_raw_parses_multipart_content() {
        let raw = json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi"}, {"type": "image_url", "image_url": {"url": "http://x"}}]
        });
        let m = Message::from_raw(raw).unwrap();
        assert!(matches!(m.content, MessageContent::Parts(ref parts) if parts.len() == 2));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(Message::from_raw(json!({"role": "bogus", "content": "hi"})).is_none());
    }

    #[test]
    fn referer_falls_back_to_api_for_unknown_values() {
        let surface = RequestSurface {
            query: HashMap::from([("referer".to_string(), "spaceship".to_string())]),
            headers: HashMap::new(),
            model: None,
            messages: vec![],
        };
        assert!(matches!(surface.referer(), crate::stack::Referer::Api));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let surface = RequestSurface {
            query: HashMap::new(),
            headers: HashMap::from([("X-Yao-Chat".to_string(), "abc".to_string())]),
            model: None,
            messages: vec![],
        };
        assert_eq!(surface.header("x-yao-chat"), Some("abc"));
    }
}
