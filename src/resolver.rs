//! Request identifier resolver (C9)
//!
//! Resolves `assistant_id` and `chat_id` from an already-parsed request
//! surface (spec §4.6 / §6). Operates purely on data — no HTTP parsing,
//! sockets, or routing lives here; that boundary belongs to the host.

use crate::error::{Error, Result};
use crate::message::canonicalize;
use crate::request::{MessageRole, RequestSurface};
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

const CHAT_ID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz";
const CHAT_ID_LEN: usize = 16;
const CONTINUATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn generate_chat_id() -> String {
    let mut rng = rand::thread_rng();
    (0..CHAT_ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHAT_ID_ALPHABET.len());
            CHAT_ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Resolve `assistant_id`: query parameter → header → `model` field
/// shaped `…-yao_<id>` (last hyphen segment, `yao_` prefix stripped).
/// Missing `assistant_id` is a hard client error.
pub fn resolve_assistant_id(surface: &RequestSurface) -> Result<String> {
    if let Some(id) = surface.query.get("assistant_id").filter(|s| !s.is_empty()) {
        return Ok(id.clone());
    }
    if let Some(id) = surface.header("x-yao-assistant").filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }
    if let Some(model) = surface.model.as_deref() {
        if let Some(last_segment) = model.rsplit('-').next() {
            if let Some(id) = last_segment.strip_prefix("yao_") {
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
            }
        }
    }
    Err(Error::invalid_input("missing assistant_id"))
}

/// The result of chat-id resolution, including whether it was freshly
/// minted (useful for callers deciding whether to greet a new session).
#[derive(Debug, Clone)]
pub struct ChatIdResolution {
    pub chat_id: String,
    pub continued: bool,
}

/// Lazily-expiring cache mapping a message-prefix content hash to the
/// chat ID it continues. Backed by `DashMap` for the same reason every
/// other shared registry in this crate is (spec §5).
#[derive(Debug, Default)]
pub struct ContinuationCache {
    entries: DashMap<String, (String, Instant)>,
}

impl ContinuationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, hash: &str) -> Option<String> {
        let hit = self.entries.get(hash).and_then(|e| {
            let (id, expires) = e.value();
            (Instant::now() < *expires).then(|| id.clone())
        });
        if hit.is_none() {
            self.entries.remove(hash);
        }
        hit
    }

    fn put(&self, hash: String, chat_id: String) {
        self.entries
            .insert(hash, (chat_id, Instant::now() + CONTINUATION_TTL));
    }
}

fn hash_prefix(prefix: &[Value]) -> String {
    let canonical = canonicalize(&Value::Array(prefix.to_vec()));
    let serialized = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&serialized);
    format!("{:x}", digest)
}

/// Resolve `chat_id`: query → header → content-hashed continuation
/// (spec §4.6 algorithm).
pub fn resolve_chat_id(
    surface: &RequestSurface,
    cache: &ContinuationCache,
) -> ChatIdResolution {
    if let Some(id) = surface.query.get("chat_id").filter(|s| !s.is_empty()) {
        return ChatIdResolution { chat_id: id.clone(), continued: true };
    }
    if let Some(id) = surface.header("x-yao-chat").filter(|s| !s.is_empty()) {
        return ChatIdResolution { chat_id: id.to_string(), continued: true };
    }

    let filtered: Vec<Value> = surface
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::Assistant)
        .map(|m| m.raw.clone())
        .collect();
    let user_count = surface
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .count();

    if user_count < 2 {
        let chat_id = generate_chat_id();
        cache_all_prefixes(cache, &filtered, &chat_id);
        return ChatIdResolution { chat_id, continued: false };
    }

    let n = filtered.len();
    let lookup_hash = hash_prefix(&filtered[..n - 1]);
    let (chat_id, continued) = match cache.get(&lookup_hash) {
        Some(id) => (id, true),
        None => (generate_chat_id(), false),
    };
    cache_all_prefixes(cache, &filtered, &chat_id);
    ChatIdResolution { chat_id, continued }
}

fn cache_all_prefixes(cache: &ContinuationCache, filtered: &[Value], chat_id: &str) {
    for len in 1..=filtered.len() {
        let hash = hash_prefix(&filtered[..len]);
        cache.put(hash, chat_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Message, MessageContent};
    use std::collections::HashMap;

    fn surface_with(messages: Vec<Message>) -> RequestSurface {
        RequestSurface {
            query: HashMap::new(),
            headers: HashMap::new(),
            model: None,
            messages,
        }
    }

    fn user(content: &str) -> Message {
        Message {
            role: MessageRole::User,
            content: MessageContent::Plain(content.to_string()),
            raw: serde_json::json!({"role": "user", "content": content}),
        }
    }

    fn assistant(content: &str) -> Message {
        Message {
            role: MessageRole::Assistant,
            content: MessageContent::Plain(content.to_string()),
            raw: serde_json::json!({"role": "assistant", "content": content}),
        }
    }

    #[test]
    fn assistant_id_from_query_wins_over_model_suffix() {
        let mut surface = surface_with(vec![]);
        surface.query.insert("assistant_id".to_string(), "a1".to_string());
        surface.model = Some("gpt-4-yao_a2".to_string());
        assert_eq!(resolve_assistant_id(&surface).unwrap(), "a1");
    }

    #[test]
    fn assistant_id_from_model_suffix() {
        let mut surface = surface_with(vec![]);
        surface.model = Some("custom-model-yao_abc123".to_string());
        assert_eq!(resolve_assistant_id(&surface).unwrap(), "abc123");
    }

    #[test]
    fn assistant_id_missing_is_hard_error() {
        let surface = surface_with(vec![]);
        assert!(resolve_assistant_id(&surface).is_err());
    }

    #[test]
    fn fewer_than_two_user_messages_gets_fresh_chat_id() {
        let cache = ContinuationCache::new();
        let surface = surface_with(vec![user("Hi")]);
        let resolution = resolve_chat_id(&surface, &cache);
        assert!(!resolution.continued);
        assert_eq!(resolution.chat_id.len(), CHAT_ID_LEN);
    }

    #[test]
    fn second_turn_continues_first_chat_id() {
        let cache = ContinuationCache::new();
        let first = surface_with(vec![user("Hi")]);
        let r1 = resolve_chat_id(&first, &cache);

        let second = surface_with(vec![user("Hi"), assistant("Hello"), user("More")]);
        let r2 = resolve_chat_id(&second, &cache);

        assert_eq!(r1.chat_id, r2.chat_id);
        assert!(r2.continued);
    }

    #[test]
    fn explicit_chat_id_header_short_circuits() {
        let cache = ContinuationCache::new();
        let mut surface = surface_with(vec![user("Hi"), assistant("Yo"), user("More")]);
        surface.headers.insert("x-yao-chat".to_string(), "explicit".to_string());
        let resolution = resolve_chat_id(&surface, &cache);
        assert_eq!(resolution.chat_id, "explicit");
    }

    #[test]
    fn divergent_third_turn_does_not_collide_with_original() {
        let cache = ContinuationCache::new();
        let first = surface_with(vec![user("Hi")]);
        let r1 = resolve_chat_id(&first, &cache);

        let diverged = surface_with(vec![user("Totally different opener")]);
        let r2 = resolve_chat_id(&diverged, &cache);
        assert_ne!(r1.chat_id, r2.chat_id);
    }
}
