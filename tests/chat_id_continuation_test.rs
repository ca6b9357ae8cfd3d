//! Chat-ID continuation across two simulated request turns, feeding the
//! resolved id straight into a Context the way a host adapter would.

use agent_context::{
    resolve_assistant_id, resolve_chat_id, ContinuationCache, Context, Identifiers, MemorySink,
    MessageContent, MessageRole, NullPersistence, RequestMessage, RequestSurface,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn user_message(content: &str) -> RequestMessage {
    RequestMessage {
        role: MessageRole::User,
        content: MessageContent::Plain(content.to_string()),
        raw: json!({"role": "user", "content": content}),
    }
}

fn assistant_message(content: &str) -> RequestMessage {
    RequestMessage {
        role: MessageRole::Assistant,
        content: MessageContent::Plain(content.to_string()),
        raw: json!({"role": "assistant", "content": content}),
    }
}

fn surface(model: &str, messages: Vec<RequestMessage>) -> RequestSurface {
    RequestSurface {
        query: HashMap::new(),
        headers: HashMap::new(),
        model: Some(model.to_string()),
        messages,
    }
}

#[tokio::test]
async fn second_turn_resolves_same_chat_id_into_a_continued_context() {
    let cache = ContinuationCache::new();

    let first_surface = surface("local-model-yao_assistant1", vec![user_message("Hello")]);
    let assistant_id = resolve_assistant_id(&first_surface).unwrap();
    let first_resolution = resolve_chat_id(&first_surface, &cache);
    assert!(!first_resolution.continued);

    let first_ids = Identifiers {
        chat_id: first_resolution.chat_id.clone(),
        assistant_id: assistant_id.clone(),
        accept: "standard".to_string(),
        referer: "api".to_string(),
        ..Default::default()
    };
    let first_ctx = Context::new(first_ids, Arc::new(MemorySink::default()), Arc::new(NullPersistence));
    first_ctx
        .writer
        .send(agent_context::Envelope::new("text", json!({"content": "Hi"}), ""), None)
        .await
        .unwrap();
    first_ctx.release().await.unwrap();

    let second_surface = surface(
        "local-model-yao_assistant1",
        vec![user_message("Hello"), assistant_message("Hi"), user_message("Follow up")],
    );
    let second_resolution = resolve_chat_id(&second_surface, &cache);
    assert!(second_resolution.continued);
    assert_eq!(second_resolution.chat_id, first_resolution.chat_id);

    let second_ids = Identifiers {
        chat_id: second_resolution.chat_id,
        assistant_id,
        accept: "standard".to_string(),
        referer: "api".to_string(),
        ..Default::default()
    };
    let second_ctx = Context::new(second_ids.clone(), Arc::new(MemorySink::default()), Arc::new(NullPersistence));
    assert_eq!(second_ctx.ids.chat_id, first_resolution.chat_id);
}

#[tokio::test]
async fn diverging_opener_on_a_fresh_cache_gets_its_own_chat_id() {
    let cache = ContinuationCache::new();
    let a = surface("m-yao_a1", vec![user_message("Opener A")]);
    let b = surface("m-yao_a1", vec![user_message("Completely different opener")]);

    let ra = resolve_chat_id(&a, &cache);
    let rb = resolve_chat_id(&b, &cache);
    assert_ne!(ra.chat_id, rb.chat_id);
}

#[tokio::test]
async fn explicit_chat_id_query_param_short_circuits_continuation() {
    let cache = ContinuationCache::new();
    let mut request = surface("m-yao_a1", vec![user_message("Hello"), assistant_message("Hi"), user_message("More")]);
    request.query.insert("chat_id".to_string(), "pinned-id".to_string());
    let resolution = resolve_chat_id(&request, &cache);
    assert_eq!(resolution.chat_id, "pinned-id");
    assert!(resolution.continued);
}
