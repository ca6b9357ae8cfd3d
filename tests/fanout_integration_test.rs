//! Fan-out coordinators exercised against Context-shaped producers: a
//! sub_context writer feeding a result, a real Tool execution, and a
//! scripted connector, rather than bare async closures.

use agent_context::{
    all, any, race, tool, Context, FanoutRequest, Identifiers, MemorySink, NullPersistence,
};
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn identifiers() -> Identifiers {
    Identifiers {
        chat_id: "chat-fanout".to_string(),
        assistant_id: "asst-fanout".to_string(),
        accept: "standard".to_string(),
        referer: "api".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn all_runs_tool_and_sub_agent_producers_and_preserves_order() {
    let ctx = Context::new(identifiers(), Arc::new(MemorySink::default()), Arc::new(NullPersistence));

    let echo = tool("echo", "echoes its input").build(|args| async move { Ok(args) });

    let sub = ctx.sub_context();
    let tool_req = FanoutRequest::new(
        "echo",
        Box::pin({
            let echo = echo.clone();
            async move { echo.execute(json!({"value": 1})).await }
        }),
    );
    let agent_req = FanoutRequest::new(
        "sub-agent",
        Box::pin(async move {
            sub.writer
                .send(agent_context::Envelope::new("text", json!({"content": "done"}), ""), None)
                .await?;
            Ok(json!({"content": "done"}))
        }),
    );

    let results = all(vec![tool_req, agent_req]).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(results[0].content, Some(json!({"value": 1})));
    assert_eq!(results[1].content, Some(json!({"content": "done"})));

    // sub_context suppresses direct output but still mirrors into the
    // shared chat buffer (spec §4.4 "Output-stream safety").
    assert_eq!(ctx.buffer.message_count().await, 1);
}

#[tokio::test]
async fn any_prefers_first_successful_connector_and_cancels_sibling() {
    use agent_context::{ConnectorChunk, LlmConnector, ScriptedConnector};

    let slow = ScriptedConnector::new(vec![ConnectorChunk::TextDelta("slow".into()), ConnectorChunk::Done]);
    let fast_err_then_ok = ScriptedConnector::new(vec![ConnectorChunk::TextDelta("fast".into()), ConnectorChunk::Done]);

    let token = Arc::new(AtomicBool::new(false));
    let reqs = vec![
        FanoutRequest::new("slow", Box::pin(async move {
            let mut stream = slow.stream(vec![], vec![]).await?;
            use futures::StreamExt;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                if let ConnectorChunk::TextDelta(d) = chunk? {
                    text.push_str(&d);
                }
            }
            Ok(json!({"content": text}))
        })),
        FanoutRequest::new("fast", Box::pin(async move {
            let mut stream = fast_err_then_ok.stream(vec![], vec![]).await?;
            use futures::StreamExt;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                if let ConnectorChunk::TextDelta(d) = chunk? {
                    text.push_str(&d);
                }
            }
            Ok(json!({"content": text}))
        })),
    ];

    let results = any(reqs, token.clone()).await;
    assert!(results.iter().any(|r| r.is_ok()));
    assert!(token.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn race_between_two_tools_returns_exactly_one_result() {
    let a = tool("a", "tool a").build(|_| async move { Ok(json!("a-result")) });
    let b = tool("b", "tool b").build(|_| async move { Ok(json!("b-result")) });

    let token = Arc::new(AtomicBool::new(false));
    let reqs = vec![
        FanoutRequest::new("a", Box::pin({
            let a = a.clone();
            async move { a.execute(json!({})).await }
        })),
        FanoutRequest::new("b", Box::pin({
            let b = b.clone();
            async move { b.execute(json!({})).await }
        })),
    ];

    let result = race(reqs, token.clone()).await;
    assert!(result.is_some());
    assert!(token.load(std::sync::atomic::Ordering::SeqCst));
}
