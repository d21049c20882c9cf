//! Streaming turn event taxonomy and ordering.

mod common;

use common::*;
use std::sync::Arc;
use tianji_engine::error::UpstreamError;
use tianji_engine::tool::Tool;
use tianji_engine::TurnEvent;

async fn collect(mut rx: tokio::sync::mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn plain_turn_streams_status_content_done() {
    let provider = Arc::new(MockProvider::new().reply("今天宜出行，忌动土。"));
    let engine = Arc::new(engine_with(Arc::clone(&provider), vec![]));

    let events = collect(engine.run_turn_streaming(turn_request("conv-1", "今天运势"))).await;

    assert!(matches!(events.first(), Some(TurnEvent::Status { .. })));
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Content { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "今天宜出行，忌动土。");
    match events.last() {
        Some(TurnEvent::Done {
            reply,
            tool_invocations,
        }) => {
            assert_eq!(reply, "今天宜出行，忌动土。");
            assert!(tool_invocations.is_empty());
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_invocations_are_bracketed_by_start_and_end_events() {
    let provider = Arc::new(
        MockProvider::new()
            .tool_call("c1", "almanac", "{}")
            .reply("黄历显示今日大吉。"),
    );
    let tool = Arc::new(MockTool::new("almanac"));
    let engine = Arc::new(engine_with(Arc::clone(&provider), vec![tool as Arc<dyn Tool>]));

    let events = collect(engine.run_turn_streaming(turn_request("conv-1", "查黄历"))).await;

    let start = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolCallStart { tool_name } if tool_name == "almanac"))
        .expect("missing ToolCallStart");
    let end = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolCallEnd { tool_name, success: true, .. } if tool_name == "almanac"))
        .expect("missing ToolCallEnd");
    assert!(start < end);

    match events.last() {
        Some(TurnEvent::Done {
            reply,
            tool_invocations,
        }) => {
            assert_eq!(reply, "黄历显示今日大吉。");
            assert_eq!(tool_invocations.len(), 1);
            assert_eq!(tool_invocations[0].tool_name, "almanac");
            assert!(tool_invocations[0].result_preview.contains("almanac的结果"));
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn gateway_failure_ends_the_stream_with_an_error_event() {
    let provider = Arc::new(
        MockProvider::new().error(UpstreamError::provider(Some(503), "service unavailable")),
    );
    let engine = Arc::new(engine_with(Arc::clone(&provider), vec![]));

    let events = collect(engine.run_turn_streaming(turn_request("conv-1", "你好"))).await;

    assert!(matches!(events.first(), Some(TurnEvent::Status { .. })));
    assert!(matches!(events.last(), Some(TurnEvent::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, TurnEvent::Done { .. })));
}
