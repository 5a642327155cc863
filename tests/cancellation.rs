//! Cancelling a call: no events afterwards, connection and buffers released.

mod common;

use ai_stream_gateway::{CallState, ProviderId, UnifiedEvent, UnifiedRequest};
use common::{gateway_for_transport, sse_body, ScriptedTransport};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn openai() -> UnifiedRequest {
    UnifiedRequest::builder(ProviderId::OpenAi, "gpt-4o-mini")
        .user_message("Tell me a long story.")
        .build()
}

fn text_then_hang() -> Arc<ScriptedTransport> {
    let body = sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"Once"}}]}"#]);
    Arc::new(ScriptedTransport::new(vec![body]).then_hang())
}

#[tokio::test]
async fn cancel_after_first_chunk_stops_everything() {
    let transport = text_then_hang();
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();

    assert_eq!(events.next().await, Some(UnifiedEvent::text("Once")));
    assert!(events.probe().transport_open());

    events.cancel();

    assert_eq!(events.next().await, None);
    assert_eq!(events.state(), CallState::Cancelled);
    assert!(!events.probe().transport_open());
    assert_eq!(events.probe().pending_calls(), 0);
    assert!(transport.body_dropped());
}

#[tokio::test]
async fn cancel_handle_interrupts_a_pending_read() {
    let transport = text_then_hang();
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();
    assert_eq!(events.next().await, Some(UnifiedEvent::text("Once")));

    let handle = events.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    // The idle deadline is a full second; cancellation must win.
    let next = tokio::time::timeout(Duration::from_millis(500), events.next())
        .await
        .expect("cancellation did not interrupt the read");
    assert_eq!(next, None);
    assert_eq!(events.state(), CallState::Cancelled);
    assert!(transport.body_dropped());
    assert_eq!(events.next().await, None);
}

#[tokio::test]
async fn cancel_handle_releases_without_another_poll() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"Once"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":"{\"ci"}}]}}]}"#,
    ]);
    let transport = Arc::new(ScriptedTransport::new(vec![body]).then_hang());
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();

    assert_eq!(events.next().await, Some(UnifiedEvent::text("Once")));
    assert_eq!(events.probe().pending_calls(), 1);
    assert!(events.probe().transport_open());

    events.cancel_handle().cancel();

    // The stream is not polled again; release must already have happened.
    assert!(transport.body_dropped());
    assert_eq!(events.state(), CallState::Cancelled);
    assert!(!events.probe().transport_open());
    assert_eq!(events.probe().pending_calls(), 0);

    assert_eq!(events.next().await, None);
}

#[tokio::test]
async fn cancel_before_first_poll_never_connects() {
    let transport = text_then_hang();
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();

    events.cancel_handle().cancel();

    assert_eq!(events.next().await, None);
    assert_eq!(transport.opened(), 0);
    assert_eq!(events.state(), CallState::Cancelled);
}

#[tokio::test]
async fn cancel_discards_partial_function_call() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
    ]);
    let transport = Arc::new(ScriptedTransport::new(vec![body]).then_hang());
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();

    assert!(matches!(
        events.next().await,
        Some(UnifiedEvent::FunctionCallStarted { .. })
    ));
    assert!(matches!(
        events.next().await,
        Some(UnifiedEvent::FunctionCallArgumentDelta { .. })
    ));
    assert_eq!(events.probe().pending_calls(), 1);

    events.cancel();

    assert_eq!(events.next().await, None);
    assert_eq!(events.probe().pending_calls(), 0);
    assert!(!events.probe().transport_open());
}

#[tokio::test]
async fn dropping_the_stream_cancels() {
    let transport = text_then_hang();
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();
    assert_eq!(events.next().await, Some(UnifiedEvent::text("Once")));

    let probe = events.probe().clone();
    let handle = events.cancel_handle();
    drop(events);

    assert_eq!(probe.state(), CallState::Cancelled);
    assert!(!probe.transport_open());
    assert!(transport.body_dropped());
    assert!(handle.is_cancelled());
}

#[tokio::test]
async fn cancel_after_completion_keeps_completed_state() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"done"}}]}"#,
        "[DONE]",
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    let mut events = gateway.send(openai()).unwrap();
    while events.next().await.is_some() {}

    events.cancel();
    events.cancel_handle().cancel();
    assert_eq!(events.state(), CallState::Completed);
}

#[test]
fn cancelled_stream_is_ready_on_first_poll() {
    let transport = text_then_hang();
    let gateway = gateway_for_transport(transport.clone());
    let mut events = gateway.send(openai()).unwrap();
    events.cancel_handle().cancel();

    let mut next = tokio_test::task::spawn(events.next());
    tokio_test::assert_ready_eq!(next.poll(), None);
    assert_eq!(transport.opened(), 0);
}
