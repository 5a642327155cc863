//! Gateway calls over a scripted transport: reassembly, chunking, deadlines.
//!
//! Run with: cargo test --test streaming_calls

mod common;

use ai_stream_gateway::{
    CallState, Error, ErrorKind, FinishReason, GatewayConfig, MemoryCredentialStore, ProviderId,
    UnifiedEvent, UnifiedRequest,
};
use common::{
    collect, gateway_for_transport, gateway_with_store, sse_body, sse_events, transport_gateway,
    ScriptedTransport, SECRET,
};
use serde_json::json;
use std::sync::Arc;

fn request(provider: ProviderId, model: &str) -> UnifiedRequest {
    UnifiedRequest::builder(provider, model)
        .user_message("What is the weather in Tokyo?")
        .build()
}

fn openai() -> UnifiedRequest {
    request(ProviderId::OpenAi, "gpt-4o-mini")
}

/// One tool call whose arguments arrive as five fragments.
fn five_fragment_tool_call() -> Vec<String> {
    let frames = [
        r#"{"choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"get_weather","arguments":""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"lo"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"cation"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\": \"To"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"kyo\", "}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"unit\": \"c\"}"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ];
    frames.iter().map(|f| sse_body(&[*f])).collect()
}

fn completed(events: &[UnifiedEvent]) -> Vec<&UnifiedEvent> {
    events
        .iter()
        .filter(|e| matches!(e, UnifiedEvent::FunctionCallCompleted { .. }))
        .collect()
}

#[tokio::test]
async fn fragmented_arguments_complete_once() {
    let transport = Arc::new(ScriptedTransport::new(five_fragment_tool_call()));
    let gateway = gateway_for_transport(transport.clone());
    let events = collect(gateway.send(openai()).unwrap()).await;

    assert_eq!(
        events[0],
        UnifiedEvent::FunctionCallStarted {
            call_id: "call_abc".into(),
            name: "get_weather".into(),
        }
    );
    let deltas: String = events
        .iter()
        .filter_map(|e| match e {
            UnifiedEvent::FunctionCallArgumentDelta { partial_text, .. } => Some(partial_text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, r#"{"location": "Tokyo", "unit": "c"}"#);

    let done = completed(&events);
    assert_eq!(done.len(), 1);
    match done[0] {
        UnifiedEvent::FunctionCallCompleted {
            call_id,
            name,
            arguments,
        } => {
            assert_eq!(call_id, "call_abc");
            assert_eq!(name, "get_weather");
            assert_eq!(arguments["location"], "Tokyo");
            assert_eq!(arguments["unit"], "c");
        }
        _ => unreachable!(),
    }
    assert_eq!(
        events.last(),
        Some(&UnifiedEvent::ended(FinishReason::ToolCall))
    );
    assert_eq!(transport.opened(), 1);
}

#[tokio::test]
async fn invalid_arguments_fail_the_stream() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_bad","function":{"name":"get_weather","arguments":"{\"city\": \"Oslo\""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    let stream = gateway.send(openai()).unwrap();
    let probe = stream.probe().clone();
    let events = collect(stream).await;

    assert!(completed(&events).is_empty());
    match events.last() {
        Some(UnifiedEvent::StreamFailed { kind, message }) => {
            assert_eq!(*kind, ErrorKind::FunctionCallParse);
            assert!(message.contains("call_bad"), "{}", message);
        }
        other => panic!("expected StreamFailed, got {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(probe.state(), CallState::Failed);
    assert_eq!(probe.pending_calls(), 0);
}

#[tokio::test]
async fn events_do_not_depend_on_chunk_boundaries() {
    let body = five_fragment_tool_call().concat();
    let whole = collect(
        gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body.clone()])))
            .send(openai())
            .unwrap(),
    )
    .await;

    for size in [1, 2, 3, 7, 64] {
        let transport = Arc::new(ScriptedTransport::chunked(&body, size));
        let events = collect(gateway_for_transport(transport).send(openai()).unwrap()).await;
        assert_eq!(events, whole, "chunk size {}", size);
    }
}

#[tokio::test]
async fn crlf_framing_matches_lf_framing() {
    let lf = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);
    let crlf = lf.replace('\n', "\r\n");
    let a = collect(
        gateway_for_transport(Arc::new(ScriptedTransport::new(vec![lf])))
            .send(openai())
            .unwrap(),
    )
    .await;
    let b = collect(
        gateway_for_transport(Arc::new(ScriptedTransport::chunked(&crlf, 5)))
            .send(openai())
            .unwrap(),
    )
    .await;
    assert_eq!(a, b);
    assert_eq!(a, vec![UnifiedEvent::text("Hi"), UnifiedEvent::ended(FinishReason::Stop)]);
}

#[tokio::test]
async fn close_without_marker_ends_with_stop() {
    let body = sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"partial"}}]}"#]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    let stream = gateway.send(openai()).unwrap();
    let probe = stream.probe().clone();

    assert_eq!(
        collect(stream).await,
        vec![UnifiedEvent::text("partial"), UnifiedEvent::ended(FinishReason::Stop)]
    );
    assert_eq!(probe.state(), CallState::Completed);
}

#[tokio::test]
async fn close_with_buffered_call_flushes_it() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":"{\"q\":"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]}}]}"#,
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    let events = collect(gateway.send(openai()).unwrap()).await;

    assert_eq!(completed(&events).len(), 1);
    assert_eq!(
        events.last(),
        Some(&UnifiedEvent::ended(FinishReason::ToolCall))
    );
}

#[tokio::test]
async fn nothing_after_terminal_event() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"a"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"length"}]}"#,
        "[DONE]",
        r#"{"choices":[{"index":0,"delta":{"content":"late"}}]}"#,
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    assert_eq!(
        collect(gateway.send(openai()).unwrap()).await,
        vec![UnifiedEvent::text("a"), UnifiedEvent::ended(FinishReason::Length)]
    );
}

#[tokio::test]
async fn in_stream_provider_error() {
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
        r#"{"error":{"message":"The server is overloaded"}}"#,
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    assert_eq!(
        collect(gateway.send(openai()).unwrap()).await,
        vec![
            UnifiedEvent::text("Hel"),
            UnifiedEvent::failed(ErrorKind::Provider, "The server is overloaded"),
        ]
    );
}

#[tokio::test]
async fn malformed_frame_is_a_protocol_failure() {
    let body = sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"#]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    let events = collect(gateway.send(openai()).unwrap()).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        UnifiedEvent::StreamFailed { kind: ErrorKind::Protocol, .. }
    ));
}

#[tokio::test]
async fn oversized_line_fails_the_stream() {
    let mut chunks = vec![sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}]}"#])];
    // A line that never ends, fed in pieces.
    chunks.push("data: ".to_string());
    chunks.extend(std::iter::repeat("x".repeat(256)).take(8));
    let transport = Arc::new(ScriptedTransport::new(chunks).then_hang());
    let config = GatewayConfig {
        max_frame_bytes: 1024,
        ..GatewayConfig::default()
    };
    let gateway = transport_gateway(transport.clone(), common::all_keys(), config);
    let events = gateway.send(openai()).unwrap();
    let view = events.probe().clone();
    let got = collect(events).await;

    assert_eq!(got.len(), 2);
    assert_eq!(got[0], UnifiedEvent::text("Hi"));
    match &got[1] {
        UnifiedEvent::StreamFailed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Protocol);
            assert!(message.contains("exceeds 1024 bytes"), "{}", message);
        }
        other => panic!("expected StreamFailed, got {:?}", other),
    }
    assert_eq!(view.state(), CallState::Failed);
    assert!(transport.body_dropped());
}

#[tokio::test]
async fn error_body_echoing_the_key_is_redacted() {
    let body = format!(r#"{{"error":{{"message":"Incorrect API key provided: {}"}}}}"#, SECRET);
    let transport = Arc::new(ScriptedTransport::new(vec![body]).with_status(401));
    let gateway = gateway_for_transport(transport);
    let events = collect(gateway.send(openai()).unwrap()).await;

    assert_eq!(
        events,
        vec![UnifiedEvent::failed(
            ErrorKind::Http,
            "Incorrect API key provided: [REDACTED]"
        )]
    );
}

#[tokio::test]
async fn stored_key_with_trailing_newline_is_sent_and_redacted_trimmed() {
    let key = "sk-live-abc123";
    let body = format!(r#"{{"error":{{"message":"Incorrect API key provided: {}"}}}}"#, key);
    let transport = Arc::new(ScriptedTransport::new(vec![body]).with_status(401));
    let store = MemoryCredentialStore::with(&[(ProviderId::OpenAi, "sk-live-abc123\n")]);
    let gateway = gateway_with_store(transport.clone(), store);
    let events = collect(gateway.send(openai()).unwrap()).await;

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.header("authorization"), Some("Bearer sk-live-abc123"));
    assert_eq!(
        events,
        vec![UnifiedEvent::failed(
            ErrorKind::Http,
            "Incorrect API key provided: [REDACTED]"
        )]
    );
}

#[tokio::test]
async fn outbound_request_carries_auth_and_body() {
    let body = sse_body(&[r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#]);
    let transport = Arc::new(ScriptedTransport::new(vec![body]));
    let gateway = gateway_for_transport(transport.clone());
    let req = UnifiedRequest::builder(ProviderId::OpenAi, "gpt-4o-mini")
        .system_prompt("You are terse.")
        .user_message("Say hi.")
        .temperature(0.2)
        .build();
    collect(gateway.send(req).unwrap()).await;

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.url.as_str(), "https://api.openai.com/v1/chat/completions");
    assert_eq!(sent.header("authorization"), Some(format!("Bearer {}", SECRET).as_str()));
    assert_eq!(sent.header("accept"), Some("text/event-stream"));
    assert!(!format!("{:?}", sent).contains(SECRET));

    let json = sent.body_json().unwrap();
    assert_eq!(json["stream"], true);
    assert_eq!(json["temperature"], 0.2);
    assert_eq!(json["messages"][0], json!({"role": "system", "content": "You are terse."}));
}

#[tokio::test]
async fn anthropic_tool_use_reassembles() {
    let body = sse_events(&[
        ("message_start", r#"{"type":"message_start","message":{"id":"msg_1"}}"#),
        ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
        ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Checking."}}"#),
        ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
        ("content_block_start", r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}}"#),
        ("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}"#),
        ("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":" \"Tokyo\"}"}}"#),
        ("content_block_stop", r#"{"type":"content_block_stop","index":1}"#),
        ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#),
        ("message_stop", r#"{"type":"message_stop"}"#),
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::chunked(&body, 13)));
    let response = gateway
        .send(request(ProviderId::Anthropic, "claude-3-5-sonnet-latest"))
        .unwrap()
        .collect_response()
        .await
        .unwrap();

    assert_eq!(response.text, "Checking.");
    assert_eq!(response.finish_reason, Some(FinishReason::ToolCall));
    assert_eq!(response.function_calls.len(), 1);
    assert_eq!(response.function_calls[0].call_id, "toolu_1");
    assert_eq!(response.function_calls[0].arguments["city"], "Tokyo");
}

#[tokio::test]
async fn gemini_function_call_arrives_whole() {
    let body = sse_body(&[
        r#"{"candidates":[{"content":{"role":"model","parts":[{"functionCall":{"name":"get_weather","args":{"city":"Tokyo"}}}]},"finishReason":"STOP"}]}"#,
    ]);
    let gateway = gateway_for_transport(Arc::new(ScriptedTransport::new(vec![body])));
    let events = collect(
        gateway
            .send(request(ProviderId::Gemini, "gemini-2.0-flash"))
            .unwrap(),
    )
    .await;

    assert_eq!(completed(&events).len(), 1);
    assert_eq!(
        events.last(),
        Some(&UnifiedEvent::ended(FinishReason::ToolCall))
    );
}

#[tokio::test]
async fn collect_response_surfaces_failure_as_error() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![r#"{"error":{"message":"quota exceeded"}}"#.to_string()])
            .with_status(429),
    );
    let gateway = gateway_for_transport(transport);
    let err = gateway
        .send(openai())
        .unwrap()
        .collect_response()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Stream { kind: ErrorKind::Http, ref message } if message == "quota exceeded"
    ));
}

#[tokio::test]
async fn concurrent_calls_are_independent() {
    let a = Arc::new(ScriptedTransport::new(vec![sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"one"}}]}"#,
        "[DONE]",
    ])]));
    let b = Arc::new(ScriptedTransport::new(vec![sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"two"}}]}"#,
        "[DONE]",
    ])]));
    let ga = gateway_for_transport(a);
    let gb = gateway_for_transport(b);

    let (ra, rb) = tokio::join!(
        ga.send(openai()).unwrap().collect_response(),
        gb.send(openai()).unwrap().collect_response(),
    );
    assert_eq!(ra.unwrap().text, "one");
    assert_eq!(rb.unwrap().text, "two");
}

#[tokio::test(start_paused = true)]
async fn first_byte_deadline_fails_the_call() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()).hang_on_open());
    let gateway = gateway_for_transport(transport);
    let stream = gateway.send(openai()).unwrap();
    let probe = stream.probe().clone();
    let events = collect(stream).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        UnifiedEvent::StreamFailed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Network);
            assert!(message.contains("time to first byte"), "{}", message);
        }
        other => panic!("expected StreamFailed, got {:?}", other),
    }
    assert_eq!(probe.state(), CallState::Failed);
}

#[tokio::test(start_paused = true)]
async fn headers_without_body_hit_first_byte_deadline() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()).then_hang());
    let gateway = gateway_for_transport(transport.clone());
    let events = collect(gateway.send(openai()).unwrap()).await;

    assert!(matches!(
        &events[..],
        [UnifiedEvent::StreamFailed { kind: ErrorKind::Network, message }] if message.contains("time to first byte")
    ));
    assert!(transport.body_dropped());
}

#[tokio::test(start_paused = true)]
async fn idle_deadline_fails_after_partial_output() {
    let body = sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}]}"#]);
    let transport = Arc::new(ScriptedTransport::new(vec![body]).then_hang());
    let gateway = gateway_for_transport(transport.clone());
    let events = collect(gateway.send(openai()).unwrap()).await;

    assert_eq!(events[0], UnifiedEvent::text("Hi"));
    match &events[1] {
        UnifiedEvent::StreamFailed { kind, message } => {
            assert_eq!(*kind, ErrorKind::Network);
            assert!(message.contains("idle read"), "{}", message);
        }
        other => panic!("expected StreamFailed, got {:?}", other),
    }
    assert_eq!(events.len(), 2);
    assert!(transport.body_dropped());
}
