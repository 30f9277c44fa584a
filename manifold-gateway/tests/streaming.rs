//! Streaming translation tests: upstream dialect streams in, canonical SSE
//! frames out, `data: [DONE]` at the end.

mod common;

use common::{auto_route, provider, test_server};
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(|data| serde_json::from_str(data).expect("frame must be JSON"))
        .collect()
}

fn streaming_request(model: &str) -> Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "tell me a story"}],
        "stream": true
    })
}

#[tokio::test]
async fn anthropic_events_become_canonical_chunks() {
    let events = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\",\"model\":\"claude-3-5-sonnet-20241022\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Once\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" upon\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" a time\"}}\n",
        "\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n",
        "\n",
    );

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(events),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let server = test_server(
        vec![provider(
            "p1",
            "anthropic",
            &upstream.uri(),
            &["claude-3-5-sonnet-20241022"],
        )],
        vec![auto_route("default", &["claude-3-5-sonnet-20241022"])],
    )
    .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&streaming_request("default"))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = response.text();
    assert!(body.trim_end().ends_with("data: [DONE]"));

    let frames = sse_frames(&body);
    // Opening role chunk, three content chunks, terminal chunk
    assert_eq!(frames.len(), 5);
    assert_eq!(frames[0]["choices"][0]["delta"]["role"], "assistant");

    let content: String = frames
        .iter()
        .filter_map(|f| f["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Once upon a time");

    let last = frames.last().unwrap();
    assert_eq!(last["object"], "chat.completion.chunk");
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(last["choices"][0]["delta"], serde_json::json!({}));
    assert_eq!(frames[1]["id"], "msg_01");
}

#[tokio::test]
async fn gemini_json_array_becomes_canonical_chunks() {
    let array_body = concat!(
        "[{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}],\"role\":\"model\"}}]},\n",
        "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" there\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}]\n",
    );

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:streamGenerateContent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(array_body),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let server = test_server(
        vec![provider(
            "p1",
            "gemini",
            &upstream.uri(),
            &["gemini-1.5-flash"],
        )],
        vec![auto_route("default", &["gemini-1.5-flash"])],
    )
    .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&streaming_request("default"))
        .await;
    response.assert_status_ok();

    let body = response.text();
    let frames = sse_frames(&body);

    assert_eq!(frames[0]["choices"][0]["delta"]["role"], "assistant");
    let content: String = frames
        .iter()
        .filter_map(|f| f["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hi there");
    assert_eq!(
        frames.last().unwrap()["choices"][0]["finish_reason"],
        "stop"
    );
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn openai_chunks_pass_through_reframed() {
    let events = concat!(
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"pass\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(events),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let server = test_server(
        vec![provider("p1", "openai", &upstream.uri(), &["m"])],
        vec![auto_route("default", &["m"])],
    )
    .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&streaming_request("default"))
        .await;
    response.assert_status_ok();

    let frames = sse_frames(&response.text());
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1]["choices"][0]["delta"]["content"], "pass");
    assert_eq!(frames[2]["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn streaming_fails_over_before_the_first_frame() {
    let bad = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&bad)
        .await;

    let events = concat!(
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"},\"finish_reason\":null}]}\n\n",
        "data: [DONE]\n\n",
    );
    let good = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(events),
        )
        .expect(1)
        .mount(&good)
        .await;

    let server = test_server(
        vec![
            provider("p1", "first", &bad.uri(), &["m"]),
            provider("p2", "second", &good.uri(), &["m"]),
        ],
        vec![auto_route("default", &["m"])],
    )
    .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&streaming_request("default"))
        .await;
    response.assert_status_ok();

    let frames = sse_frames(&response.text());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["choices"][0]["delta"]["content"], "ok");
}

#[tokio::test]
async fn mid_stream_error_closes_with_error_frame_then_done() {
    // A malformed record after valid chunks forces a mid-stream failure
    let events = concat!(
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"start\"},\"finish_reason\":null}]}\n\n",
        "data: {not json}\n\n",
    );

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(events),
        )
        .mount(&upstream)
        .await;

    let server = test_server(
        vec![provider("p1", "openai", &upstream.uri(), &["m"])],
        vec![auto_route("default", &["m"])],
    )
    .await;

    let response = server
        .post("/v1/chat/completions")
        .json(&streaming_request("default"))
        .await;
    // Status was already 200 when the failure happened
    response.assert_status_ok();

    let body = response.text();
    let frames = sse_frames(&body);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["choices"][0]["delta"]["content"], "start");
    assert!(frames[1]["error"]["message"].is_string());
    assert_eq!(frames[1]["error"]["type"], "adapter_error");
    assert!(body.trim_end().ends_with("data: [DONE]"));
}
