//! Mock HTTP server tests for [`OllamaBackend`].
//!
//! Uses [`wiremock`] to stand up a local server emulating the Ollama API,
//! exercising the full request/response path without a real model runtime.
//!
//! Coverage:
//! - Successful chat with usage counts
//! - JSON-mode chat with fenced output
//! - Malformed JSON-mode output -> typed error
//! - 404 model not found
//! - 500 server error
//! - Empty completion -> response error
//! - Embedding round trip
//! - Probe success and failure

use std::time::Duration;

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gauntlet_llm::{BackendError, ChatMessage, ChatOptions, ModelBackend, OllamaBackend};

fn messages() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a test."),
        ChatMessage::user("Hello"),
    ]
}

fn options() -> ChatOptions {
    ChatOptions {
        temperature: 0.7,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn chat_success_with_usage() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "model": "mistral:7b",
        "message": {"role": "assistant", "content": "Hello there!"},
        "done": true,
        "prompt_eval_count": 42,
        "eval_count": 7
    });

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "mistral:7b",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let outcome = backend.chat("mistral:7b", &messages(), options()).await.unwrap();

    assert_eq!(outcome.text, "Hello there!");
    assert_eq!(outcome.model, "mistral:7b");
    assert_eq!(outcome.tokens_in, 42);
    assert_eq!(outcome.tokens_out, 7);
}

#[tokio::test]
async fn chat_json_pins_temperature_and_format() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "message": {"role": "assistant", "content": "{\"classification\": \"SAFE\", \"confidence\": 0.95}"},
        "prompt_eval_count": 30,
        "eval_count": 12
    });

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "format": "json",
            "options": {"temperature": 0.0}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let (value, outcome) = backend
        .chat_json("qwen2.5:0.5b", &messages(), options())
        .await
        .unwrap();

    assert_eq!(value["classification"], "SAFE");
    assert_eq!(outcome.tokens_out, 12);
}

#[tokio::test]
async fn chat_json_strips_fences() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "message": {"role": "assistant", "content": "```json\n{\"safe\": true}\n```"}
    });

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let (value, _) = backend
        .chat_json("qwen2.5:0.5b", &messages(), options())
        .await
        .unwrap();

    assert_eq!(value["safe"], true);
}

#[tokio::test]
async fn chat_json_malformed_is_typed_error() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "message": {"role": "assistant", "content": "the message looks safe to me"}
    });

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let result = backend.chat_json("qwen2.5:0.5b", &messages(), options()).await;

    assert!(matches!(result, Err(BackendError::MalformedJson(_))));
}

#[tokio::test]
async fn model_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let result = backend.chat("missing:1b", &messages(), options()).await;

    match result {
        Err(BackendError::Model(msg)) => assert!(msg.contains("missing:1b")),
        other => panic!("expected model error, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_is_model_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("cuda out of memory"))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let result = backend.chat("mistral:7b", &messages(), options()).await;

    assert!(matches!(result, Err(BackendError::Model(_))));
}

#[tokio::test]
async fn empty_completion_is_response_error() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "message": {"role": "assistant", "content": ""}
    });

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let result = backend.chat("mistral:7b", &messages(), options()).await;

    assert!(matches!(result, Err(BackendError::Response(_))));
}

#[tokio::test]
async fn embed_round_trip() {
    let server = MockServer::start().await;

    let body = serde_json::json!({ "embedding": [0.1, 0.2, 0.3] });

    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .and(body_partial_json(serde_json::json!({
            "model": "nomic-embed-text",
            "prompt": "some text"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    let vec = backend.embed("nomic-embed-text", "some text").await.unwrap();

    assert_eq!(vec.len(), 3);
    assert!((vec[0] - 0.1).abs() < f32::EPSILON);
}

#[tokio::test]
async fn probe_reports_liveness() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri());
    assert!(backend.probe().await);

    // Unreachable server probes false.
    let dead = OllamaBackend::new("http://127.0.0.1:1");
    assert!(!dead.probe().await);
}
