use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::plan::PlanResponse;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {0}")]
    Http(u16),
    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    stream: bool,
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
}

impl BackendClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// POST one query and decode whatever the backend sends back.
    pub async fn query(
        &self,
        url: &str,
        query: &str,
        stream: bool,
    ) -> Result<PlanResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .json(&QueryRequest { query, stream })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        debug!(%status, content_type = %content_type, "backend responded");

        if is_streamed(&content_type) {
            let text = read_streamed_text(response).await?;
            return Ok(PlanResponse::from_text(&text));
        }

        let value = match response.bytes().await {
            Ok(body) => serde_json::from_slice(&body).unwrap_or_else(|err| {
                warn!(error = %err, "response body is not JSON, treating it as empty");
                Value::Object(Map::new())
            }),
            Err(err) => {
                warn!(error = %err, "failed to read response body, treating it as empty");
                Value::Object(Map::new())
            }
        };
        Ok(PlanResponse::from_json(value))
    }
}

fn is_streamed(content_type: &str) -> bool {
    content_type.contains("text") || content_type.contains("event-stream")
}

/// Read the body to completion; the document is only parsed once it is whole.
async fn read_streamed_text(response: Response) -> Result<String, TransportError> {
    let mut decoder = Utf8Accumulator::default();
    let mut chunks = response.bytes_stream();
    let mut chunk_count = 0usize;

    while let Some(chunk) = chunks.next().await {
        decoder.push(&chunk?);
        chunk_count += 1;
    }

    debug!(chunk_count, "stream finished");
    Ok(decoder.finish())
}

/// Incremental UTF-8 decoder. A multi-byte sequence split across chunks is
/// held back until the rest arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    text: String,
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Incomplete sequence at the end, wait for the next chunk.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
    }

    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EMPTY_STREAM_TEXT;
    use axum::http::{header, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/query", addr)
    }

    fn client() -> BackendClient {
        BackendClient::new(Some(Duration::from_secs(10))).unwrap()
    }

    #[tokio::test]
    async fn test_request_body_shape() {
        let url = serve(Router::new().route(
            "/api/query",
            post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }),
        ))
        .await;

        let response = client().query(&url, "find a hotel", true).await.unwrap();
        assert_eq!(
            response,
            PlanResponse::RawJson(json!({"echo": {"query": "find a hotel", "stream": true}}))
        );
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let url = serve(Router::new().route(
            "/api/query",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        let err = client().query(&url, "hello", false).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(500)));
        assert_eq!(err.to_string(), "HTTP 500");
    }

    #[tokio::test]
    async fn test_json_body_is_decoded() {
        let url = serve(Router::new().route(
            "/api/query",
            post(|| async {
                Json(json!({
                    "candidates": [{"name": "A", "api_name": "a.run", "score": 0.5}]
                }))
            }),
        ))
        .await;

        let response = client().query(&url, "hello", false).await.unwrap();
        assert_eq!(response.kind(), "candidates");
    }

    #[tokio::test]
    async fn test_invalid_json_body_becomes_empty_object() {
        let url = serve(Router::new().route(
            "/api/query",
            post(|| async { ([(header::CONTENT_TYPE, "application/json")], "oops") }),
        ))
        .await;

        let response = client().query(&url, "hello", false).await.unwrap();
        assert_eq!(response, PlanResponse::RawJson(json!({})));
    }

    #[tokio::test]
    async fn test_streamed_json_is_parsed_whole() {
        let body = "{\n  \"plan\": {\n    \"steps\": [\n      {\"name\": \"s1\"}\n    ]\n  }\n}\n";
        let url = serve(Router::new().route(
            "/api/query",
            post(move || async move { ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body) }),
        ))
        .await;

        let response = client().query(&url, "hello", true).await.unwrap();
        assert_eq!(response.kind(), "plan");
    }

    #[tokio::test]
    async fn test_streamed_garbage_is_kept_as_text() {
        let url = serve(Router::new().route(
            "/api/query",
            post(|| async { ([(header::CONTENT_TYPE, "text/event-stream")], "  not json at all \n") }),
        ))
        .await;

        let response = client().query(&url, "hello", true).await.unwrap();
        assert_eq!(response, PlanResponse::RawText("not json at all".to_string()));
    }

    #[tokio::test]
    async fn test_streamed_empty_body() {
        let url = serve(Router::new().route(
            "/api/query",
            post(|| async { ([(header::CONTENT_TYPE, "text/plain")], "") }),
        ))
        .await;

        let response = client().query(&url, "hello", true).await.unwrap();
        assert_eq!(response, PlanResponse::RawText(EMPTY_STREAM_TEXT.to_string()));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client()
            .query(&format!("http://{}/api/query", addr), "hello", false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }

    #[test]
    fn test_accumulator_joins_split_sequences() {
        let bytes = "plan: café ✓".as_bytes();
        let mut decoder = Utf8Accumulator::default();
        // Split inside both the two-byte 'é' and the three-byte '✓'.
        let split_a = bytes.len() - 5;
        let split_b = bytes.len() - 1;
        decoder.push(&bytes[..split_a]);
        decoder.push(&bytes[split_a..split_b]);
        decoder.push(&bytes[split_b..]);
        assert_eq!(decoder.finish(), "plan: café ✓");
    }

    #[test]
    fn test_accumulator_replaces_invalid_bytes() {
        let mut decoder = Utf8Accumulator::default();
        decoder.push(b"ok \xff ok");
        decoder.push(&[0xe2, 0x9c]);
        assert_eq!(decoder.finish(), "ok \u{fffd} ok\u{fffd}");
    }
}
