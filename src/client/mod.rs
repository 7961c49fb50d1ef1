//! HTTP client for a running core server.

pub mod inference;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use inference::{InferenceInput, ModelFamily};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Registration loads the model, which can take a while for larger ones.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Server reported an error: {message}")]
    Rejected { message: String },

    #[error("Unreadable response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    model_id: &'a str,
    path: String,
}

pub struct CoreClient {
    client: reqwest::Client,
    base_url: String,
}

impl CoreClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ClientError::Http {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self { client, base_url })
    }

    pub fn for_port(port: u16) -> Result<Self, ClientError> {
        Self::new(format!("http://127.0.0.1:{}", port))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /models/register`. A body mentioning "error" fails even on 2xx.
    pub async fn register(&self, model_id: &str, path: &Path) -> Result<(), ClientError> {
        let url = format!("{}/models/register", self.base_url);
        let request = RegisterRequest {
            model_id,
            path: path.to_string_lossy().into_owned(),
        };
        let response = self
            .client
            .post(&url)
            .timeout(REGISTER_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        if body.to_lowercase().contains("error") {
            return Err(ClientError::Rejected { message: body });
        }
        tracing::debug!(model_id, "model registered");
        Ok(())
    }

    /// `POST /models/{id}/inference`; returns the decoded response body.
    pub async fn infer(&self, model_id: &str, input: &InferenceInput) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/models/{}/inference", self.base_url, model_id);
        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.clone(),
                source,
            })?;
        if value.get("status").and_then(|s| s.as_str()) == Some("error") {
            let message = value
                .get("message")
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                .unwrap_or_default();
            return Err(ClientError::Rejected { message });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::InferenceSize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    /// Answer one request with `status` and `body`; yields the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, JoinHandle<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_register_posts_model_and_path() {
        let (port, server) = serve_once("200 OK", r#"{"status":"ok"}"#).await;
        let client = CoreClient::for_port(port).unwrap();
        client
            .register("gpt2", Path::new("/cache/hf/distilgpt2/latest/model.onnx"))
            .await
            .unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /models/register"));
        assert!(request.contains(r#""model_id":"gpt2""#));
        assert!(request.contains("model.onnx"));
    }

    #[tokio::test]
    async fn test_register_body_error_is_failure() {
        let (port, _server) = serve_once("200 OK", r#"{"result":"Error: bad model"}"#).await;
        let client = CoreClient::for_port(port).unwrap();
        let err = client.register("gpt2", Path::new("/m.onnx")).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_inference_application_error() {
        let (port, _server) = serve_once("200 OK", r#"{"status":"error","message":"shape mismatch"}"#).await;
        let client = CoreClient::for_port(port).unwrap();
        let input = InferenceInput::for_model("gpt2", InferenceSize::Small);
        match client.infer("gpt2", &input).await {
            Err(ClientError::Rejected { message }) => assert_eq!(message, "shape mismatch"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inference_status_failure() {
        let (port, _server) = serve_once("500 Internal Server Error", "{}").await;
        let client = CoreClient::for_port(port).unwrap();
        let input = InferenceInput::for_model("bert", InferenceSize::Large);
        let err = client.infer("bert", &input).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_inference_success_returns_body() {
        let (port, server) = serve_once("200 OK", r#"{"status":"success","outputs":[0.1]}"#).await;
        let client = CoreClient::for_port(port).unwrap();
        let input = InferenceInput::for_model("t5", InferenceSize::Small);
        let value = client.infer("t5", &input).await.unwrap();
        assert_eq!(value["status"], "success");
        assert!(server.await.unwrap().starts_with("POST /models/t5/inference"));
    }
}
