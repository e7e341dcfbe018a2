//! HTTP transport to the dialogue backend service.

use super::{BackendRequest, DialogueBackend};
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::DialogueResponse;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Response body of `POST /agent`.
#[derive(Debug, Deserialize)]
struct AgentReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(default, rename = "fromMock")]
    from_mock: bool,
}

/// Posts `{message, agent, history?}` to `{base_url}/agent`.
pub struct HttpDialogueBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDialogueBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/agent", self.base_url)
    }
}

#[async_trait]
impl DialogueBackend for HttpDialogueBackend {
    async fn send(&self, request: &BackendRequest) -> Result<DialogueResponse> {
        let url = self.endpoint();
        debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SpeechError::Dialogue(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Dialogue(format!("HTTP {status}: {body}")));
        }

        let reply: AgentReply = response
            .json()
            .await
            .map_err(|e| SpeechError::Dialogue(format!("malformed reply: {e}")))?;

        match reply.response {
            Some(text) if !text.trim().is_empty() => Ok(DialogueResponse {
                text: text.trim().to_owned(),
                from_mock: reply.from_mock,
            }),
            _ => Err(SpeechError::Dialogue("reply has no response text".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(message: &str) -> BackendRequest {
        BackendRequest {
            message: message.into(),
            agent: "main".into(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn posts_message_and_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent"))
            .and(body_json(json!({"message": "hello", "agent": "main"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": " Hi there ", "fromMock": false})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpDialogueBackend::new(&format!("{}/", server.uri()));
        let reply = backend.send(&request("hello")).await.unwrap();
        assert_eq!(reply.text, "Hi there");
        assert!(!reply.from_mock);
    }

    #[tokio::test]
    async fn service_side_fallback_flag_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "canned", "fromMock": true})),
            )
            .mount(&server)
            .await;

        let reply = HttpDialogueBackend::new(&server.uri())
            .send(&request("x"))
            .await
            .unwrap();
        assert!(reply.from_mock);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = HttpDialogueBackend::new(&server.uri())
            .send(&request("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"), "{err}");
    }

    #[tokio::test]
    async fn missing_or_blank_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "  "})))
            .mount(&server)
            .await;
        let backend = HttpDialogueBackend::new(&server.uri());
        assert!(backend.send(&request("x")).await.is_err());

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"other": 1})))
            .mount(&server)
            .await;
        let backend = HttpDialogueBackend::new(&server.uri());
        assert!(backend.send(&request("x")).await.is_err());
    }

    #[tokio::test]
    async fn non_json_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let err = HttpDialogueBackend::new(&server.uri())
            .send(&request("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error() {
        let backend = HttpDialogueBackend::new("http://127.0.0.1:1");
        assert!(backend.send(&request("x")).await.is_err());
    }

    #[tokio::test]
    async fn second_request_carries_first_exchange() {
        use crate::config::DialogueConfig;
        use crate::dialogue::DialogueClient;
        use std::sync::Arc;
        use std::time::Duration;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent"))
            .and(body_json(json!({
                "message": "and tomorrow",
                "agent": "main",
                "history": [
                    {"role": "user", "content": "weather today"},
                    {"role": "assistant", "content": "Sunny."}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Rain."})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent"))
            .and(body_json(json!({"message": "weather today", "agent": "main"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Sunny."})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = Arc::new(HttpDialogueBackend::new(&server.uri()));
        let mut client = DialogueClient::new(backend, &DialogueConfig::default(), "en-US");
        let t = Duration::from_secs(5);
        let first = client.dispatch("main", "weather today", t).await.unwrap();
        assert_eq!(first.text, "Sunny.");
        let second = client.dispatch("main", "and tomorrow", t).await.unwrap();
        assert_eq!(second.text, "Rain.");
        assert!(!second.from_mock);
    }
}
