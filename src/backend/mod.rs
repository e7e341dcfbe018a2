//! Dialogue backend service.
//!
//! A small HTTP front for an agent CLI: the voice core posts a transcript to
//! `POST /agent` and always gets `{response, fromMock}` back. When the agent
//! cannot answer, the reply is a local fallback utterance flagged with
//! `fromMock: true`.

mod agent;

pub use agent::{AgentRunner, CommandAgentRunner, clean_agent_output, pick_answer};

use crate::config::{BackendConfig, FallbackPolicy};
use crate::dialogue::{FallbackResponder, HistoryEntry, Role};
use crate::error::{Result, SpeechError};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SERVICE_NAME: &str = "xiaot-backend";

#[derive(Clone)]
struct AppState {
    runner: Arc<dyn AgentRunner>,
    default_agent: String,
    fallback: Arc<Mutex<FallbackResponder>>,
}

#[derive(Debug, Deserialize)]
struct AgentRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub response: String,
    pub from_mock: bool,
}

/// Build the service router around `runner`.
///
/// `locale` picks the fallback template language.
pub fn router(runner: Arc<dyn AgentRunner>, config: &BackendConfig, locale: &str) -> Router {
    let state = AppState {
        runner,
        default_agent: config.default_agent.clone(),
        fallback: Arc::new(Mutex::new(FallbackResponder::new(
            &FallbackPolicy::Rotation,
            locale,
        ))),
    };

    Router::new()
        .route("/", get(describe))
        .route("/health", get(health))
        .route("/agent", post(agent))
        .fallback(not_found)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": SERVICE_NAME}))
}

async fn describe() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "endpoints": {
            "/health": "health check (GET)",
            "/agent": "send a message to the agent (POST {message, agent?, history?})"
        }
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

async fn agent(
    State(state): State<AppState>,
    body: std::result::Result<Json<AgentRequest>, JsonRejection>,
) -> axum::response::Response {
    let Ok(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON"})),
        )
            .into_response();
    };

    let message = body.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message is required"})),
        )
            .into_response();
    }
    let agent = body
        .agent
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(&state.default_agent);

    info!(agent, history = body.history.len(), "agent request: {message:?}");
    let prompt = build_prompt(message, &body.history);
    let reply = match state.runner.ask(agent, &prompt).await {
        Ok(text) => AgentResponse {
            response: text,
            from_mock: false,
        },
        Err(e) => {
            warn!("agent unavailable, answering with fallback: {e}");
            let text = match state.fallback.lock() {
                Ok(mut fallback) => fallback.respond(message),
                Err(_) => message.to_owned(),
            };
            AgentResponse {
                response: text,
                from_mock: true,
            }
        }
    };
    (StatusCode::OK, Json(reply)).into_response()
}

/// Prefix `message` with the conversation so far. No history, no prefix.
pub fn build_prompt(message: &str, history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return message.to_owned();
    }
    let mut prompt = String::from("对话历史：\n");
    for entry in history {
        let speaker = match entry.role {
            Role::User => "用户",
            Role::Assistant => "小T",
        };
        prompt.push_str(speaker);
        prompt.push('：');
        prompt.push_str(entry.content.trim());
        prompt.push('\n');
    }
    prompt.push_str("\n用户最新问题：");
    prompt.push_str(message);
    prompt
}

/// A running backend service.
pub struct BackendServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl BackendServer {
    /// Bind `config.bind_addr` (port `0` picks a free port) and serve in a
    /// background task.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Backend`] if the listener cannot bind.
    pub async fn start(
        runner: Arc<dyn AgentRunner>,
        config: &BackendConfig,
        locale: &str,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| SpeechError::Backend(format!("bind {} failed: {e}", config.bind_addr)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SpeechError::Backend(format!("failed to get local addr: {e}")))?;
        let app = router(runner, config, locale);

        info!("{SERVICE_NAME} listening on http://{addr}");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("backend server error: {e}");
            }
        });
        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL suitable for [`crate::dialogue::HttpDialogueBackend`].
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }

    /// Wait for the server task to end.
    pub async fn wait(mut self) {
        let _ = (&mut self.handle).await;
    }
}

impl Drop for BackendServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use async_trait::async_trait;

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl AgentRunner for Canned {
        async fn ask(&self, agent: &str, message: &str) -> Result<String> {
            match self.0 {
                Some(prefix) => Ok(format!("{prefix} [{agent}] {message}")),
                None => Err(SpeechError::Backend("agent command 'openclaw' not found".into())),
            }
        }
    }

    async fn serve(runner: Canned) -> BackendServer {
        let config = BackendConfig {
            bind_addr: "127.0.0.1:0".into(),
            ..BackendConfig::default()
        };
        BackendServer::start(Arc::new(runner), &config, "en-US")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let server = serve(Canned(Some("hi"))).await;
        let body: serde_json::Value = reqwest::get(format!("{}/health", server.url()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn agent_answers_with_default_agent() {
        let server = serve(Canned(Some("reply"))).await;
        let reply: AgentResponse = reqwest::Client::new()
            .post(format!("{}/agent", server.url()))
            .json(&json!({"message": "what time is it"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply.response, "reply [main] what time is it");
        assert!(!reply.from_mock);
    }

    #[tokio::test]
    async fn agent_failure_returns_fallback() {
        let server = serve(Canned(None)).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/agent", server.url()))
            .json(&json!({"message": "turn on the lights", "agent": "home"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let reply: AgentResponse = resp.json().await.unwrap();
        assert!(reply.from_mock);
        assert!(reply.response.contains("turn on the lights"));
    }

    #[tokio::test]
    async fn bad_requests_are_rejected() {
        let server = serve(Canned(Some("x"))).await;
        let client = reqwest::Client::new();

        let empty = client
            .post(format!("{}/agent", server.url()))
            .json(&json!({"message": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status(), 400);
        let body: serde_json::Value = empty.json().await.unwrap();
        assert_eq!(body["error"], "message is required");

        let garbage = client
            .post(format!("{}/agent", server.url()))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), 400);

        let missing = client
            .get(format!("{}/nope", server.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn dialogue_client_talks_to_service() {
        use crate::config::DialogueConfig;
        use crate::dialogue::{DialogueClient, HttpDialogueBackend};
        use std::time::Duration;

        let server = serve(Canned(Some("sure"))).await;
        let backend = Arc::new(HttpDialogueBackend::new(&server.url()));
        let mut client = DialogueClient::new(backend, &DialogueConfig::default(), "en-US");
        let reply = client
            .dispatch("main", "hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply.text, "sure [main] hello");
        assert!(!reply.from_mock);
    }

    #[test]
    fn prompt_without_history_is_the_message() {
        assert_eq!(build_prompt("hello", &[]), "hello");
    }

    #[tokio::test]
    async fn history_is_folded_into_the_prompt() {
        let server = serve(Canned(Some("ok"))).await;
        let reply: AgentResponse = reqwest::Client::new()
            .post(format!("{}/agent", server.url()))
            .json(&json!({
                "message": "and tomorrow",
                "history": [
                    {"role": "user", "content": "weather today"},
                    {"role": "assistant", "content": "Sunny."}
                ]
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            reply.response,
            "ok [main] 对话历史：\n用户：weather today\n小T：Sunny.\n\n用户最新问题：and tomorrow"
        );
    }
}
