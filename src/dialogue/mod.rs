//! Dialogue client: sends a finished transcript to the backend and always
//! produces a reply.
//!
//! A dispatch is split in three so the network call never blocks the turn
//! controller:
//!
//! 1. [`DialogueClient::begin`] marks the session busy and returns a
//!    [`PendingDispatch`].
//! 2. [`PendingDispatch::run`] performs the call (bounded by the timeout) on
//!    any task and yields a [`DispatchOutcome`].
//! 3. [`DialogueClient::complete`] turns the outcome into a reply, falling
//!    back to a local template on failure, and records the exchange.
//!
//! [`DialogueClient::dispatch`] chains the three for callers that can await.

mod fallback;
mod http;

pub use fallback::FallbackResponder;
pub use http::HttpDialogueBackend;

use crate::config::DialogueConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::DialogueResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Body of a backend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub message: String,
    pub agent: String,
    /// Earlier exchanges of the session, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

/// Transport to the dialogue backend.
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Send one user message and return the reply.
    ///
    /// # Errors
    ///
    /// Any transport, status or payload failure. A reply without usable text
    /// is a failure too.
    async fn send(&self, request: &BackendRequest) -> Result<DialogueResponse>;
}

/// Who said a history line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// A dispatch that has been admitted but not yet sent.
pub struct PendingDispatch {
    session_id: String,
    transcript: String,
    request: BackendRequest,
    backend: Option<Arc<dyn DialogueBackend>>,
    timeout: Duration,
}

impl PendingDispatch {
    /// Perform the backend call. Never fails: errors travel in the outcome.
    pub async fn run(self) -> DispatchOutcome {
        let result = match &self.backend {
            None => Err(SpeechError::Dialogue("mock responses enabled".into())),
            Some(backend) => {
                match tokio::time::timeout(self.timeout, backend.send(&self.request)).await {
                    Ok(result) => result,
                    Err(_) => Err(SpeechError::Dialogue(format!(
                        "timed out after {}s",
                        self.timeout.as_secs_f32()
                    ))),
                }
            }
        };
        DispatchOutcome {
            session_id: self.session_id,
            transcript: self.transcript,
            result,
        }
    }
}

/// Result of a backend call, waiting to be completed.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub session_id: String,
    pub transcript: String,
    pub result: Result<DialogueResponse>,
}

/// A finished exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub response: DialogueResponse,
    /// Why the backend reply could not be used, when a fallback was produced.
    pub degraded: Option<String>,
}

/// Per-session history and the one-dispatch-at-a-time guard.
pub struct DialogueClient {
    backend: Arc<dyn DialogueBackend>,
    fallback: FallbackResponder,
    agent: String,
    use_mock_response: bool,
    send_history: bool,
    max_entries: usize,
    sessions: HashMap<String, VecDeque<HistoryEntry>>,
    in_flight: HashSet<String>,
}

impl DialogueClient {
    /// `locale` picks the fallback template language.
    pub fn new(backend: Arc<dyn DialogueBackend>, config: &DialogueConfig, locale: &str) -> Self {
        Self {
            backend,
            fallback: FallbackResponder::new(&config.fallback, locale),
            agent: config.agent.clone(),
            use_mock_response: config.use_mock_response,
            send_history: config.send_history,
            max_entries: config.max_exchanges.max(1) * 2,
            sessions: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    /// Admit a dispatch for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Busy`] if the session already has one in flight.
    pub fn begin(
        &mut self,
        session_id: &str,
        transcript: &str,
        timeout: Duration,
    ) -> Result<PendingDispatch> {
        if self.in_flight.contains(session_id) {
            return Err(SpeechError::Busy {
                session_id: session_id.to_owned(),
            });
        }
        self.in_flight.insert(session_id.to_owned());
        let transcript = transcript.trim().to_owned();
        info!(session = session_id, "dispatching {transcript:?}");
        let history = if self.send_history {
            self.history(session_id)
        } else {
            Vec::new()
        };
        Ok(PendingDispatch {
            session_id: session_id.to_owned(),
            request: BackendRequest {
                message: transcript.clone(),
                agent: self.agent.clone(),
                history,
            },
            transcript,
            backend: (!self.use_mock_response).then(|| Arc::clone(&self.backend)),
            timeout,
        })
    }

    /// Resolve an outcome into a reply and record the exchange.
    pub fn complete(&mut self, outcome: DispatchOutcome) -> Exchange {
        self.in_flight.remove(&outcome.session_id);
        let (response, degraded) = match outcome.result {
            Ok(response) => (response, None),
            Err(e) => {
                warn!(
                    session = %outcome.session_id,
                    "dialogue backend failed, using fallback: {e}"
                );
                let text = self.fallback.respond(&outcome.transcript);
                (
                    DialogueResponse {
                        text,
                        from_mock: true,
                    },
                    Some(e.to_string()),
                )
            }
        };

        let history = self.sessions.entry(outcome.session_id).or_default();
        history.push_back(HistoryEntry {
            role: Role::User,
            content: outcome.transcript,
        });
        history.push_back(HistoryEntry {
            role: Role::Assistant,
            content: response.text.clone(),
        });
        while history.len() > self.max_entries {
            history.pop_front();
        }

        Exchange { response, degraded }
    }

    /// Send `transcript` and wait for the reply (real or fallback).
    ///
    /// # Errors
    ///
    /// Only [`SpeechError::Busy`]; backend failures yield a fallback reply.
    pub async fn dispatch(
        &mut self,
        session_id: &str,
        transcript: &str,
        timeout: Duration,
    ) -> Result<DialogueResponse> {
        let pending = self.begin(session_id, transcript, timeout)?;
        let outcome = pending.run().await;
        Ok(self.complete(outcome).response)
    }

    /// History for a session, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<HistoryEntry> {
        self.sessions
            .get(session_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<DialogueResponse>>>,
        delay: Duration,
        seen: Mutex<Vec<BackendRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<DialogueResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                delay,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DialogueBackend for Scripted {
        async fn send(&self, request: &BackendRequest) -> Result<DialogueResponse> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(reply("ok")))
        }
    }

    fn reply(text: &str) -> DialogueResponse {
        DialogueResponse {
            text: text.into(),
            from_mock: false,
        }
    }

    fn client(backend: Arc<dyn DialogueBackend>) -> DialogueClient {
        DialogueClient::new(backend, &DialogueConfig::default(), "en-US")
    }

    const T: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn successful_dispatch_records_history() {
        let backend = Scripted::new(vec![Ok(reply("It is noon."))]);
        let mut c = client(backend.clone());
        let r = c.dispatch("main", " what time is it ", T).await.unwrap();
        assert_eq!(r.text, "It is noon.");
        assert!(!r.from_mock);
        assert_eq!(backend.seen.lock().unwrap()[0].message, "what time is it");
        assert_eq!(backend.seen.lock().unwrap()[0].agent, "main");
        let h = c.history("main");
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].role, Role::User);
        assert_eq!(h[1].content, "It is noon.");
        assert!(c.begin("main", "again", T).is_ok());
    }

    #[tokio::test]
    async fn failure_yields_fallback_with_transcript() {
        let backend = Scripted::new(vec![Err(SpeechError::Dialogue("HTTP 500".into()))]);
        let mut c = client(backend);
        let pending = c.begin("main", "turn on the lights", T).unwrap();
        let exchange = c.complete(pending.run().await);
        assert!(exchange.response.from_mock);
        assert!(exchange.response.text.contains("turn on the lights"));
        assert!(exchange.degraded.unwrap().contains("HTTP 500"));
        assert_eq!(c.history("main").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_fallback() {
        let backend = Scripted::slow(Duration::from_secs(60));
        let mut c = client(backend);
        let r = c.dispatch("main", "what time is it", T).await.unwrap();
        assert!(r.from_mock);
        assert!(r.text.contains("what time is it"));
    }

    #[tokio::test]
    async fn second_dispatch_for_same_session_is_busy() {
        let mut c = client(Scripted::new(Vec::new()));
        let first = c.begin("main", "one", T).unwrap();
        let err = c.begin("main", "two", T).err().unwrap();
        assert!(matches!(err, SpeechError::Busy { ref session_id } if session_id == "main"));
        // Other sessions are independent.
        let other = c.begin("kitchen", "three", T).unwrap();
        c.complete(other.run().await);
        c.complete(first.run().await);
        assert!(c.begin("main", "two", T).is_ok());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let config = DialogueConfig {
            max_exchanges: 2,
            ..DialogueConfig::default()
        };
        let mut c = DialogueClient::new(Scripted::new(Vec::new()), &config, "en-US");
        for i in 0..5 {
            c.dispatch("main", &format!("message {i}"), T).await.unwrap();
        }
        let h = c.history("main");
        assert_eq!(h.len(), 4);
        assert_eq!(h[0].content, "message 3");
    }

    #[tokio::test]
    async fn mock_mode_never_calls_backend() {
        let backend = Scripted::new(Vec::new());
        let config = DialogueConfig {
            use_mock_response: true,
            ..DialogueConfig::default()
        };
        let mut c = DialogueClient::new(backend.clone(), &config, "zh-CN");
        let r = c.dispatch("main", "你好", T).await.unwrap();
        assert!(r.from_mock);
        assert!(r.text.contains("你好"));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let c = client(Scripted::new(Vec::new()));
        assert!(c.history("nobody").is_empty());
    }

    #[tokio::test]
    async fn earlier_exchanges_travel_with_the_next_message() {
        let backend = Scripted::new(vec![Ok(reply("It is noon.")), Ok(reply("Sunny."))]);
        let mut c = client(backend.clone());
        c.dispatch("main", "what time is it", T).await.unwrap();
        c.dispatch("main", "and the weather", T).await.unwrap();

        let seen = backend.seen.lock().unwrap();
        assert!(seen[0].history.is_empty());
        assert_eq!(
            seen[1].history,
            vec![
                HistoryEntry {
                    role: Role::User,
                    content: "what time is it".into(),
                },
                HistoryEntry {
                    role: Role::Assistant,
                    content: "It is noon.".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn history_can_be_withheld() {
        let backend = Scripted::new(Vec::new());
        let config = DialogueConfig {
            send_history: false,
            ..DialogueConfig::default()
        };
        let mut c = DialogueClient::new(backend.clone(), &config, "en-US");
        c.dispatch("main", "one", T).await.unwrap();
        c.dispatch("main", "two", T).await.unwrap();
        assert!(backend.seen.lock().unwrap()[1].history.is_empty());
        assert_eq!(c.history("main").len(), 4);
    }
}
