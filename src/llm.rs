// llm.rs — LLM Port (C14)
//
// The decision engine is opaque to the control loop behind this trait; the
// only production implementation is an HTTP client to an OpenAI-compatible
// chat-completions endpoint. Grounded on the teacher's `post_info`/
// `post_exchange` request helpers in `exchange.rs` (single `reqwest::Client`
// reused across calls, status-code branching, a small retry loop around
// transient failures) — generalized from signed-order POSTs to an
// unauthenticated chat-completion POST with exponential backoff plus
// injected jitter (§9 "LLM non-determinism").
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ports::Rand;

#[derive(Debug)]
pub enum LlmError {
    Transport(String),
    Timeout,
    Http(u16, String),
    MalformedResponse(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Transport(msg) => write!(f, "transport error: {msg}"),
            LlmError::Timeout => write!(f, "request timed out"),
            LlmError::Http(code, msg) => write!(f, "http {code}: {msg}"),
            LlmError::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    /// Transient failures worth a retry: dropped connections, timeouts,
    /// stream resets, and the handful of HTTP statuses that mean "try
    /// again" rather than "your request is wrong".
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("eof") || lower.contains("reset") || lower.contains("connection") || lower.contains("broken pipe")
            }
            LlmError::Timeout => true,
            LlmError::Http(code, msg) => {
                matches!(code, 429 | 500 | 502 | 503 | 504) || msg.to_uppercase().contains("INTERNAL_ERROR")
            }
            LlmError::MalformedResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

pub struct HttpLlmPort {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub client: reqwest::Client,
}

impl HttpLlmPort {
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self { base_url, model, api_key, client: reqwest::Client::new() }
    }

    async fn call_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "system", content: system_prompt }, ChatMessage { role: "user", content: user_prompt }],
            temperature: 0.2,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!(body))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Http(status.as_u16(), text));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("empty choices array".to_string()))
    }
}

const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
impl LlmPort for HttpLlmPort {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let rand: &dyn Rand = &crate::ports::SystemRand;
        call_with_retry(self, system_prompt, user_prompt, rand).await
    }
}

/// Exercised directly by tests with a fake `Rand`; production goes through
/// `HttpLlmPort::call` which supplies `SystemRand`.
async fn call_with_retry(port: &HttpLlmPort, system_prompt: &str, user_prompt: &str, rand: &dyn Rand) -> Result<String, LlmError> {
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match port.call_once(system_prompt, user_prompt).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let backoff_ms = (attempt as u64).pow(2) * 1000 + rand.jitter_ms(250);
                warn!("[LLM] attempt {attempt}/{MAX_ATTEMPTS} failed ({e}), retrying in {backoff_ms}ms");
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(LlmError::Timeout))
}
