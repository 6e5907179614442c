use super::prompts::{expects_json, planner_prompt, summary_prompt};
use super::{CollaboratorError, Planner, Summarizer, SummaryTemplate};
use crate::config::{resolve_env_secret, ConfigError, LlmConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::thread;
use std::time::Duration;

const SERVICE: &str = "llm";
const MAX_ATTEMPTS: u32 = 3;
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint. Serves as both
/// the planner and the summarizer.
#[derive(Clone)]
pub struct LlmClient {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigError> {
        let api_key = resolve_env_secret(&config.api_key_env)?;
        Ok(Self::new(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.timeout_seconds),
        ))
    }

    pub fn new(base_url: &str, model: &str, api_key: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    fn complete(&self, prompt: &str, json_mode: bool) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let url = format!("{}/chat/completions", self.base_url);

        let mut attempt = 1;
        loop {
            match self.post(&url, &request) {
                Ok(content) => return Ok(content),
                Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(attempt, error = %err, "llm call failed, retrying in {}s", backoff.as_secs());
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn post(&self, url: &str, request: &ChatRequest<'_>) -> Result<String, CollaboratorError> {
        let response = self
            .agent
            .post(url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(request)
            .map_err(|err| CollaboratorError::from_ureq(SERVICE, err))?;
        let body: ChatResponse = response
            .into_json()
            .map_err(|err| CollaboratorError::invalid(SERVICE, err.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CollaboratorError::EmptyResponse {
                service: SERVICE.to_string(),
            })?;
        Ok(content)
    }
}

fn is_transient(err: &CollaboratorError) -> bool {
    match err {
        CollaboratorError::Connectivity { .. } => true,
        CollaboratorError::Failed { reason, .. } => {
            reason.starts_with("http 429") || reason.starts_with("http 5")
        }
        _ => false,
    }
}

impl Planner for LlmClient {
    fn plan(&self, request: &str) -> Result<String, CollaboratorError> {
        self.complete(&planner_prompt(request), true)
    }
}

impl Summarizer for LlmClient {
    fn render(
        &self,
        template: SummaryTemplate,
        payload: &Value,
    ) -> Result<String, CollaboratorError> {
        tracing::debug!(template = template.as_str(), "rendering summary");
        self.complete(&summary_prompt(template, payload), expects_json(template))
    }
}

/// Stand-in used when the API key is missing, so commands that never plan or
/// summarize still work.
#[derive(Debug, Clone)]
pub struct UnconfiguredLlm {
    reason: String,
}

impl UnconfiguredLlm {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn refuse(&self) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::NotConfigured {
            service: SERVICE.to_string(),
            reason: self.reason.clone(),
        })
    }
}

impl Planner for UnconfiguredLlm {
    fn plan(&self, _request: &str) -> Result<String, CollaboratorError> {
        self.refuse()
    }
}

impl Summarizer for UnconfiguredLlm {
    fn render(
        &self,
        _template: SummaryTemplate,
        _payload: &Value,
    ) -> Result<String, CollaboratorError> {
        self.refuse()
    }
}
