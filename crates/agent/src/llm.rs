use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use careline_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::tools::CapabilitySchema;
use crate::transcript::{Entry, Role};

/// A request from the provider to run one capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl CapabilityCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

/// Provider answer: free text, optionally with structured calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub calls: Vec<CapabilityCall>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), calls: Vec::new() }
    }

    pub fn calls(calls: Vec<CapabilityCall>) -> Self {
        Self { text: String::new(), calls }
    }
}

/// Everything the provider sees for one completion.
///
/// `capabilities` is `None` when calls travel as prose instead of native call objects.
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub entries: &'a [Entry],
    pub capabilities: Option<&'a [CapabilitySchema]>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("provider is misconfigured: {0}")]
    Configuration(String),
    #[error("scripted provider has no completions left")]
    Exhausted,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ProviderError>;
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Chat-completions client for OpenAI and any endpoint speaking the same protocol (Ollama).
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let base_url = config.base_url.clone().unwrap_or_else(|| {
            match config.provider {
                LlmProvider::OpenAi => OPENAI_BASE_URL,
                LlmProvider::Ollama => OLLAMA_BASE_URL,
            }
            .to_string()
        });
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(ProviderError::Configuration(
                "openai requires llm.api_key (or OPENAI_API_KEY)".to_string(),
            ));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|error| ProviderError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let messages: Vec<Value> = request.entries.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(capabilities) = request.capabilities.filter(|list| !list.is_empty()) {
            body["tools"] =
                Value::Array(capabilities.iter().map(CapabilitySchema::to_openai_tool).collect());
        }
        body
    }
}

fn wire_message(entry: &Entry) -> Value {
    match entry.role {
        Role::Assistant if !entry.calls.is_empty() => {
            let content =
                if entry.content.is_empty() { Value::Null } else { Value::from(entry.content.as_str()) };
            let tool_calls: Vec<Value> = entry
                .calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments.to_string() },
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": content, "tool_calls": tool_calls })
        }
        Role::Tool => match &entry.tool_call_id {
            Some(tool_call_id) => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": entry.content,
            }),
            // Text-mode results have no call object to answer, so they go back as plain input.
            None => json!({
                "role": "user",
                "content": format!(
                    "Result of {}: {}",
                    entry.name.as_deref().unwrap_or("capability"),
                    entry.content
                ),
            }),
        },
        role => json!({ "role": role.as_str(), "content": entry.content }),
    }
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

fn decode_completion(body: &str) -> Result<Completion, ProviderError> {
    let response: WireResponse =
        serde_json::from_str(body).map_err(|error| ProviderError::Decode(error.to_string()))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ProviderError::Decode("provider returned no choices".to_string()))?;

    let calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            // Unparseable arguments are kept verbatim; the dispatcher reports the shape mismatch.
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            CapabilityCall { id: call.id, name: call.function.name, arguments }
        })
        .collect();

    Ok(Completion { text: message.content.unwrap_or_default(), calls })
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ProviderError> {
        let mut http = self.client.post(&self.endpoint).json(&self.request_body(&request));
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key.expose_secret());
        }

        let response =
            http.send().await.map_err(|error| ProviderError::Transport(error.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|error| ProviderError::Transport(error.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Status { status: status.as_u16(), body });
        }

        debug!(
            event_name = "llm.completion.received",
            model = %self.model,
            bytes = body.len(),
            "completion received"
        );
        decode_completion(&body)
    }
}

/// What a [`ScriptedProvider`] was asked, kept for assertions.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub entries: Vec<Entry>,
    pub advertised: Option<Vec<String>>,
}

/// Replays canned completions in order. Used by tests and offline demos.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = Completion>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn enqueue(&self, completion: Completion) {
        self.script.lock().await.push_back(Ok(completion));
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ProviderError> {
        self.requests.lock().await.push(RecordedRequest {
            entries: request.entries.to_vec(),
            advertised: request
                .capabilities
                .map(|list| list.iter().map(|schema| schema.name.to_string()).collect()),
        });
        self.script.lock().await.pop_front().unwrap_or(Err(ProviderError::Exhausted))
    }
}
