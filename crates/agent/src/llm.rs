use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use winback_core::config::LlmConfig;

/// Failure modes of the external generation service. Transient
/// unavailability is kept distinct from a malformed request so callers can
/// substitute a fallback reply for the former and treat the latter as a bug.
#[derive(Clone, Debug, Error)]
pub enum GenerationError {
    #[error("generation service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("generation request was malformed: {0}")]
    Malformed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Required => "required",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON arguments exactly as the service produced them; parsing (and
    /// parse failure handling) is the tool executor's job.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCallRequest {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_owned(),
            function: FunctionCall { name: name.into(), arguments: arguments.into() },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_owned(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    pub fn stored(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_owned(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolFunction {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolFunction,
}

impl ToolSpec {
    pub fn function(name: &'static str, description: &'static str, parameters: Value) -> Self {
        Self { kind: "function", function: ToolFunction { name, description, parameters } }
    }
}

/// One service turn: either free text, structured tool-call requests, or
/// (misbehaving services) neither.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new() }
    }

    pub fn tools(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self { content: None, tool_calls }
    }
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        tool_choice: ToolChoice,
    ) -> Result<ChatTurn, GenerationError>;
}

/// OpenAI-compatible chat-completions client. Does not retry; backoff is the
/// caller's concern at the collaborator boundary.
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| GenerationError::Malformed(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallRequest>>,
}

#[async_trait]
impl GenerationClient for OpenAiChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        tool_choice: ToolChoice,
    ) -> Result<ChatTurn, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "tools": tools,
            "tool_choice": tool_choice.as_str(),
        });

        let mut request = self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| GenerationError::ServiceUnavailable(error.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GenerationError::ServiceUnavailable(format!(
                "upstream returned {status}"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GenerationError::Malformed(format!(
                "upstream returned {status}: {detail}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::Malformed(format!("undecodable response: {error}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Malformed("response contained no choices".to_owned()))?;

        Ok(ChatTurn {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        })
    }
}

/// Replays a fixed sequence of turns and records the tool choice of every
/// request. Backs orchestrator tests and offline console runs.
#[derive(Default)]
pub struct ScriptedGenerationClient {
    turns: Mutex<VecDeque<ChatTurn>>,
    requested_choices: Mutex<Vec<ToolChoice>>,
}

impl ScriptedGenerationClient {
    pub fn new(turns: impl IntoIterator<Item = ChatTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requested_choices: Mutex::new(Vec::new()),
        }
    }

    pub fn requested_choices(&self) -> Vec<ToolChoice> {
        match self.requested_choices.lock() {
            Ok(choices) => choices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining_turns(&self) -> usize {
        match self.turns.lock() {
            Ok(turns) => turns.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerationClient {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
        tool_choice: ToolChoice,
    ) -> Result<ChatTurn, GenerationError> {
        match self.requested_choices.lock() {
            Ok(mut choices) => choices.push(tool_choice),
            Err(poisoned) => poisoned.into_inner().push(tool_choice),
        }
        let next = match self.turns.lock() {
            Ok(mut turns) => turns.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.ok_or_else(|| GenerationError::ServiceUnavailable("script exhausted".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use crate::llm::{ChatMessage, ChatTurn, ToolCallRequest, ToolChoice};

    #[test]
    fn tool_result_messages_carry_call_linkage() {
        let message = ChatMessage::tool_result("call-1", "update_fsm", "{\"applied\":true}");
        assert_eq!(message.role, "tool");
        assert_eq!(message.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(message.name.as_deref(), Some("update_fsm"));
    }

    #[test]
    fn assistant_tool_call_messages_serialize_without_null_content() {
        let message = ChatMessage::assistant_tool_calls(vec![ToolCallRequest::function(
            "call-1",
            "get_user_context",
            "{}",
        )]);
        let json = serde_json::to_value(&message).expect("serialize");
        assert!(json.get("content").is_none());
        assert_eq!(json["tool_calls"][0]["function"]["name"], "get_user_context");
    }

    #[tokio::test]
    async fn scripted_client_replays_turns_and_records_choices() {
        use crate::llm::GenerationClient;

        let client = super::ScriptedGenerationClient::new([ChatTurn::text("hello")]);
        let turn = client.chat(&[], &[], ToolChoice::Required).await.expect("scripted turn");
        assert_eq!(turn.content.as_deref(), Some("hello"));
        assert_eq!(client.requested_choices(), vec![ToolChoice::Required]);

        let error = client.chat(&[], &[], ToolChoice::Auto).await.expect_err("script exhausted");
        assert!(error.to_string().contains("unavailable"));
    }
}
