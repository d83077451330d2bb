use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    ChatRequest, ChatResponse, Message, Provider, ProviderError, Role, ToolCall, Usage,
};

/// Local runtimes answer any key; they still expect the header.
const PLACEHOLDER_API_KEY: &str = "not-needed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAI,
    LmStudio,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Ollama,
        ProviderKind::OpenAI,
        ProviderKind::LmStudio,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
            ProviderKind::LmStudio => "lmstudio",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "Ollama (local)",
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::LmStudio => "LM Studio (local)",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "http://localhost:11434/v1",
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::LmStudio => "http://localhost:1234/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "gpt-oss:20b",
            ProviderKind::OpenAI => "gpt-4o-mini",
            ProviderKind::LmStudio => "local-model",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderKind::OpenAI)
    }

    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAI => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    /// Accepts the menu numbers `1`/`2`/`3` as well as provider ids.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "ollama" => Ok(ProviderKind::Ollama),
            "2" | "openai" => Ok(ProviderKind::OpenAI),
            "3" | "lmstudio" | "lm-studio" | "lm_studio" => Ok(ProviderKind::LmStudio),
            other => Err(ProviderError::ConfigError(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: kind.default_base_url().to_string(),
            model: kind.default_model().to_string(),
            api_key: None,
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
    settings: ProviderSettings,
}

impl OpenAICompatibleProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        if settings.kind.requires_api_key()
            && settings.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ProviderError::AuthError(format!(
                "{} requires an API key",
                settings.kind.label()
            )));
        }
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn chat_completions_url(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    pub fn build_request_body(request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.text_content(),
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": calls,
            })
        }
        role => json!({
            "role": role,
            "content": message.text_content(),
        }),
    }
}

// Lenient view of the /chat/completions response; every field may be absent.

#[derive(Debug, Deserialize)]
struct RawChatResponse {
    #[serde(default)]
    choices: Vec<RawChoice>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<RawFunction>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl RawChatResponse {
    fn into_chat_response(self) -> Result<ChatResponse, ProviderError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError("response contained no choices".to_string()))?;

        let message = choice.message.unwrap_or(RawMessage {
            content: None,
            tool_calls: None,
        });

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|call| {
                let function = call.function?;
                let name = function.name.filter(|n| !n.is_empty())?;
                Some(ToolCall {
                    id: call
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    arguments: decode_arguments(function.arguments),
                })
            })
            .collect();

        Ok(ChatResponse {
            content: message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason,
            usage: self.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            }),
        })
    }
}

/// OpenAI sends arguments as a JSON string; some local runtimes send an object.
fn decode_arguments(arguments: Option<Value>) -> Value {
    match arguments {
        Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
        Some(Value::String(raw)) => {
            serde_json::from_str(&raw).unwrap_or_else(|_| json!({ "_raw": raw }))
        }
        Some(Value::Null) | None => json!({}),
        Some(other) => other,
    }
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn id(&self) -> &str {
        self.settings.kind.id()
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = Self::chat_completions_url(&self.settings.base_url);
        let body = Self::build_request_body(&request);
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(PLACEHOLDER_API_KEY);

        tracing::debug!(
            provider = self.id(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ProviderError::AuthError(format!("{}: {}", status, body)));
            }
            return Err(ProviderError::ApiErrorWithStatus {
                message: body,
                status_code: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        let raw: RawChatResponse = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(500).collect();
            ProviderError::ApiError(format!("failed to decode response: {}\nBody: {}", e, preview))
        })?;
        raw.into_chat_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolDefinition;
    use axum::{routing::post, Json, Router};

    #[test]
    fn menu_numbers_and_ids_parse() {
        assert_eq!("1".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("3".parse::<ProviderKind>().unwrap(), ProviderKind::LmStudio);
        assert!("4".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn defaults_per_provider() {
        let ollama = ProviderSettings::new(ProviderKind::Ollama);
        assert_eq!(ollama.base_url, "http://localhost:11434/v1");
        assert_eq!(ollama.model, "gpt-oss:20b");
        assert_eq!(
            ProviderKind::LmStudio.default_base_url(),
            "http://localhost:1234/v1"
        );
        assert_eq!(ProviderKind::OpenAI.default_model(), "gpt-4o-mini");
    }

    #[test]
    fn openai_without_key_is_rejected() {
        let result = OpenAICompatibleProvider::new(ProviderSettings::new(ProviderKind::OpenAI));
        assert!(matches!(result, Err(ProviderError::AuthError(_))));
        assert!(OpenAICompatibleProvider::new(ProviderSettings::new(ProviderKind::Ollama)).is_ok());
    }

    #[test]
    fn completions_url_ignores_trailing_slash() {
        assert_eq!(
            OpenAICompatibleProvider::chat_completions_url("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn request_body_encodes_tool_round_trip() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "list_prs".to_string(),
            arguments: json!({"repo": "octocat/hello-world"}),
        };
        let request = ChatRequest::new(
            "gpt-oss:20b",
            vec![
                Message::system("be brief"),
                Message::user("list PRs"),
                Message::assistant_with_tools(None, vec![call]),
                Message::tool_result("call_1", "No pull requests found"),
            ],
        )
        .with_tools(vec![ToolDefinition {
            name: "list_prs".to_string(),
            description: "List pull requests".to_string(),
            parameters: json!({"type": "object"}),
        }]);

        let body = OpenAICompatibleProvider::build_request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"repo":"octocat/hello-world"}"#
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "list_prs");
        assert_eq!(body["tool_choice"], "auto");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn raw_response_with_string_and_object_arguments() {
        let raw: RawChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [
                        {"id": "a", "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"}},
                        {"function": {"name": "analyze_code", "arguments": {"code": "x"}}},
                        {"function": {"name": "", "arguments": "{}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2}
        }))
        .unwrap();

        let response = raw.into_chat_response().unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].arguments, json!({"path": "x"}));
        assert_eq!(response.tool_calls[1].arguments, json!({"code": "x"}));
        assert!(response.tool_calls[1].id.starts_with("call_"));
        assert_eq!(response.usage.unwrap().total_tokens, 0);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let raw: RawChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(raw.into_chat_response().is_err());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    #[tokio::test]
    async fn chat_posts_to_completions_endpoint() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let model = body["model"].as_str().unwrap_or_default().to_string();
                Json(json!({
                    "choices": [{
                        "message": {"role": "assistant", "content": format!("hello from {}", model)},
                        "finish_reason": "stop"
                    }]
                }))
            }),
        );
        let base_url = serve(router).await;

        let mut settings = ProviderSettings::new(ProviderKind::LmStudio);
        settings.base_url = base_url;
        let provider = OpenAICompatibleProvider::new(settings).unwrap();
        let response = provider
            .chat(ChatRequest::new("local-model", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("hello from local-model"));
        assert!(!response.has_tool_calls());
    }

    #[tokio::test]
    async fn chat_maps_http_errors() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::NOT_FOUND, "model not found") }),
        );
        let base_url = serve(router).await;

        let mut settings = ProviderSettings::new(ProviderKind::Ollama);
        settings.base_url = base_url;
        let provider = OpenAICompatibleProvider::new(settings).unwrap();
        let err = provider
            .chat(ChatRequest::new("missing", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::ApiErrorWithStatus {
                status_code: 404,
                ..
            }
        ));
        assert!(err.hint().is_some());
    }
}
