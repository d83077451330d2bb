use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::Conversation;
use adbridge_provider::{ChatRequest, Provider, ToolCall, ToolDefinition};
use adbridge_tool::{ToolContext, ToolRegistry};

pub const DEFAULT_MAX_STEPS: u32 = 10;
pub const SYSTEM_PROMPT: &str = include_str!("prompt.txt");

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] adbridge_provider::ProviderError),

    #[error("Max steps exceeded ({0})")]
    MaxStepsExceeded(u32),

    #[error("Cancelled")]
    Cancelled,
}

/// Anything the shell can hand a line of user text to.
#[async_trait]
pub trait ChatAgent: Send {
    async fn chat(&mut self, input: &str) -> Result<String, AgentError>;

    /// Forget the conversation so far.
    fn reset(&mut self) {}
}

pub struct AgentExecutor {
    conversation: Conversation,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    session_id: String,
    directory: PathBuf,
    max_steps: u32,
    temperature: Option<f32>,
    abort: CancellationToken,
}

impl AgentExecutor {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            conversation: Conversation::with_system_prompt(SYSTEM_PROMPT),
            provider,
            tools,
            session_id: uuid::Uuid::new_v4().to_string(),
            directory: std::env::current_dir().unwrap_or_default(),
            max_steps: DEFAULT_MAX_STEPS,
            temperature: None,
            abort: CancellationToken::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.conversation = Conversation::with_system_prompt(prompt);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .list_schemas()
            .await
            .into_iter()
            .map(|schema| ToolDefinition {
                name: schema.name,
                description: schema.description,
                parameters: schema.parameters,
            })
            .collect()
    }

    async fn execute_tool(&self, call: &ToolCall) -> (String, bool) {
        let ctx = ToolContext::new(&self.session_id, &self.directory)
            .with_call_id(&call.id)
            .with_abort(self.abort.clone());
        match self
            .tools
            .execute(&call.name, call.arguments.clone(), ctx)
            .await
        {
            Ok(result) => (result.output, false),
            Err(error) => (error.to_string(), true),
        }
    }

    /// One user turn: loop provider calls and tool executions until the
    /// model answers without tool calls or the step budget runs out.
    pub async fn execute(&mut self, user_message: impl Into<String>) -> Result<String, AgentError> {
        self.conversation.add_user_message(user_message);
        let tool_defs = self.tool_definitions().await;

        for step in 1..=self.max_steps {
            if self.abort.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let request = ChatRequest::new(
                self.provider.model(),
                self.conversation.to_provider_messages(),
            )
            .with_tools(tool_defs.clone())
            .with_temperature(self.temperature);

            tracing::debug!(step, provider = self.provider.id(), "agent step");
            let response = self.provider.chat(request).await?;

            if !response.has_tool_calls() {
                let answer = response.content.unwrap_or_default();
                self.conversation.add_assistant_message(&answer);
                tracing::debug!(steps = step, "agent turn finished");
                return Ok(answer);
            }

            self.conversation.add_assistant_message_with_tools(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            );

            for call in &response.tool_calls {
                tracing::info!(tool = %call.name, "tool call");
                let (content, is_error) = self.execute_tool(call).await;
                self.conversation
                    .add_tool_result(&call.id, &call.name, content, is_error);
            }
        }

        tracing::warn!(max_steps = self.max_steps, "agent stopped at step limit");
        Err(AgentError::MaxStepsExceeded(self.max_steps))
    }
}

#[async_trait]
impl ChatAgent for AgentExecutor {
    async fn chat(&mut self, input: &str) -> Result<String, AgentError> {
        self.execute(input).await
    }

    fn reset(&mut self) {
        self.conversation.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbridge_provider::{ChatResponse, ProviderError, Role};
    use adbridge_tool::{Tool, ToolError, ToolResult};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ChatResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatResponse::text("out of script")))
        }
    }

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn id(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Upper-case text"
        }

        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }

        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: ToolContext,
        ) -> Result<ToolResult, ToolError> {
            let text = adbridge_tool::required_str(&args, "text")?;
            Ok(ToolResult::simple("upper", text.to_uppercase()))
        }
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    async fn registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register(UpperTool).await;
        Arc::new(registry)
    }

    #[tokio::test]
    async fn runs_tools_then_returns_final_text() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_calls(vec![call(
                "c1",
                "upper",
                json!({"text": "hi"}),
            )])),
            Ok(ChatResponse::text("done: HI")),
        ]);
        let mut agent = AgentExecutor::new(provider.clone(), registry().await);

        let answer = agent.chat("shout hi").await.unwrap();
        assert_eq!(answer, "done: HI");

        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools[0].name, "upper");
        assert_eq!(requests[0].model, "test-model");
        let tool_message = requests[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_message.content.as_deref(), Some("HI"));
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_as_text() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_calls(vec![
                call("c1", "missing_tool", json!({})),
                call("c2", "upper", json!({})),
            ])),
            Ok(ChatResponse::text("recovered")),
        ]);
        let mut agent = AgentExecutor::new(provider.clone(), registry().await);
        assert_eq!(agent.chat("go").await.unwrap(), "recovered");

        let results: Vec<_> = agent
            .conversation()
            .messages
            .iter()
            .filter_map(|m| m.tool_result.clone())
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_error));
        assert!(results[0].content.contains("Available tools: upper"));
        assert!(results[1].content.contains("text is required"));
    }

    #[tokio::test]
    async fn stops_at_max_steps() {
        let looping: Vec<_> = (0..5)
            .map(|i| {
                Ok(ChatResponse::tool_calls(vec![call(
                    &format!("c{}", i),
                    "upper",
                    json!({"text": "again"}),
                )]))
            })
            .collect();
        let provider = ScriptedProvider::new(looping);
        let mut agent = AgentExecutor::new(provider.clone(), registry().await).with_max_steps(3);

        let err = agent.chat("loop").await.unwrap_err();
        assert!(matches!(err, AgentError::MaxStepsExceeded(3)));
        assert_eq!(provider.requests.lock().len(), 3);
    }

    #[tokio::test]
    async fn answer_on_last_step_is_not_an_error() {
        let provider = ScriptedProvider::new(vec![
            Ok(ChatResponse::tool_calls(vec![call(
                "c1",
                "upper",
                json!({"text": "a"}),
            )])),
            Ok(ChatResponse::text("final")),
        ]);
        let mut agent = AgentExecutor::new(provider, registry().await).with_max_steps(2);
        assert_eq!(agent.chat("x").await.unwrap(), "final");
    }

    #[tokio::test]
    async fn provider_failure_surfaces_and_history_survives() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::NetworkError("connection refused".to_string())),
            Ok(ChatResponse::text("back online")),
        ]);
        let mut agent = AgentExecutor::new(provider, registry().await);
        assert!(matches!(
            agent.chat("first").await,
            Err(AgentError::Provider(_))
        ));
        assert_eq!(agent.chat("second").await.unwrap(), "back online");

        agent.reset();
        assert_eq!(agent.conversation().len(), 1);
    }
}
