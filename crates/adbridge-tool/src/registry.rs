use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use adbridge_core::{AdbCommands, CommandRunner};

use crate::{Tool, ToolContext, ToolError, ToolResult, ToolSchema};

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register<T: Tool + 'static>(&self, tool: T) {
        let mut tools = self.tools.write().await;
        tools.insert(tool.id().to_string(), Arc::new(tool));
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(id).cloned()
    }

    /// Registered tool ids, sorted.
    pub async fn list_ids(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut ids: Vec<String> = tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Schemas sorted by name so the prompt is stable between turns.
    pub async fn list_schemas(&self) -> Vec<ToolSchema> {
        let tools = self.tools.read().await;
        let mut schemas: Vec<ToolSchema> = tools
            .values()
            .map(|t| ToolSchema {
                name: t.id().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(
        &self,
        tool_id: &str,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = match self.get(tool_id).await {
            Some(t) => t,
            None => {
                let available = self.list_ids().await;
                return Err(ToolError::InvalidArguments(format!(
                    "Tool '{}' not found in registry. Available tools: {}",
                    tool_id,
                    available.join(", ")
                )));
            }
        };

        // Some models wrap the argument object in a JSON string.
        let args = match args {
            serde_json::Value::String(raw) => match serde_json::from_str(&raw) {
                Ok(parsed @ serde_json::Value::Object(_)) => parsed,
                _ => serde_json::Value::String(raw),
            },
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };

        tool.validate(&args)?;
        if ctx.is_aborted() {
            return Err(ToolError::Cancelled);
        }

        tracing::debug!(tool = %tool_id, call_id = ?ctx.call_id, "executing tool");
        let result = tool.execute(args, ctx).await;
        if let Err(error) = &result {
            tracing::warn!(tool = %tool_id, %error, "tool failed");
        }
        result
    }
}

/// The agent's fixed tool set: GitHub review tools, code analysis, summary
/// formatting, local file reads, ADB and Azure DevOps build installs.
pub async fn create_default_registry(
    github: crate::GithubClient,
    azure: crate::AzureDevOpsClient,
    runner: Arc<dyn CommandRunner>,
    commands: AdbCommands,
) -> ToolRegistry {
    let registry = ToolRegistry::new();

    registry
        .register(crate::github::GetPrInfoTool::new(github.clone()))
        .await;
    registry
        .register(crate::github::GetPrDiffTool::new(github.clone()))
        .await;
    registry
        .register(crate::github::ListPrsTool::new(github))
        .await;
    registry.register(crate::analyze::AnalyzeCodeTool).await;
    registry
        .register(crate::summary::FormatReviewSummaryTool)
        .await;
    registry.register(crate::read_file::ReadFileTool).await;
    registry
        .register(crate::azure::InstallLatestBuildTool::new(
            azure,
            runner.clone(),
            commands.clone(),
        ))
        .await;
    registry
        .register(crate::adb::AdbTool::new(runner, commands))
        .await;

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbridge_core::{CommandError, CommandResult, CommandSpec};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn id(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: ToolContext,
        ) -> Result<ToolResult, ToolError> {
            let text = crate::required_str(&args, "text")?;
            Ok(ToolResult::simple("echo", text))
        }
    }

    struct NoDevices;

    #[async_trait]
    impl CommandRunner for NoDevices {
        async fn run(&self, _spec: &CommandSpec) -> Result<CommandResult, CommandError> {
            Ok(CommandResult::success("List of devices attached\n"))
        }

        async fn spawn_detached(&self, _spec: &CommandSpec) -> Result<Option<u32>, CommandError> {
            Ok(None)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("test", std::env::temp_dir())
    }

    #[tokio::test]
    async fn unknown_tool_lists_available_tools() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).await;
        let err = registry
            .execute("nope", json!({}), ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Available tools: echo"));
    }

    #[tokio::test]
    async fn string_wrapped_arguments_are_unwrapped() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).await;
        let result = registry
            .execute("echo", json!("{\"text\": \"hi\"}"), ctx())
            .await
            .unwrap();
        assert_eq!(result.output, "hi");
    }

    #[tokio::test]
    async fn aborted_context_cancels() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).await;
        let ctx = ctx();
        ctx.abort.cancel();
        let err = registry
            .execute("echo", json!({"text": "hi"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[tokio::test]
    async fn default_registry_has_review_and_adb_tools() {
        let registry = create_default_registry(
            crate::GithubClient::new("https://api.github.com", None),
            crate::AzureDevOpsClient::new(crate::DEFAULT_AZURE_DEVOPS_URL, None),
            Arc::new(NoDevices),
            AdbCommands::default(),
        )
        .await;
        assert_eq!(
            registry.list_ids().await,
            vec![
                "adb",
                "analyze_code",
                "format_review_summary",
                "get_pr_diff",
                "get_pr_info",
                "install_latest_build",
                "list_prs",
                "read_file"
            ]
        );
        let schemas = registry.list_schemas().await;
        assert!(schemas.iter().all(|s| s.parameters["type"] == "object"));
    }
}
