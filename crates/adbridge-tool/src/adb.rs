use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use adbridge_core::{AdbCommands, CommandRunner};

use crate::{required_str, Tool, ToolContext, ToolError, ToolResult};

/// Runs one `adb` invocation for the agent through the bridge's runner.
pub struct AdbTool {
    runner: Arc<dyn CommandRunner>,
    commands: AdbCommands,
}

impl AdbTool {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: AdbCommands) -> Self {
        Self { runner, commands }
    }
}

#[async_trait]
impl Tool for AdbTool {
    fn id(&self) -> &str {
        "adb"
    }

    fn description(&self) -> &str {
        "Run an ADB command, e.g. 'devices -l' or 'shell pm list packages'. The leading 'adb' is optional."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "ADB arguments, e.g. 'devices -l' or '-s emulator-5554 shell getprop ro.build.version.release'"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let command = required_str(&args, "command")?.trim();
        let line = if command == "adb" || command.starts_with("adb ") {
            command.to_string()
        } else {
            format!("adb {}", command)
        };

        let spec = match self.commands.raw(&line) {
            Ok(spec) => spec,
            Err(error) => {
                let body = json!({
                    "command": line,
                    "output": "",
                    "error": error.to_string(),
                    "success": false,
                });
                return Ok(ToolResult::simple(line, body.to_string()));
            }
        };

        let outcome = tokio::select! {
            result = self.runner.run(&spec) => result,
            _ = ctx.abort.cancelled() => return Err(ToolError::Cancelled),
        };

        let body = match outcome {
            Ok(result) => {
                let stderr = result.stderr.trim();
                json!({
                    "command": spec.display(),
                    "output": result.stdout.trim(),
                    "error": if stderr.is_empty() { Value::Null } else { json!(stderr) },
                    "success": result.exit_ok,
                })
            }
            Err(error) => json!({
                "command": spec.display(),
                "output": "",
                "error": format!("Failed to run command: {}", error),
                "success": false,
            }),
        };
        Ok(ToolResult::simple(spec.display(), body.to_string()))
    }
}
