use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::{required_str, Tool, ToolContext, ToolError, ToolResult};

pub const MAX_FILE_BYTES: u64 = 100_000;

pub struct ReadFileTool;

fn resolve(directory: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

async fn read_text(path: &Path, shown: &str) -> Result<String, String> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(format!("Error: File not found: {}", shown))
        }
        Err(e) => return Err(format!("Error: Failed to read {}: {}", shown, e)),
    };
    if metadata.is_dir() {
        return Err(format!("Error: {} is a directory, not a file", shown));
    }
    if metadata.len() > MAX_FILE_BYTES {
        return Err(format!(
            "Error: File too large ({} bytes, limit {} bytes): {}",
            metadata.len(),
            MAX_FILE_BYTES,
            shown
        ));
    }

    let bytes = fs::read(path)
        .await
        .map_err(|e| format!("Error: Failed to read {}: {}", shown, e))?;
    String::from_utf8(bytes).map_err(|_| format!("Error: File is not valid UTF-8 text: {}", shown))
}

#[async_trait]
impl Tool for ReadFileTool {
    fn id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a local text file (up to 100,000 bytes). Relative paths resolve against the working directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let shown = required_str(&args, "path")?;
        let path = resolve(&ctx.directory, shown);

        let result = match read_text(&path, shown).await {
            Ok(content) => ToolResult::simple(
                shown,
                format!("File: {}\n\n{}", path.display(), content),
            )
            .with_metadata("bytes", json!(content.len())),
            Err(error) => ToolResult::simple(shown, error),
        };
        Ok(result)
    }
}
