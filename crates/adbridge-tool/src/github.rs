//! Read-only GitHub pull request tools.
//!
//! Every failure (bad repo string, HTTP status, transport) is rendered as an
//! `Error: ...` text result so the model can read it and react.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::{
    optional_str, optional_u64, required_str, required_u64, truncate_chars, Tool, ToolContext,
    ToolError, ToolResult,
};

pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
const API_VERSION: &str = "2022-11-28";
const MAX_BODY_CHARS: usize = 2000;
const MAX_PATCH_CHARS: usize = 3000;
const MAX_FILES: usize = 30;
const DEFAULT_LIST_LIMIT: u64 = 10;
const MAX_LIST_LIMIT: u64 = 100;

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("adbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Token from `GITHUB_TOKEN` when `token` is `None`.
    pub fn from_env(api_url: impl Into<String>, token: Option<String>) -> Self {
        let token = token.or_else(|| std::env::var(GITHUB_TOKEN_ENV).ok());
        Self::new(api_url, token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// GET `path` and decode JSON. The error side is ready-to-return text.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, String> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(url = %url, "github request");
        let response = request
            .send()
            .await
            .map_err(|e| format!("Error: Failed to reach GitHub: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(body);
            return Err(format!("Error: GitHub API returned {}: {}", status, message));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("Error: Invalid response from GitHub: {}", e))
    }
}

/// Accepts `owner/repo` or a GitHub URL (https, ssh or scp-style).
pub fn parse_repo(input: &str) -> Option<(String, String)> {
    let normalized = input.trim().trim_end_matches('/').trim_end_matches(".git");
    let path = ["https://github.com/", "http://github.com/", "ssh://git@github.com/", "git@github.com:", "github.com/"]
        .iter()
        .find_map(|prefix| normalized.strip_prefix(prefix))
        .unwrap_or(normalized);

    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    if owner.is_empty() || repo.is_empty() || owner.contains(':') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn repo_or_error(args: &Value) -> Result<Result<(String, String), ToolResult>, ToolError> {
    let repo = required_str(args, "repo")?;
    Ok(parse_repo(repo).ok_or_else(|| {
        ToolResult::simple(
            "github",
            format!(
                "Error: Invalid repository format: {} (expected owner/repo or a GitHub URL)",
                repo
            ),
        )
    }))
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(|v| v.as_str()).unwrap_or("unknown")
}

fn num_field(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(|v| v.as_u64()).unwrap_or(0)
}

pub fn format_pr_info(pr: &Value) -> String {
    let state = if pr.get("merged").and_then(|v| v.as_bool()).unwrap_or(false) {
        "merged"
    } else {
        str_field(pr, "/state")
    };
    let body = pr
        .get("body")
        .and_then(|v| v.as_str())
        .filter(|b| !b.trim().is_empty());
    let description = match body {
        Some(body) => {
            let (text, truncated) = truncate_chars(body, MAX_BODY_CHARS);
            if truncated {
                format!("{}\n... (description truncated)", text)
            } else {
                text
            }
        }
        None => "(no description)".to_string(),
    };

    format!(
        "Pull Request #{number}: {title}\n\
         Author: {author}\n\
         State: {state}\n\
         Branch: {head} -> {base}\n\
         Changes: +{additions} -{deletions} across {files} file(s)\n\
         Created: {created}\n\
         Updated: {updated}\n\
         URL: {url}\n\
         \n\
         Description:\n{description}",
        number = num_field(pr, "/number"),
        title = str_field(pr, "/title"),
        author = str_field(pr, "/user/login"),
        state = state,
        head = str_field(pr, "/head/ref"),
        base = str_field(pr, "/base/ref"),
        additions = num_field(pr, "/additions"),
        deletions = num_field(pr, "/deletions"),
        files = num_field(pr, "/changed_files"),
        created = str_field(pr, "/created_at"),
        updated = str_field(pr, "/updated_at"),
        url = str_field(pr, "/html_url"),
        description = description,
    )
}

pub fn format_pr_files(pr_number: u64, files: &[Value]) -> String {
    if files.is_empty() {
        return format!("Pull Request #{} has no changed files.", pr_number);
    }

    let mut out = format!(
        "Pull Request #{} changes {} file(s):\n",
        pr_number,
        files.len()
    );
    for file in files.iter().take(MAX_FILES) {
        out.push_str(&format!(
            "\nFile: {} ({}) +{} -{}\n",
            str_field(file, "/filename"),
            str_field(file, "/status"),
            num_field(file, "/additions"),
            num_field(file, "/deletions"),
        ));
        match file.get("patch").and_then(|p| p.as_str()) {
            Some(patch) => {
                let (patch, truncated) = truncate_chars(patch, MAX_PATCH_CHARS);
                out.push_str("```diff\n");
                out.push_str(&patch);
                if truncated {
                    out.push_str("\n... (patch truncated)");
                }
                out.push_str("\n```\n");
            }
            None => out.push_str("(no textual diff available)\n"),
        }
    }
    if files.len() > MAX_FILES {
        out.push_str(&format!(
            "\n... and {} more file(s) not shown\n",
            files.len() - MAX_FILES
        ));
    }
    out
}

pub fn format_pr_list(owner: &str, repo: &str, state: &str, prs: &[Value]) -> String {
    if prs.is_empty() {
        return format!("No {} pull requests found in {}/{}.", state, owner, repo);
    }
    let mut out = format!("Pull requests in {}/{} ({}):\n", owner, repo, state);
    for pr in prs {
        out.push_str(&format!(
            "#{} {} by {} [{}] updated {}\n",
            num_field(pr, "/number"),
            str_field(pr, "/title"),
            str_field(pr, "/user/login"),
            str_field(pr, "/state"),
            str_field(pr, "/updated_at"),
        ));
    }
    out
}

fn repo_schema() -> Value {
    json!({
        "type": "string",
        "description": "Repository as owner/repo or a GitHub URL"
    })
}

pub struct GetPrInfoTool {
    github: GithubClient,
}

impl GetPrInfoTool {
    pub fn new(github: GithubClient) -> Self {
        Self { github }
    }
}

#[async_trait]
impl Tool for GetPrInfoTool {
    fn id(&self) -> &str {
        "get_pr_info"
    }

    fn description(&self) -> &str {
        "Fetch a GitHub pull request's title, author, state, branches, change counts and description."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo": repo_schema(),
                "pr_number": {"type": "integer", "description": "Pull request number"}
            },
            "required": ["repo", "pr_number"]
        })
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let (owner, repo) = match repo_or_error(&args)? {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let number = required_u64(&args, "pr_number")?;
        let title = format!("{}/{}#{}", owner, repo, number);

        let output = match self
            .github
            .get_json(&format!("/repos/{}/{}/pulls/{}", owner, repo, number), &[])
            .await
        {
            Ok(pr) => format_pr_info(&pr),
            Err(error) => error,
        };
        Ok(ToolResult::simple(title, output))
    }
}

pub struct GetPrDiffTool {
    github: GithubClient,
}

impl GetPrDiffTool {
    pub fn new(github: GithubClient) -> Self {
        Self { github }
    }
}

#[async_trait]
impl Tool for GetPrDiffTool {
    fn id(&self) -> &str {
        "get_pr_diff"
    }

    fn description(&self) -> &str {
        "Fetch the changed files of a GitHub pull request with their patches."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo": repo_schema(),
                "pr_number": {"type": "integer", "description": "Pull request number"}
            },
            "required": ["repo", "pr_number"]
        })
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let (owner, repo) = match repo_or_error(&args)? {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let number = required_u64(&args, "pr_number")?;
        let title = format!("{}/{}#{} files", owner, repo, number);

        let result = match self
            .github
            .get_json(
                &format!("/repos/{}/{}/pulls/{}/files", owner, repo, number),
                &[("per_page", "100".to_string())],
            )
            .await
        {
            Ok(Value::Array(files)) => ToolResult::simple(title, format_pr_files(number, &files))
                .with_metadata("files", json!(files.len()))
                .truncated(files.len() > MAX_FILES),
            Ok(_) => ToolResult::simple(title, "Error: Unexpected response shape from GitHub"),
            Err(error) => ToolResult::simple(title, error),
        };
        Ok(result)
    }
}

pub struct ListPrsTool {
    github: GithubClient,
}

impl ListPrsTool {
    pub fn new(github: GithubClient) -> Self {
        Self { github }
    }
}

#[async_trait]
impl Tool for ListPrsTool {
    fn id(&self) -> &str {
        "list_prs"
    }

    fn description(&self) -> &str {
        "List pull requests of a GitHub repository."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo": repo_schema(),
                "state": {
                    "type": "string",
                    "enum": ["open", "closed", "all"],
                    "description": "Pull request state (default: open)"
                },
                "limit": {"type": "integer", "description": "Maximum number of pull requests (default: 10)"}
            },
            "required": ["repo"]
        })
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let (owner, repo) = match repo_or_error(&args)? {
            Ok(parsed) => parsed,
            Err(result) => return Ok(result),
        };
        let state = optional_str(&args, "state").unwrap_or("open").to_ascii_lowercase();
        let limit = optional_u64(&args, "limit")?
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let title = format!("{}/{} pull requests", owner, repo);

        let output = match self
            .github
            .get_json(
                &format!("/repos/{}/{}/pulls", owner, repo),
                &[("state", state.clone()), ("per_page", limit.to_string())],
            )
            .await
        {
            Ok(Value::Array(prs)) => format_pr_list(&owner, &repo, &state, &prs),
            Ok(_) => "Error: Unexpected response shape from GitHub".to_string(),
            Err(error) => error,
        };
        Ok(ToolResult::simple(title, output))
    }
}
