//! Install the newest successful Azure DevOps build onto a device.
//!
//! Finds the latest succeeded build of a pipeline on a branch, downloads the
//! named artifact, pulls the first `.apk` out of the zip and hands it to
//! `adb install -r`. Every failure comes back as a JSON text result.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use adbridge_core::{install_failed, AdbCommands, CommandRunner};

use crate::{optional_str, required_str, Tool, ToolContext, ToolError, ToolResult};

pub const AZURE_DEVOPS_PAT_ENV: &str = "AZURE_DEVOPS_PAT";
pub const DEFAULT_AZURE_DEVOPS_URL: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.0";
const DEFAULT_ARTIFACT: &str = "drop";
const DEFAULT_BRANCH: &str = "refs/heads/main";
const API_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AzureDevOpsClient {
    client: Client,
    base_url: String,
    pat: Option<String>,
}

impl AzureDevOpsClient {
    pub fn new(base_url: impl Into<String>, pat: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("adbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pat: pat.filter(|p| !p.is_empty()),
        }
    }

    /// PAT from `AZURE_DEVOPS_PAT` when `pat` is `None`.
    pub fn from_env(base_url: impl Into<String>, pat: Option<String>) -> Self {
        let pat = pat.or_else(|| std::env::var(AZURE_DEVOPS_PAT_ENV).ok());
        Self::new(base_url, pat)
    }

    fn get(&self, url: &str, pat: &str) -> RequestBuilder {
        self.client.get(url).basic_auth("", Some(pat))
    }
}

/// `main` becomes `refs/heads/main`; full refs pass through.
fn normalize_branch(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

/// Pipeline ids arrive as strings or numbers.
fn pipeline_id(args: &Value) -> Result<String, ToolError> {
    match args.get("pipeline_id") {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ToolError::InvalidArguments(
            "pipeline_id is required".to_string(),
        )),
    }
}

struct BuildJob {
    organization: String,
    project: String,
    pipeline_id: String,
    pat: String,
    artifact_name: String,
    branch: String,
    device: Option<String>,
}

fn failure(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into()})
}

struct ExtractedApk {
    // Keeps the extraction directory alive until the install finishes.
    _dir: TempDir,
    path: PathBuf,
    file_name: String,
}

/// Copy the first `.apk` entry of `archive` into a fresh temp dir.
fn extract_apk(archive: Vec<u8>) -> Result<Option<ExtractedApk>, String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| format!("Artifact is not a valid zip archive: {}", e))?;
    let dir = tempfile::tempdir().map_err(|e| format!("Failed to create temp dir: {}", e))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| format!("Failed to read artifact entry: {}", e))?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".apk") {
            continue;
        }
        // Only the file name is kept, so entry paths cannot escape `dir`.
        let Some(file_name) = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };

        let path = dir.path().join(&file_name);
        let mut out = std::fs::File::create(&path)
            .map_err(|e| format!("Failed to write {}: {}", file_name, e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| format!("Failed to extract {}: {}", file_name, e))?;
        return Ok(Some(ExtractedApk {
            _dir: dir,
            path,
            file_name,
        }));
    }
    Ok(None)
}

pub struct InstallLatestBuildTool {
    azure: AzureDevOpsClient,
    runner: Arc<dyn CommandRunner>,
    commands: AdbCommands,
}

impl InstallLatestBuildTool {
    pub fn new(
        azure: AzureDevOpsClient,
        runner: Arc<dyn CommandRunner>,
        commands: AdbCommands,
    ) -> Self {
        Self {
            azure,
            runner,
            commands,
        }
    }

    /// On failure returns the HTTP status (or transport error) and the response body.
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        pat: &str,
    ) -> Result<Value, (String, String)> {
        let response = self
            .azure
            .get(url, pat)
            .query(query)
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(|e| (e.to_string(), String::new()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err((status.as_u16().to_string(), body));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| (format!("invalid JSON ({})", e), String::new()))
    }

    async fn install(&self, job: &BuildJob) -> Result<Value, Value> {
        let api = format!(
            "{}/{}/{}/_apis/build",
            self.azure.base_url, job.organization, job.project
        );

        let builds = self
            .get_json(
                &format!("{}/builds", api),
                &[
                    ("definitions", job.pipeline_id.as_str()),
                    ("branchName", job.branch.as_str()),
                    ("resultFilter", "succeeded"),
                    ("$top", "1"),
                    ("api-version", API_VERSION),
                ],
                &job.pat,
            )
            .await
            .map_err(|(status, details)| {
                let mut error = failure(format!("Failed to get builds: {}", status));
                error["details"] = json!(details);
                error
            })?;

        let Some(build) = builds.pointer("/value/0") else {
            return Err(failure(format!(
                "No successful builds found for branch {}",
                job.branch
            )));
        };
        let build_id = build.get("id").cloned().unwrap_or(Value::Null);
        let build_number = build.get("buildNumber").cloned().unwrap_or(Value::Null);
        let build_label = build_number
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| build_number.to_string());
        let web_url = build.pointer("/_links/web/href").cloned().unwrap_or(Value::Null);
        let with_build = |mut error: Value| {
            error["build_id"] = build_id.clone();
            error["build_number"] = build_number.clone();
            error
        };

        let build_ref = match &build_id {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return Err(with_build(failure("Build response has no id"))),
        };
        let artifacts = self
            .get_json(
                &format!("{}/builds/{}/artifacts", api, build_ref),
                &[
                    ("artifactName", job.artifact_name.as_str()),
                    ("api-version", API_VERSION),
                ],
                &job.pat,
            )
            .await
            .map_err(|(status, _)| with_build(failure(format!("Failed to get artifact: {}", status))))?;

        if artifacts["value"].as_array().is_some_and(|v| v.is_empty()) {
            return Err(with_build(failure(format!(
                "Artifact '{}' not found in build {}",
                job.artifact_name, build_label
            ))));
        }
        // A single-artifact lookup answers with the object itself; listings wrap it in `value`.
        let artifact = artifacts.pointer("/value/0").unwrap_or(&artifacts);
        let Some(download_url) = artifact
            .pointer("/resource/downloadUrl")
            .and_then(|v| v.as_str())
        else {
            return Err(with_build(failure(format!(
                "Artifact '{}' has no download URL in build {}",
                job.artifact_name, build_label
            ))));
        };

        tracing::info!(build = %build_label, artifact = %job.artifact_name, "downloading build artifact");
        let response = self
            .azure
            .get(download_url, &job.pat)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| with_build(failure(format!("Failed to download artifact: {}", e))))?;
        if !response.status().is_success() {
            return Err(with_build(failure(format!(
                "Failed to download artifact: {}",
                response.status().as_u16()
            ))));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| with_build(failure(format!("Failed to download artifact: {}", e))))?;

        let extracted = tokio::task::spawn_blocking(move || extract_apk(bytes.to_vec()))
            .await
            .map_err(|e| with_build(failure(format!("Artifact extraction failed: {}", e))))?
            .map_err(|e| with_build(failure(e)))?;
        let Some(apk) = extracted else {
            let mut error = with_build(failure("No APK file found in artifact"));
            error["downloaded"] = json!(true);
            return Err(error);
        };

        let apk_path = apk.path.to_string_lossy().into_owned();
        let spec = self.commands.install_apk(job.device.as_deref(), &apk_path);
        let result = self.runner.run(&spec).await.map_err(|e| {
            with_build(failure(format!("Failed to run adb install: {}", e)))
        })?;

        let stderr = result.stderr.trim();
        Ok(json!({
            "success": result.exit_ok && !install_failed(&result.stdout, &result.stderr),
            "build_id": build_id,
            "build_number": build_number,
            "branch": job.branch,
            "apk_file": apk.file_name,
            "install_output": result.stdout.trim(),
            "install_error": if stderr.is_empty() { Value::Null } else { json!(stderr) },
            "web_url": web_url,
        }))
    }
}

#[async_trait]
impl Tool for InstallLatestBuildTool {
    fn id(&self) -> &str {
        "install_latest_build"
    }

    fn description(&self) -> &str {
        "Download the latest successful Azure DevOps build of a pipeline on a branch and install its APK with 'adb install -r'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "organization": {"type": "string", "description": "Azure DevOps organization"},
                "project": {"type": "string", "description": "Project name"},
                "pipeline_id": {"type": "string", "description": "Pipeline (build definition) id"},
                "pat_token": {"type": "string", "description": "Personal access token; AZURE_DEVOPS_PAT is used when omitted"},
                "artifact_name": {"type": "string", "description": "Artifact holding the APK (default: drop)"},
                "branch": {"type": "string", "description": "Branch, e.g. main or refs/heads/main (default: refs/heads/main)"},
                "device": {"type": "string", "description": "Device serial when more than one is connected"}
            },
            "required": ["organization", "project", "pipeline_id"]
        })
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let organization = required_str(&args, "organization")?.trim().to_string();
        let project = required_str(&args, "project")?.trim().to_string();
        let pipeline_id = pipeline_id(&args)?;
        let branch = normalize_branch(optional_str(&args, "branch").unwrap_or(DEFAULT_BRANCH).trim());

        let pat = optional_str(&args, "pat_token")
            .map(str::to_string)
            .or_else(|| self.azure.pat.clone());
        let Some(pat) = pat else {
            let body = failure(format!(
                "An Azure DevOps PAT is required: pass pat_token or set {}",
                AZURE_DEVOPS_PAT_ENV
            ));
            return Ok(ToolResult::simple(self.id(), body.to_string()));
        };

        let job = BuildJob {
            organization,
            project,
            pipeline_id,
            pat,
            artifact_name: optional_str(&args, "artifact_name")
                .unwrap_or(DEFAULT_ARTIFACT)
                .to_string(),
            branch,
            device: optional_str(&args, "device").map(str::to_string),
        };

        let outcome = tokio::select! {
            outcome = self.install(&job) => outcome,
            _ = ctx.abort.cancelled() => return Err(ToolError::Cancelled),
        };
        let body = match outcome {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(error = %error["error"], "latest build install failed");
                error
            }
        };
        Ok(ToolResult::simple(self.id(), body.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbridge_core::{CommandError, CommandResult, CommandSpec};
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Write;

    #[derive(Default)]
    struct InstallRecorder {
        installs: Mutex<Vec<(CommandSpec, bool)>>,
    }

    #[async_trait]
    impl CommandRunner for InstallRecorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError> {
            let apk_exists = spec.args.last().map(|p| Path::new(p).is_file()).unwrap_or(false);
            self.installs.lock().push((spec.clone(), apk_exists));
            Ok(CommandResult::success("Performing Streamed Install\nSuccess\n"))
        }

        async fn spawn_detached(&self, _spec: &CommandSpec) -> Result<Option<u32>, CommandError> {
            Ok(None)
        }
    }

    fn artifact_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("Basic "))
            .unwrap_or(false)
    }

    /// Azure DevOps stand-in serving one build whose artifact is `archive`.
    async fn azure_mock(archive: Vec<u8>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let download = format!("{}/download/drop.zip", base);

        let router = Router::new()
            .route(
                "/myorg/MyProject/_apis/build/builds",
                get(|headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({})));
                    }
                    if q.get("branchName").map(String::as_str) != Some("refs/heads/main")
                        || q.get("resultFilter").map(String::as_str) != Some("succeeded")
                    {
                        return (StatusCode::OK, Json(json!({"count": 0, "value": []})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({"count": 1, "value": [{
                            "id": 42,
                            "buildNumber": "20261019.3",
                            "_links": {"web": {"href": "https://dev.azure.com/myorg/MyProject/_build/results?buildId=42"}}
                        }]})),
                    )
                }),
            )
            .route(
                "/myorg/MyProject/_apis/build/builds/42/artifacts",
                get(move |Query(q): Query<HashMap<String, String>>| {
                    let download = download.clone();
                    async move {
                        if q.get("artifactName").map(String::as_str) != Some("drop") {
                            return (StatusCode::NOT_FOUND, Json(json!({"message": "no artifact"})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({"name": "drop", "resource": {"downloadUrl": download}})),
                        )
                    }
                }),
            )
            .route(
                "/download/drop.zip",
                get(move || {
                    let archive = archive.clone();
                    async move { archive }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        base
    }

    fn ctx() -> ToolContext {
        ToolContext::new("test", std::env::temp_dir())
    }

    fn tool(base: String, runner: Arc<InstallRecorder>) -> InstallLatestBuildTool {
        InstallLatestBuildTool::new(
            AzureDevOpsClient::new(base, None),
            runner,
            AdbCommands::default(),
        )
    }

    fn request() -> Value {
        json!({
            "organization": "myorg",
            "project": "MyProject",
            "pipeline_id": 123,
            "pat_token": "pat-123",
            "branch": "main"
        })
    }

    #[tokio::test]
    async fn installs_apk_from_latest_build() {
        let archive = artifact_zip(&[
            ("drop/readme.txt", b"notes"),
            ("drop/app/app-release.apk", b"PK-fake-apk"),
        ]);
        let base = azure_mock(archive).await;
        let runner = Arc::new(InstallRecorder::default());

        let result = tool(base, runner.clone())
            .execute(request(), ctx())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["build_id"], 42);
        assert_eq!(body["build_number"], "20261019.3");
        assert_eq!(body["branch"], "refs/heads/main");
        assert_eq!(body["apk_file"], "app-release.apk");
        assert!(body["web_url"].as_str().unwrap().contains("buildId=42"));

        let installs = runner.installs.lock();
        let (spec, apk_existed) = &installs[0];
        assert_eq!(&spec.args[..2], ["install", "-r"]);
        assert!(spec.args[2].ends_with("app-release.apk"));
        assert!(apk_existed);
        assert!(!Path::new(&spec.args[2]).exists());
    }

    #[tokio::test]
    async fn artifact_without_apk_is_reported() {
        let base = azure_mock(artifact_zip(&[("drop/readme.txt", b"notes")])).await;
        let runner = Arc::new(InstallRecorder::default());

        let result = tool(base, runner.clone())
            .execute(request(), ctx())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(body["error"], "No APK file found in artifact");
        assert_eq!(body["downloaded"], true);
        assert_eq!(body["build_number"], "20261019.3");
        assert!(runner.installs.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_builds_and_artifacts_are_text() {
        let base = azure_mock(artifact_zip(&[])).await;
        let runner = Arc::new(InstallRecorder::default());
        let tool = tool(base, runner.clone());

        let mut args = request();
        args["branch"] = json!("release/9.9");
        let body: Value =
            serde_json::from_str(&tool.execute(args, ctx()).await.unwrap().output).unwrap();
        assert_eq!(
            body["error"],
            "No successful builds found for branch refs/heads/release/9.9"
        );

        let mut args = request();
        args["artifact_name"] = json!("symbols");
        let body: Value =
            serde_json::from_str(&tool.execute(args, ctx()).await.unwrap().output).unwrap();
        assert_eq!(body["error"], "Failed to get artifact: 404");
        assert_eq!(body["build_id"], 42);
        assert!(runner.installs.lock().is_empty());
    }

    #[tokio::test]
    async fn http_failure_on_build_query_is_text() {
        let base = serve(Router::new().route(
            "/myorg/MyProject/_apis/build/builds",
            get(|| async { (StatusCode::UNAUTHORIZED, "TF400813: not authorized") }),
        ))
        .await;
        let result = tool(base, Arc::new(InstallRecorder::default()))
            .execute(request(), ctx())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Failed to get builds: 401");
        assert_eq!(body["details"], "TF400813: not authorized");
    }

    #[tokio::test]
    async fn missing_pat_is_text() {
        let mut args = request();
        args.as_object_mut().unwrap().remove("pat_token");
        let result = tool("http://127.0.0.1:9".to_string(), Arc::new(InstallRecorder::default()))
            .execute(args, ctx())
            .await
            .unwrap();
        assert!(result.output.contains("AZURE_DEVOPS_PAT"));
    }

    #[test]
    fn branch_names_become_refs() {
        assert_eq!(normalize_branch("main"), "refs/heads/main");
        assert_eq!(normalize_branch("refs/heads/dev"), "refs/heads/dev");
        assert_eq!(normalize_branch("refs/pull/7/merge"), "refs/pull/7/merge");
    }
}
