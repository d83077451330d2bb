use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use adbridge_core::{
    cross_reference, emulator_port, install_failed, parse_avd_name_reply, parse_avd_names,
    parse_devices, parse_packages, AvdDescriptor, CommandResult, CommandSpec, DeviceEntry,
    EmulatorOptions, MemoryEntry,
};

use crate::{ApiError, Result, ServerState};

pub fn router() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/health", get(health))
        .nest("/adb", adb_routes())
}

fn adb_routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/avds", get(list_avds))
        .route("/packages", post(list_packages))
        .route("/install", post(install_apk))
        .route("/start-emulator", post(start_emulator))
        .route("/stop-emulator", post(stop_emulator))
        .route("/command", post(run_command))
        .route("/save-memory", post(save_memory))
        .route("/get-memory", post(get_memory))
        .route("/list-memories", get(list_memories))
}

fn parse_body<T: DeserializeOwned>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload.map(|Json(body)| body).map_err(ApiError::from)
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::MissingField(field.to_string()))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub adb: Option<String>,
    pub emulator: Option<String>,
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let resolve = |program: &str| {
        which::which(program)
            .ok()
            .map(|path| path.display().to_string())
    };
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        adb: resolve(state.commands.adb_path()),
        emulator: resolve(state.commands.emulator_path()),
    })
}

#[derive(Debug, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    fn new(spec: &CommandSpec, result: CommandResult) -> Self {
        Self {
            success: true,
            command: spec.display(),
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        }
    }
}

/// Run `spec` and turn a nonzero exit into a 500.
async fn run_checked(state: &ServerState, spec: &CommandSpec) -> Result<CommandResult> {
    let result = state.runner.run(spec).await?;
    if !result.exit_ok {
        return Err(ApiError::CommandFailed(result.error_text()));
    }
    Ok(result)
}

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    #[serde(flatten)]
    pub output: CommandOutput,
    pub devices: Vec<DeviceEntry>,
}

async fn list_devices(State(state): State<Arc<ServerState>>) -> Result<Json<DevicesResponse>> {
    let spec = state.commands.devices();
    let result = run_checked(&state, &spec).await?;
    let devices = parse_devices(&result.stdout);
    Ok(Json(DevicesResponse {
        output: CommandOutput::new(&spec, result),
        devices,
    }))
}

#[derive(Debug, Serialize)]
pub struct AvdsResponse {
    #[serde(flatten)]
    pub output: CommandOutput,
    pub avds: Vec<AvdDescriptor>,
}

/// Map AVD name to console port for every emulator that answers.
async fn running_emulators(state: &ServerState) -> HashMap<String, u16> {
    let mut running = HashMap::new();
    let result = match state.runner.run(&state.commands.device_list()).await {
        Ok(result) if result.exit_ok => result,
        Ok(result) => {
            tracing::warn!(error = %result.error_text(), "device list failed; reporting no running AVDs");
            return running;
        }
        Err(error) => {
            tracing::warn!(%error, "device list failed; reporting no running AVDs");
            return running;
        }
    };

    for device in parse_devices(&result.stdout) {
        let Some(port) = emulator_port(&device.serial) else {
            continue;
        };
        match state.runner.run(&state.commands.avd_name(&device.serial)).await {
            Ok(reply) if reply.exit_ok => {
                if let Some(name) = parse_avd_name_reply(&reply.stdout) {
                    running.insert(name, port);
                }
            }
            Ok(reply) => {
                tracing::debug!(serial = %device.serial, error = %reply.error_text(), "avd name query failed")
            }
            Err(error) => tracing::debug!(serial = %device.serial, %error, "avd name query failed"),
        }
    }
    running
}

async fn list_avds(State(state): State<Arc<ServerState>>) -> Result<Json<AvdsResponse>> {
    let spec = state.commands.list_avds();
    let result = run_checked(&state, &spec).await?;
    let names = parse_avd_names(&result.stdout);
    let running = running_emulators(&state).await;
    Ok(Json(AvdsResponse {
        avds: cross_reference(&names, &running),
        output: CommandOutput::new(&spec, result),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PackagesRequest {
    pub device: Option<String>,
    pub package_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    #[serde(flatten)]
    pub output: CommandOutput,
    pub packages: Vec<String>,
    pub count: usize,
}

async fn list_packages(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<PackagesRequest>, JsonRejection>,
) -> Result<Json<PackagesResponse>> {
    let req = parse_body(payload)?;
    let device = required(req.device, "device")?;
    let filter = req
        .package_name
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    let spec = state.commands.list_packages(&device, filter.as_deref());
    let result = state.runner.run(&spec).await?;
    // `pm list packages <filter>` exits 1 when nothing matches.
    let no_match = filter.is_some() && result.exit_code == Some(1);
    if !result.exit_ok && !no_match {
        return Err(ApiError::CommandFailed(result.error_text()));
    }

    let packages = if no_match {
        Vec::new()
    } else {
        parse_packages(&result.stdout)
    };
    Ok(Json(PackagesResponse {
        count: packages.len(),
        packages,
        output: CommandOutput::new(&spec, result),
    }))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub device: Option<String>,
    pub apk_path: Option<String>,
}

async fn install_apk(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<InstallRequest>, JsonRejection>,
) -> Result<Json<CommandOutput>> {
    let req = parse_body(payload)?;
    let device = required(req.device, "device")?;
    let apk_path = required(req.apk_path, "apk_path")?;

    let spec = state.commands.install(&device, &apk_path);
    let result = state.runner.run(&spec).await?;
    if !result.exit_ok || install_failed(&result.stdout, &result.stderr) {
        return Err(ApiError::CommandFailed(result.error_text()));
    }
    tracing::info!(%device, %apk_path, "apk installed");
    Ok(Json(CommandOutput::new(&spec, result)))
}

#[derive(Debug, Deserialize)]
pub struct StartEmulatorRequest {
    pub avd_name: Option<String>,
    #[serde(default)]
    pub options: Option<EmulatorOptions>,
}

#[derive(Debug, Serialize)]
pub struct StartEmulatorResponse {
    #[serde(flatten)]
    pub output: CommandOutput,
    pub pid: Option<u32>,
    pub message: String,
}

async fn start_emulator(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<StartEmulatorRequest>, JsonRejection>,
) -> Result<Json<StartEmulatorResponse>> {
    let req = parse_body(payload)?;
    let avd_name = required(req.avd_name, "avd_name")?;
    let options = req.options.unwrap_or_default();

    let spec = state.commands.start_emulator(&avd_name, &options);
    let pid = state.runner.spawn_detached(&spec).await?;
    Ok(Json(StartEmulatorResponse {
        output: CommandOutput {
            success: true,
            command: spec.display(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
        },
        pid,
        message: format!("Emulator {} is starting", avd_name),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub device: Option<String>,
}

async fn stop_emulator(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<DeviceRequest>, JsonRejection>,
) -> Result<Json<CommandOutput>> {
    let req = parse_body(payload)?;
    let device = required(req.device, "device")?;
    let spec = state.commands.stop_emulator(&device);
    let result = run_checked(&state, &spec).await?;
    Ok(Json(CommandOutput::new(&spec, result)))
}

#[derive(Debug, Deserialize)]
pub struct RawCommandRequest {
    pub command: Option<String>,
}

async fn run_command(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<RawCommandRequest>, JsonRejection>,
) -> Result<Json<CommandOutput>> {
    let req = parse_body(payload)?;
    let command = required(req.command, "command")?;
    let spec = state.commands.raw(&command)?;
    let result = run_checked(&state, &spec).await?;
    Ok(Json(CommandOutput::new(&spec, result)))
}

#[derive(Debug, Serialize)]
pub struct MemoryView {
    pub memory_key: String,
    pub memory_value: String,
    pub updated_at: DateTime<Utc>,
}

impl From<MemoryEntry> for MemoryView {
    fn from(entry: MemoryEntry) -> Self {
        Self {
            memory_key: entry.key,
            memory_value: entry.value,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemoryResponse {
    pub success: bool,
    #[serde(flatten)]
    pub entry: MemoryView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveMemoryRequest {
    pub memory_key: Option<String>,
    pub memory_value: Option<String>,
}

async fn save_memory(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<SaveMemoryRequest>, JsonRejection>,
) -> Result<Json<MemoryResponse>> {
    let req = parse_body(payload)?;
    let entry = state.memory.save(
        req.memory_key.unwrap_or_default(),
        req.memory_value.unwrap_or_default(),
    )?;
    let message = format!("Memory '{}' saved", entry.key);
    Ok(Json(MemoryResponse {
        success: true,
        entry: entry.into(),
        message: Some(message),
    }))
}

#[derive(Debug, Deserialize)]
pub struct GetMemoryRequest {
    pub memory_key: Option<String>,
}

async fn get_memory(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<GetMemoryRequest>, JsonRejection>,
) -> Result<Json<MemoryResponse>> {
    let req = parse_body(payload)?;
    let key = req
        .memory_key
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::MissingField("memory_key".to_string()))?;
    let entry = state
        .memory
        .get(&key)
        .ok_or_else(|| ApiError::NotFound(format!("Memory '{}' not found", key)))?;
    Ok(Json(MemoryResponse {
        success: true,
        entry: entry.into(),
        message: None,
    }))
}

#[derive(Debug, Serialize)]
pub struct MemoryListResponse {
    pub success: bool,
    pub count: usize,
    pub memories: Vec<MemoryView>,
}

async fn list_memories(State(state): State<Arc<ServerState>>) -> Json<MemoryListResponse> {
    let memories: Vec<MemoryView> = state.memory.list().into_iter().map(Into::into).collect();
    Json(MemoryListResponse {
        success: true,
        count: memories.len(),
        memories,
    })
}
