use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_STEPS: u32 = 10;
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(
        rename = "logLevel",
        alias = "log_level",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adb: Option<AdbConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Extra CORS origins on top of localhost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdbConfig {
    #[serde(
        rename = "adbPath",
        alias = "adb_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub adb_path: Option<String>,
    #[serde(
        rename = "emulatorPath",
        alias = "emulator_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub emulator_path: Option<String>,
    /// Seconds before a blocking command is killed. `0` disables the limit.
    #[serde(
        rename = "commandTimeoutSecs",
        alias = "command_timeout_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub command_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// `ollama`, `openai` or `lmstudio`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(
        rename = "baseUrl",
        alias = "base_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url: Option<String>,
    #[serde(
        rename = "apiKey",
        alias = "api_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<String>,
    #[serde(
        rename = "maxSteps",
        alias = "max_steps",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GithubConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        rename = "apiUrl",
        alias = "api_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_url: Option<String>,
}

trait DeepMerge {
    fn deep_merge(&mut self, other: Self);
}

fn merge_option_replace<T>(target: &mut Option<T>, source: Option<T>) {
    if let Some(value) = source {
        *target = Some(value);
    }
}

fn merge_option_deep<T: DeepMerge>(target: &mut Option<T>, source: Option<T>) {
    if let Some(source_value) = source {
        match target {
            Some(target_value) => target_value.deep_merge(source_value),
            None => *target = Some(source_value),
        }
    }
}

impl DeepMerge for ServerConfig {
    fn deep_merge(&mut self, other: Self) {
        merge_option_replace(&mut self.port, other.port);
        merge_option_replace(&mut self.hostname, other.hostname);
        merge_option_replace(&mut self.cors, other.cors);
    }
}

impl DeepMerge for AdbConfig {
    fn deep_merge(&mut self, other: Self) {
        merge_option_replace(&mut self.adb_path, other.adb_path);
        merge_option_replace(&mut self.emulator_path, other.emulator_path);
        merge_option_replace(&mut self.command_timeout_secs, other.command_timeout_secs);
    }
}

impl DeepMerge for AgentConfig {
    fn deep_merge(&mut self, other: Self) {
        merge_option_replace(&mut self.provider, other.provider);
        merge_option_replace(&mut self.model, other.model);
        merge_option_replace(&mut self.base_url, other.base_url);
        merge_option_replace(&mut self.api_key, other.api_key);
        merge_option_replace(&mut self.max_steps, other.max_steps);
        merge_option_replace(&mut self.temperature, other.temperature);
    }
}

impl DeepMerge for GithubConfig {
    fn deep_merge(&mut self, other: Self) {
        merge_option_replace(&mut self.token, other.token);
        merge_option_replace(&mut self.api_url, other.api_url);
    }
}

impl Config {
    pub fn merge(&mut self, other: Config) {
        merge_option_replace(&mut self.schema, other.schema);
        merge_option_replace(&mut self.log_level, other.log_level);
        merge_option_deep(&mut self.server, other.server);
        merge_option_deep(&mut self.adb, other.adb);
        merge_option_deep(&mut self.agent, other.agent);
        merge_option_deep(&mut self.github, other.github);
    }

    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn hostname(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.hostname.clone())
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.server
            .as_ref()
            .and_then(|s| s.cors.clone())
            .unwrap_or_default()
    }

    pub fn adb_path(&self) -> String {
        self.adb
            .as_ref()
            .and_then(|a| a.adb_path.clone())
            .unwrap_or_else(|| "adb".to_string())
    }

    pub fn emulator_path(&self) -> String {
        self.adb
            .as_ref()
            .and_then(|a| a.emulator_path.clone())
            .unwrap_or_else(|| "emulator".to_string())
    }

    pub fn command_timeout_secs(&self) -> u64 {
        self.adb
            .as_ref()
            .and_then(|a| a.command_timeout_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
    }

    pub fn max_steps(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_steps)
            .unwrap_or(DEFAULT_MAX_STEPS)
    }

    pub fn github_api_url(&self) -> String {
        self.github
            .as_ref()
            .and_then(|g| g.api_url.clone())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
    }

    pub fn github_token(&self) -> Option<String> {
        self.github
            .as_ref()
            .and_then(|g| g.token.clone())
            .filter(|t| !t.is_empty())
    }
}
