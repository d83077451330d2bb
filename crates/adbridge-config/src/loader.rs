use crate::Config;
use anyhow::{Context, Result};
use jsonc_parser::{parse_to_serde_value, ParseOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "ADBRIDGE_CONFIG";
pub const CONFIG_CONTENT_ENV: &str = "ADBRIDGE_CONFIG_CONTENT";

const CONFIG_FILE_NAMES: [&str; 2] = ["adbridge.jsonc", "adbridge.json"];

static ENV_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{env:([^}]+)\}").unwrap());

pub struct ConfigLoader {
    config: Config,
    config_paths: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            config_paths: Vec::new(),
        }
    }

    pub fn load_from_str(&mut self, content: &str) -> Result<()> {
        let content = substitute_env_vars(content);
        let config = parse_jsonc(&content).with_context(|| "Failed to parse config content")?;
        self.config.merge(config);
        Ok(())
    }

    /// Missing files are skipped silently.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let content = substitute_env_vars(&content);
        let config = parse_jsonc(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        tracing::debug!(path = %path.display(), "loaded config file");
        self.config.merge(config);
        self.config_paths.push(path.to_path_buf());
        Ok(())
    }

    pub fn load_global(&mut self) -> Result<()> {
        if let Some(dir) = global_config_dir() {
            self.load_first_in(&dir)?;
        }
        Ok(())
    }

    pub fn load_project<P: AsRef<Path>>(&mut self, project_dir: P) -> Result<()> {
        self.load_first_in(project_dir.as_ref())
    }

    fn load_first_in(&mut self, dir: &Path) -> Result<()> {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if path.exists() {
                return self.load_from_file(&path);
            }
        }
        Ok(())
    }

    pub fn load_from_env(&mut self) -> Result<()> {
        if let Ok(config_path) = env::var(CONFIG_ENV) {
            self.load_from_file(&config_path)?;
        }
        Ok(())
    }

    pub fn load_from_env_content(&mut self) -> Result<()> {
        if let Ok(content) = env::var(CONFIG_CONTENT_ENV) {
            if !content.trim().is_empty() {
                self.load_from_str(&content)?;
            }
        }
        Ok(())
    }

    /// Merge order, lowest priority first:
    /// 1. global (`<config_dir>/adbridge/adbridge.json{c,}`)
    /// 2. project (`adbridge.json{c,}` in `project_dir`)
    /// 3. `ADBRIDGE_CONFIG`
    /// 4. `ADBRIDGE_CONFIG_CONTENT`
    pub fn load_all<P: AsRef<Path>>(&mut self, project_dir: P) -> Result<Config> {
        self.load_global()?;
        self.load_project(project_dir)?;
        self.load_from_env()?;
        self.load_from_env_content()?;
        Ok(self.config.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }
}

pub fn global_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("adbridge"))
}

/// Replace `{env:VAR}` with the variable's value, or nothing when unset.
fn substitute_env_vars(text: &str) -> String {
    ENV_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .to_string()
}

fn parse_jsonc(content: &str) -> Result<Config> {
    let parse_options = ParseOptions {
        allow_trailing_commas: true,
        ..Default::default()
    };
    let parsed = parse_to_serde_value(content, &parse_options)
        .with_context(|| "Failed to parse JSONC")?
        .context("Config content is empty")?;
    serde_json::from_value(parsed).with_context(|| "Failed to parse config JSON")
}

pub fn load_config<P: AsRef<Path>>(project_dir: P) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    loader.load_all(project_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_jsonc_with_comments_and_trailing_commas() {
        let content = r#"{
            // bridge
            "server": { "port": 3100, },
            /* agent */
            "agent": { "provider": "ollama", "max_steps": 4 },
        }"#;
        let config = parse_jsonc(content).unwrap();
        assert_eq!(config.port(), 3100);
        assert_eq!(config.max_steps(), 4);
        assert_eq!(
            config.agent.and_then(|a| a.provider),
            Some("ollama".to_string())
        );
    }

    #[test]
    fn accepts_camel_case_keys() {
        let content = r#"{"adb": {"adbPath": "/sdk/adb", "commandTimeoutSecs": 5}}"#;
        let config = parse_jsonc(content).unwrap();
        assert_eq!(config.adb_path(), "/sdk/adb");
        assert_eq!(config.command_timeout_secs(), 5);
    }

    #[test]
    fn substitutes_environment_variables() {
        env::set_var("ADBRIDGE_TEST_GITHUB_TOKEN", "ghp_test");
        let out = substitute_env_vars(
            r#"{"github": {"token": "{env:ADBRIDGE_TEST_GITHUB_TOKEN}", "apiUrl": "{env:ADBRIDGE_TEST_UNSET_VAR}"}}"#,
        );
        assert!(out.contains("\"ghp_test\""));
        assert!(out.contains("\"apiUrl\": \"\""));
    }

    #[test]
    fn project_jsonc_wins_over_json_and_later_files_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("adbridge.jsonc"),
            r#"{"server": {"port": 4100, "hostname": "0.0.0.0"}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("adbridge.json"),
            r#"{"server": {"port": 9999}}"#,
        )
        .unwrap();
        let extra = dir.path().join("extra.json");
        fs::write(&extra, r#"{"server": {"port": 4200}}"#).unwrap();

        let mut loader = ConfigLoader::new();
        loader.load_project(dir.path()).unwrap();
        assert_eq!(loader.config().port(), 4100);

        loader.load_from_file(&extra).unwrap();
        assert_eq!(loader.config().port(), 4200);
        assert_eq!(loader.config().hostname(), "0.0.0.0");
        assert_eq!(loader.config_paths().len(), 2);
    }

    #[test]
    fn missing_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ConfigLoader::new();
        loader
            .load_from_file(dir.path().join("nope.json"))
            .unwrap();
        assert!(loader.config_paths().is_empty());
    }

    #[test]
    fn invalid_content_is_an_error() {
        let mut loader = ConfigLoader::new();
        assert!(loader.load_from_str("{\"server\": ").is_err());
        assert!(loader.load_from_str("").is_err());
    }
}
