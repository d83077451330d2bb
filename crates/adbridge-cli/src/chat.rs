use std::io::{BufRead, Write};
use std::sync::Arc;

use adbridge_agent::AgentExecutor;
use adbridge_config::Config;
use adbridge_core::{AdbCommands, ProcessRunner};
use adbridge_provider::{OpenAICompatibleProvider, ProviderKind, ProviderSettings};
use adbridge_tool::{
    create_default_registry, AzureDevOpsClient, GithubClient, DEFAULT_AZURE_DEVOPS_URL,
};

#[derive(Debug, Default, Clone)]
pub(crate) struct ChatOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_steps: Option<u32>,
}

/// Print `label [default]: ` and read one line. `None` on end of input.
fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
    default: Option<&str>,
) -> anyhow::Result<Option<String>> {
    match default {
        Some(default) => write!(output, "{} [{}]: ", label, default)?,
        None => write!(output, "{}: ", label)?,
    }
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim();
    if line.is_empty() {
        Ok(default.map(str::to_string))
    } else {
        Ok(Some(line.to_string()))
    }
}

fn choose_provider<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<ProviderKind> {
    writeln!(output, "Select LLM provider:")?;
    for (index, kind) in ProviderKind::ALL.iter().enumerate() {
        writeln!(output, "  {}) {}", index + 1, kind.label())?;
    }
    loop {
        let Some(choice) = prompt(input, output, "Choice", Some("1"))? else {
            anyhow::bail!("No provider selected");
        };
        match choice.parse::<ProviderKind>() {
            Ok(kind) => return Ok(kind),
            Err(_) => writeln!(output, "Please enter 1, 2 or 3.")?,
        }
    }
}

/// Work out provider connection settings. Flags win over config; anything
/// still unknown after that is asked for. A provider picked from flags or
/// config takes the remaining values from flags, config or defaults.
pub(crate) fn resolve_settings<R: BufRead, W: Write>(
    options: &ChatOptions,
    config: &Config,
    env_api_key: Option<String>,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<ProviderSettings> {
    let agent = config.agent.clone().unwrap_or_default();
    let configured = options.provider.clone().or(agent.provider);

    let (kind, interactive) = match configured {
        Some(id) => (id.parse::<ProviderKind>()?, false),
        None => (choose_provider(input, output)?, true),
    };

    let mut settings = ProviderSettings::new(kind);
    let base_url = options.base_url.clone().or(agent.base_url);
    let model = options.model.clone().or(agent.model);

    settings.base_url = match base_url {
        Some(url) => url,
        None if interactive => prompt(input, output, "Base URL", Some(kind.default_base_url()))?
            .unwrap_or_else(|| kind.default_base_url().to_string()),
        None => kind.default_base_url().to_string(),
    };
    settings.model = match model {
        Some(model) => model,
        None if interactive => prompt(input, output, "Model", Some(kind.default_model()))?
            .unwrap_or_else(|| kind.default_model().to_string()),
        None => kind.default_model().to_string(),
    };

    if kind.requires_api_key() {
        let key = agent
            .api_key
            .filter(|k| !k.is_empty())
            .or_else(|| env_api_key.filter(|k| !k.is_empty()));
        settings.api_key = match key {
            Some(key) => Some(key),
            None => prompt(input, output, "API key", None)?,
        };
    }

    Ok(settings)
}

pub(crate) async fn run_chat_command(config: &Config, options: ChatOptions) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let env_api_key = ProviderKind::OpenAI
        .api_key_env()
        .and_then(|name| std::env::var(name).ok());
    let settings = resolve_settings(&options, config, env_api_key, &mut input, &mut output)?;

    let provider = OpenAICompatibleProvider::new(settings.clone())?;
    tracing::info!(provider = %settings.kind, model = %settings.model, base_url = %settings.base_url, "provider ready");

    let github = GithubClient::from_env(config.github_api_url(), config.github_token());
    let runner = Arc::new(ProcessRunner::with_timeout_secs(config.command_timeout_secs()));
    let commands = AdbCommands::new(config.adb_path(), config.emulator_path());
    let azure = AzureDevOpsClient::from_env(DEFAULT_AZURE_DEVOPS_URL, None);
    let registry = create_default_registry(github, azure, runner, commands).await;

    let max_steps = options.max_steps.unwrap_or_else(|| config.max_steps());
    let temperature = config.agent.as_ref().and_then(|a| a.temperature);
    let mut agent = AgentExecutor::new(Arc::new(provider), Arc::new(registry))
        .with_max_steps(max_steps)
        .with_temperature(temperature);

    writeln!(
        output,
        "\nConnected to {} ({}) at {}",
        settings.kind.label(),
        settings.model,
        settings.base_url
    )?;
    crate::repl::run_repl(&mut agent, input, output).await
}
