use clap::Parser;

mod chat;
mod cli;
mod logging;
mod repl;
mod serve;

use chat::{run_chat_command, ChatOptions};
use cli::*;
use serve::run_serve_command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_dir = std::env::current_dir().unwrap_or_default();
    let config = adbridge_config::load_config(&project_dir)?;
    let level = config.log_level.as_deref();

    match cli.command {
        Some(Commands::Serve {
            port,
            hostname,
            cors,
        }) => {
            logging::init_stderr(level);
            run_serve_command(&config, port, hostname, cors).await?;
        }
        Some(Commands::Chat {
            provider,
            model,
            base_url,
            max_steps,
        }) => {
            let _guard = match logging::init_file(level) {
                Some((path, guard)) => {
                    tracing::info!(path = %path.display(), "logging to file");
                    Some(guard)
                }
                None => None,
            };
            let options = ChatOptions {
                provider,
                model,
                base_url,
                max_steps,
            };
            run_chat_command(&config, options).await?;
        }
        Some(Commands::Version) => {
            println!("adbridge {}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
