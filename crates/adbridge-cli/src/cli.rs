use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "adbridge")]
#[command(about = "ADB command bridge and code-review agent shell", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    #[command(about = "Start the HTTP command bridge")]
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        cors: Vec<String>,
    },
    #[command(about = "Start the interactive agent shell")]
    Chat {
        #[arg(short = 'p', long)]
        provider: Option<String>,
        #[arg(short = 'm', long)]
        model: Option<String>,
        #[arg(long = "base-url")]
        base_url: Option<String>,
        #[arg(long = "max-steps")]
        max_steps: Option<u32>,
    },
    #[command(about = "Print version")]
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "adbridge",
            "serve",
            "--port",
            "3100",
            "--cors",
            "https://a.example",
            "--cors",
            "https://b.example",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Serve {
                port,
                hostname,
                cors,
            }) => {
                assert_eq!(port, Some(3100));
                assert_eq!(hostname, None);
                assert_eq!(cors.len(), 2);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::try_parse_from([
            "adbridge",
            "chat",
            "--provider",
            "lmstudio",
            "--base-url",
            "http://10.0.0.2:1234/v1",
            "--max-steps",
            "4",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Chat {
                max_steps: Some(4),
                ..
            })
        ));
    }
}
