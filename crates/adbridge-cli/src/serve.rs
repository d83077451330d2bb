use std::net::SocketAddr;
use std::sync::Arc;

use adbridge_config::Config;
use adbridge_core::{AdbCommands, MemoryStore, ProcessRunner};
use adbridge_server::ServerState;

pub(crate) async fn run_serve_command(
    config: &Config,
    port: Option<u16>,
    hostname: Option<String>,
    cors: Vec<String>,
) -> anyhow::Result<()> {
    let port = port.unwrap_or_else(|| config.port());
    let hostname = hostname.unwrap_or_else(|| config.hostname());
    let mut origins = config.cors_origins();
    origins.extend(cors);

    let runner = ProcessRunner::with_timeout_secs(config.command_timeout_secs());
    let commands = AdbCommands::new(config.adb_path(), config.emulator_path());
    let state = Arc::new(ServerState::new(
        Arc::new(runner),
        commands,
        MemoryStore::new(),
    ));

    let addr: SocketAddr = format!("{}:{}", hostname, port).parse()?;
    println!("Starting adbridge server on http://{}", addr);
    adbridge_server::run_server(addr, state, origins).await
}
