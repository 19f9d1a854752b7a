use clap::Parser;
use owo_colors::OwoColorize;
use std::path::Path;

mod args;
mod command;
mod hostkey;
mod server;

use args::Cli;
use server::AgentServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dr_syncer_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    dr_syncer_common::metrics::maybe_spawn_metrics_server();

    let host_key_pem = hostkey::load_or_generate(Path::new(&cli.host_key_path))?;
    let host_key = russh::keys::PrivateKey::from_openssh(&host_key_pem)?;
    let authorized_key = hostkey::load_authorized_key(Path::new(&cli.authorized_key_path))?;

    dr_syncer_common::signal_ready();

    println!(
        "{}{}",
        "🔌 dr-syncer-agent listening on port ".green(),
        cli.ssh_port.to_string().green().dimmed(),
    );

    let agent = AgentServer::new(authorized_key);
    tokio::select! {
        result = agent.run(host_key, cli.ssh_port) => result,
        _ = dr_syncer_common::shutdown::shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}
