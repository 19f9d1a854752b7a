use clap::Parser;
use kube::Client;
use owo_colors::OwoColorize;

mod agent;
mod args;
mod broker;
mod cluster_mapping;
mod keys;
mod namespace_mapping;
mod pvc;
mod remote_cluster;
mod sync;
mod util;

use anyhow::Result;
use args::Cli;
use broker::ClusterBroker;

#[tokio::main]
async fn main() -> Result<()> {
    dr_syncer_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    dr_syncer_common::metrics::maybe_spawn_metrics_server();

    let client = Client::try_default().await?;
    let broker = ClusterBroker::new(client.clone());

    dr_syncer_common::signal_ready();

    println!("{}", "🌱 dr-syncer-controller starting".green());

    let cluster_mapping = tokio::spawn(cluster_mapping::run(client.clone(), broker.clone()));
    let namespace_mapping = tokio::spawn(namespace_mapping::run(client.clone(), broker.clone()));
    let remote_cluster = tokio::spawn(remote_cluster::run(
        client.clone(),
        broker.clone(),
        cli.agent_namespace.clone(),
    ));
    let credential_watch = tokio::spawn(broker::watch_credentials(client.clone(), broker.clone()));

    let (cluster_mapping, namespace_mapping, remote_cluster, credential_watch) =
        tokio::try_join!(cluster_mapping, namespace_mapping, remote_cluster, credential_watch)
            .expect("subsystem task panicked");
    cluster_mapping?;
    namespace_mapping?;
    remote_cluster?;
    credential_watch?;
    Ok(())
}
