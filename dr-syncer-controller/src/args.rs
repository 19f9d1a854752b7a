use clap::Parser;

/// `dr-syncer-controller` has a single long-running mode; most per-replica
/// identity (`NAMESPACE`, `POD_NAME`) is read directly from the downward API
/// by each subsystem's `run()`, matching the teacher's leader-election setup.
/// What's left here is what an operator would reasonably want on the command
/// line or in a Deployment's `env:` block.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Namespace node agents run in on each target cluster.
    #[arg(long, env = "DR_SYNCER_AGENT_NAMESPACE", default_value = "dr-syncer")]
    pub agent_namespace: String,
}
