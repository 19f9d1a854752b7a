use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port the SSH command server listens on.
    #[arg(long, env = "DR_SYNCER_AGENT_SSH_PORT", default_value_t = 2222)]
    pub ssh_port: u16,

    /// Path to the host's SSH private key (PEM). Generated on first start if
    /// missing, since an agent's host identity doesn't need to be stable
    /// across restarts (the controller never pins it — see DESIGN.md).
    #[arg(long, env = "DR_SYNCER_AGENT_HOST_KEY", default_value = "/etc/dr-syncer/ssh_host_key")]
    pub host_key_path: String,

    /// Path to the authorized public key (OpenSSH format) the Key Authority
    /// wrote for this node.
    #[arg(long, env = "DR_SYNCER_AGENT_AUTHORIZED_KEY", default_value = "/etc/dr-syncer/authorized_key")]
    pub authorized_key_path: String,
}
