pub mod backoff;
pub mod colors;
pub mod metrics;
pub mod shutdown;

/// Well-known annotation keys applied to objects this system manages.
pub mod annotations {
    pub const MANAGED_BY: &str = "dr-syncer.io/managed-by";
    pub const SPEC_HASH: &str = "dr-syncer.io/spec-hash";
    /// Original replica count recorded before scaling a Deployment-like
    /// object to zero, so cutover/failback can restore it. See spec.md §3
    /// (Invariants) and §4.6.
    pub const ORIGINAL_REPLICAS: &str = "dr-syncer.io/original-replicas";
    pub const SOURCE_CLUSTER: &str = "dr-syncer.io/source-cluster";
    pub const SYNC_NOW: &str = "dr-syncer.io/sync-now";
}

/// Label applied to every destination object this system writes, so cleanup
/// on [`NamespaceMapping`] deletion can select by label (spec.md §3
/// Lifecycles).
pub const MANAGEMENT_LABEL: &str = "dr-syncer.io/managed";

pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("failed to write readiness file");
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}
