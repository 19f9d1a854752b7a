use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

fn default_true() -> bool {
    true
}

fn default_ssh_port() -> u16 {
    2222
}

fn default_concurrency() -> u32 {
    4
}

fn default_health_interval_seconds() -> u64 {
    30
}

fn default_ssh_timeout_seconds() -> u64 {
    10
}

fn default_health_retries() -> u32 {
    3
}

fn default_health_retry_interval_seconds() -> u64 {
    5
}

fn default_connectivity_timeout_seconds() -> u64 {
    10
}

fn default_initial_backoff_seconds() -> u64 {
    5
}

fn default_max_backoff_seconds() -> u64 {
    300
}

fn default_backoff_multiplier_percent() -> u32 {
    200
}

fn default_max_retries() -> u32 {
    5
}

fn default_drain_timeout_seconds() -> u64 {
    30
}

fn default_force_delete_timeout_seconds() -> u64 {
    60
}

/// Per-node PVC-sync agent configuration carried by a [`RemoteCluster`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct PvcSyncHealthCheck {
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_ssh_timeout_seconds")]
    pub ssh_timeout_seconds: u64,
    #[serde(default = "default_health_retries")]
    pub retries: u32,
    #[serde(default = "default_health_retry_interval_seconds")]
    pub retry_interval_seconds: u64,
}

impl Default for PvcSyncHealthCheck {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval_seconds(),
            ssh_timeout_seconds: default_ssh_timeout_seconds(),
            retries: default_health_retries(),
            retry_interval_seconds: default_health_retry_interval_seconds(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct PvcSyncConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    pub image: String,
    #[serde(default)]
    pub health_check: PvcSyncHealthCheck,
}

impl Default for PvcSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ssh_port: default_ssh_port(),
            concurrency: default_concurrency(),
            image: String::new(),
            health_check: PvcSyncHealthCheck::default(),
        }
    }
}

/// A named handle to a managed cluster. Holds a reference to a credential
/// payload (see [`SyncCredential`]) stored in the management cluster.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1",
    kind = "RemoteCluster",
    plural = "remoteclusters",
    derive = "PartialEq",
    status = "RemoteClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.health\", \"name\": \"HEALTH\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.pvcSync.phase\", \"name\": \"PVCSYNC\", \"type\": \"string\" }"
)]
pub struct RemoteClusterSpec {
    pub credential_ref: String,
    #[serde(default)]
    pub default_schedule: Option<String>,
    #[serde(default)]
    pub default_resource_kinds: Vec<String>,
    #[serde(default)]
    pub pvc_sync: PvcSyncConfig,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ClusterHealth {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum PvcSyncPhase {
    #[default]
    Initializing,
    Running,
    Degraded,
    Failed,
}

impl fmt::Display for PvcSyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct PodStatusSummary {
    pub phase: Option<String>,
    pub ready: bool,
    pub restart_count: i32,
    pub last_transition_time: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct SshStatus {
    pub connected: bool,
    pub last_check_time: Option<Time>,
    pub error: Option<String>,
}

/// Per-node agent liveness/reachability, rolled up onto [`RemoteClusterStatus`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct PodAgentState {
    pub node: String,
    pub ready: bool,
    pub last_heartbeat: Option<Time>,
    pub pod_status: PodStatusSummary,
    pub ssh_status: SshStatus,
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct PvcSyncStatus {
    pub phase: PvcSyncPhase,
    #[serde(default)]
    pub ready_nodes: u32,
    #[serde(default)]
    pub total_nodes: u32,
    pub message: Option<String>,
    #[serde(default)]
    pub nodes: Vec<PodAgentState>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RemoteClusterStatus {
    pub health: ClusterHealth,
    #[serde(default)]
    pub pvc_sync: PvcSyncStatus,
    pub last_probe_time: Option<Time>,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

/// Opaque per-cluster credential payload, keyed by name and referenced from
/// `RemoteClusterSpec::credential_ref`. Modeled as its own kind so the
/// Cluster Broker can watch it independently of the `RemoteCluster` object.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1",
    kind = "SyncCredential",
    plural = "synccredentials",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
pub struct SyncCredentialSpec {
    /// Base64-encoded kubeconfig. Mutually exclusive with `server`+`token`.
    pub kubeconfig: Option<String>,
    pub server: Option<String>,
    pub token: Option<String>,
    pub ca_bundle: Option<String>,
}

/// Directed pair `(sourceCluster -> targetCluster)`. Its existence (and
/// `Verified` status) is the precondition for any [`NamespaceMapping`] that
/// references it.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1",
    kind = "ClusterMapping",
    plural = "clustermappings",
    derive = "PartialEq",
    status = "ClusterMappingStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
pub struct ClusterMappingSpec {
    pub source_cluster: String,
    pub target_cluster: String,
    #[serde(default = "default_connectivity_timeout_seconds")]
    pub connectivity_timeout_seconds: u64,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ClusterMappingPhase {
    #[default]
    Pending,
    Verified,
    Unreachable,
}

impl fmt::Display for ClusterMappingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ClusterMappingStatus {
    pub phase: ClusterMappingPhase,
    pub last_verified: Option<Time>,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ReplicationMode {
    #[default]
    Scheduled,
    Continuous,
    Manual,
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ContinuousConfig {
    /// Duration string (e.g. "30s"), parsed with `parse_duration`.
    pub background_sync_interval: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ImmutableHandling {
    #[default]
    NoChange,
    Recreate,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ImmutableResourceConfig {
    #[serde(default)]
    pub default_handling: ImmutableHandling,
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
    #[serde(default = "default_force_delete_timeout_seconds")]
    pub force_delete_timeout_seconds: u64,
}

impl Default for ImmutableResourceConfig {
    fn default() -> Self {
        Self {
            default_handling: ImmutableHandling::default(),
            drain_timeout_seconds: default_drain_timeout_seconds(),
            force_delete_timeout_seconds: default_force_delete_timeout_seconds(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct NameMapping {
    pub from: String,
    pub to: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct PvcConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub preserve_volume_attributes: bool,
    #[serde(default)]
    pub sync_persistent_volumes: bool,
    #[serde(default)]
    pub storage_class_mappings: Vec<NameMapping>,
    #[serde(default)]
    pub access_mode_mappings: Vec<NameMapping>,
    #[serde(default)]
    pub migrate_data: bool,
}

impl Default for PvcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            preserve_volume_attributes: false,
            sync_persistent_volumes: false,
            storage_class_mappings: Vec::new(),
            access_mode_mappings: Vec::new(),
            migrate_data: false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct IngressConfig {
    #[serde(default = "default_true")]
    pub preserve_annotations: bool,
    #[serde(default = "default_true")]
    pub preserve_tls: bool,
    #[serde(default = "default_true")]
    pub preserve_backends: bool,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            preserve_annotations: true,
            preserve_tls: true,
            preserve_backends: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_seconds")]
    pub initial_backoff_seconds: u64,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
    #[serde(default = "default_backoff_multiplier_percent")]
    pub backoff_multiplier_percent: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_seconds: default_initial_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
            backoff_multiplier_percent: default_backoff_multiplier_percent(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum OperationKind {
    Cutover,
    Failback,
}

/// The user's top-level declaration: maintain `destinationNamespace` in
/// `targetCluster` as a passive replica of `sourceNamespace` in
/// `sourceCluster`, per the [`ClusterMapping`] named by `cluster_mapping_ref`.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1",
    kind = "NamespaceMapping",
    plural = "namespacemappings",
    derive = "PartialEq",
    status = "NamespaceMappingStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.replicationMode\", \"name\": \"MODE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastSyncTime\", \"name\": \"LAST-SYNC\", \"type\": \"date\" }"
)]
pub struct NamespaceMappingSpec {
    pub cluster_mapping_ref: String,
    pub source_namespace: String,
    pub destination_namespace: String,
    #[serde(default)]
    pub replication_mode: ReplicationMode,
    pub schedule: Option<String>,
    pub continuous: Option<ContinuousConfig>,
    /// Requested resource kinds, or `["*"]` for the default set.
    #[serde(default)]
    pub resource_kinds: Vec<String>,
    #[serde(default)]
    pub scale_to_zero: bool,
    #[serde(default)]
    pub immutable_resource_config: ImmutableResourceConfig,
    #[serde(default)]
    pub pvc_config: PvcConfig,
    #[serde(default)]
    pub ingress_config: IngressConfig,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default)]
    pub paused: bool,
    /// Set by the operator (or the out-of-scope CLI) to request a cutover
    /// or failback on the next reconcile. Cleared once actioned.
    pub operation: Option<OperationKind>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, JsonSchema, Default)]
pub enum NamespaceMappingPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl FromStr for NamespaceMappingPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NamespaceMappingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct DeploymentScale {
    pub name: String,
    pub original_replicas: i32,
    pub last_synced_at: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct SyncStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Duration of the last sync, in seconds.
    pub last_duration_seconds: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RetryStatus {
    pub retries_remaining: u32,
    pub next_retry_time: Option<Time>,
    /// Backoff duration in seconds, for the *next* retry attempt.
    pub backoff_seconds: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct LastError {
    pub message: String,
    pub time: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct NamespaceMappingStatus {
    pub phase: NamespaceMappingPhase,
    pub last_sync_time: Option<Time>,
    pub next_sync_time: Option<Time>,
    /// Continuous mode only: timestamp of the last observed watch event.
    pub last_watch_event: Option<Time>,
    #[serde(default)]
    pub deployment_scales: Vec<DeploymentScale>,
    #[serde(default)]
    pub sync_stats: SyncStats,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub retry_status: Option<RetryStatus>,
    pub last_error: Option<LastError>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

/// The default set of resource kinds a `["*"]` or empty `resourceKinds`
/// expands to.
pub const DEFAULT_RESOURCE_KINDS: &[&str] = &[
    "configmaps",
    "secrets",
    "deployments",
    "services",
    "ingresses",
    "persistentvolumeclaims",
];

/// Normalizes a user-supplied resource kind token (singular/plural alias) to
/// its canonical plural form. Returns `None` for unrecognized kinds, which
/// callers should treat as "pass through to the dynamic/custom path".
pub fn normalize_resource_kind(kind: &str) -> Option<&'static str> {
    match kind.to_ascii_lowercase().as_str() {
        "configmap" | "configmaps" => Some("configmaps"),
        "secret" | "secrets" => Some("secrets"),
        "deployment" | "deployments" => Some("deployments"),
        "service" | "services" => Some("services"),
        "ingress" | "ingresses" => Some("ingresses"),
        "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" | "pvcs" => {
            Some("persistentvolumeclaims")
        }
        "persistentvolume" | "persistentvolumes" | "pv" | "pvs" => Some("persistentvolumes"),
        _ => None,
    }
}

/// Expands a mapping's requested `resourceKinds` list into canonical plural
/// kind names, per spec.md §8: empty and `["*"]` both expand to
/// [`DEFAULT_RESOURCE_KINDS`].
pub fn expand_resource_kinds(requested: &[String]) -> Vec<String> {
    if requested.is_empty() || requested.iter().any(|k| k == "*") {
        return DEFAULT_RESOURCE_KINDS.iter().map(|s| s.to_string()).collect();
    }
    let mut seen = BTreeMap::new();
    for kind in requested {
        let canonical = normalize_resource_kind(kind)
            .map(str::to_string)
            .unwrap_or_else(|| kind.to_ascii_lowercase());
        seen.insert(canonical, ());
    }
    seen.into_keys().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_wildcard_expand_to_defaults() {
        let empty = expand_resource_kinds(&[]);
        let wildcard = expand_resource_kinds(&["*".to_string()]);
        let mut expected: Vec<String> = DEFAULT_RESOURCE_KINDS.iter().map(|s| s.to_string()).collect();
        expected.sort();
        let mut empty_sorted = empty.clone();
        empty_sorted.sort();
        let mut wildcard_sorted = wildcard.clone();
        wildcard_sorted.sort();
        assert_eq!(empty_sorted, expected);
        assert_eq!(wildcard_sorted, expected);
    }

    #[test]
    fn aliases_normalize_to_canonical_plural() {
        let kinds = expand_resource_kinds(&["configmap".to_string(), "secret".to_string()]);
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["configmaps".to_string(), "secrets".to_string()]);
    }

    #[test]
    fn unrecognized_kind_passes_through_lowercased() {
        let kinds = expand_resource_kinds(&["MyCustomResource".to_string()]);
        assert_eq!(kinds, vec!["mycustomresource".to_string()]);
    }

    #[test]
    fn phase_from_str_round_trips() {
        for phase in [
            NamespaceMappingPhase::Pending,
            NamespaceMappingPhase::Running,
            NamespaceMappingPhase::Completed,
            NamespaceMappingPhase::Failed,
        ] {
            let s = phase.to_string();
            assert_eq!(s.parse::<NamespaceMappingPhase>().unwrap(), phase);
        }
    }
}
