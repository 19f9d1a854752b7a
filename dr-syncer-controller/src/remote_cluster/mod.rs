//! `RemoteCluster` health loop: on a fixed tick, issues/rotates SSH key
//! material per cluster (Key Authority, §4.3) and probes each node agent for
//! readiness and SSH reachability (Agent Health Prober, §4.2), writing the
//! rollup onto `RemoteClusterStatus`.
//!
//! Unlike `ClusterMapping`/`NamespaceMapping`, there's no `Controller::run`
//! loop here: agent health is inherently a polling concern (an SSH probe
//! isn't triggered by a watch event), so this is a plain ticker guarded by
//! the same leader-election lease the other two controllers use.

use dr_syncer_types::{PodAgentState, PvcSyncPhase, RemoteCluster, RemoteClusterStatus};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{Api, Client, ResourceExt};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::agent;
use crate::broker::ClusterBroker;
use crate::keys;
use crate::util::{Error, PROBE_INTERVAL, patch::patch_status};

const AGENT_LABEL_SELECTOR: &str = "app=dr-syncer-agent";
const KEY_SECRET_SUFFIX: &str = "dr-syncer-agent-key";
const AUTHORIZED_KEYS_SECRET_NAME: &str = "dr-syncer-agent-authorized-keys";
const ROTATED_AT_FIELD: &str = "rotated_at";

pub async fn run(client: Client, broker: ClusterBroker, agent_namespace: String) -> Result<(), Error> {
    println!("{}", "⚙️ Starting RemoteCluster health loop...".green());

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("dr-syncer-remote-cluster-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "dr-syncer-remote-cluster-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        dr_syncer_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    let mut tick = tokio::time::interval(PROBE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                continue;
            }
        };
        if !matches!(lease, LeaseLockResult::Acquired(_)) {
            continue;
        }

        let clusters: Api<RemoteCluster> = Api::all(client.clone());
        let list = match clusters.list(&Default::default()).await {
            Ok(list) => list,
            Err(e) => {
                eprintln!("failed to list RemoteClusters: {e}");
                continue;
            }
        };
        for cluster in list.items {
            let client = client.clone();
            let broker = broker.clone();
            let cluster = Arc::new(cluster);
            if let Err(e) = reconcile_one(client, broker, cluster.clone(), &agent_namespace).await {
                eprintln!(
                    "{}",
                    format!("RemoteCluster '{}' health probe failed: {e}", cluster.name_any()).red()
                );
            }
        }
    }
}

async fn reconcile_one(
    client: Client,
    broker: ClusterBroker,
    cluster: Arc<RemoteCluster>,
    agent_namespace: &str,
) -> Result<(), Error> {
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::UserInput("RemoteCluster must be namespaced".to_string()))?;
    let name = cluster.name_any();

    if !cluster.spec.pvc_sync.enabled {
        return Ok(());
    }

    let key_secret_name = format!("{name}-{KEY_SECRET_SUFFIX}");
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let existing_secret = match secrets.get(&key_secret_name).await {
        Ok(secret) => Some(secret),
        Err(kube::Error::Api(ae)) if ae.code == 404 => None,
        Err(e) => return Err(Error::from(e)),
    };
    let needs_rotation = existing_secret
        .as_ref()
        .map(|s| secret_age(s) >= keys::DEFAULT_ROTATION_INTERVAL)
        .unwrap_or(true);

    let target_client = broker
        .resolve(&name, &cluster.spec.credential_ref, &namespace)
        .await?;

    let private_key_pem = if needs_rotation {
        issue_and_store_key(&client, &target_client, &namespace, &name, &key_secret_name, agent_namespace).await?
    } else {
        let secret = existing_secret.expect("checked above: rotation only skipped when a secret exists");
        secret
            .data
            .as_ref()
            .and_then(|d| d.get("private_key"))
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            .ok_or_else(|| Error::CredentialMissing(name.clone()))?
    };
    let pods: Api<Pod> = Api::namespaced(target_client, agent_namespace);
    let list = pods.list(&kube::api::ListParams::default().labels(AGENT_LABEL_SELECTOR)).await?;
    let by_node = agent::group_pods_by_node(&list.items);

    let timeout = Duration::from_secs(cluster.spec.pvc_sync.health_check.ssh_timeout_seconds);
    let port = cluster.spec.pvc_sync.ssh_port;
    let mut states = Vec::with_capacity(by_node.len());
    for (node, pods) in &by_node {
        let Some(pod) = pods.first() else { continue };
        let pod_status = agent::compute_pod_status(pod);
        let host = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_else(|| node.clone());
        let key_pem = private_key_pem.clone();
        let host_for_probe = host.clone();
        let ssh_status = tokio::task::spawn_blocking(move || {
            agent::probe_ssh(&host_for_probe, port, &key_pem, timeout)
        })
        .await
        .map_err(|e| Error::Unreachable(node.clone(), e.to_string()))?;
        let ready = agent::node_ready(&pod_status, &ssh_status);
        states.push(PodAgentState {
            node: node.clone(),
            ready,
            last_heartbeat: ssh_status.last_check_time.clone(),
            pod_status,
            ssh_status,
            message: None,
        });
    }

    let (phase, ready_nodes, total_nodes, message) = agent::rollup(&states);

    patch_status(client, cluster.as_ref(), |status: &mut RemoteClusterStatus| {
        status.pvc_sync.phase = phase;
        status.pvc_sync.ready_nodes = ready_nodes;
        status.pvc_sync.total_nodes = total_nodes;
        status.pvc_sync.message = Some(message.clone());
        status.pvc_sync.nodes = states.clone();
        status.health = match phase {
            PvcSyncPhase::Running => dr_syncer_types::ClusterHealth::Healthy,
            PvcSyncPhase::Degraded => dr_syncer_types::ClusterHealth::Degraded,
            PvcSyncPhase::Failed => dr_syncer_types::ClusterHealth::Unhealthy,
            PvcSyncPhase::Initializing => dr_syncer_types::ClusterHealth::Unknown,
        };
        status.last_probe_time = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
            k8s_openapi::jiff::Timestamp::now(),
        ));
    })
    .await?;

    Ok(())
}

/// Reads the management cluster's key `Secret`'s age off its `rotated_at`
/// field, so a rotation decision doesn't depend on the object's own
/// `creationTimestamp` (unchanged across in-place key rotations).
fn secret_age(secret: &Secret) -> Duration {
    let Some(rotated_at) = secret
        .data
        .as_ref()
        .and_then(|d| d.get(ROTATED_AT_FIELD))
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
    else {
        return Duration::MAX;
    };
    let Ok(rotated_at) = chrono::DateTime::parse_from_rfc3339(&rotated_at) else {
        return Duration::MAX;
    };
    chrono::Utc::now()
        .signed_duration_since(rotated_at)
        .to_std()
        .unwrap_or(Duration::MAX)
}

/// Elects sole issuer of key material for `cluster_name`, persists the
/// private half in a `Secret` on the management cluster this loop can read
/// back on later ticks, and distributes the public half into the managed
/// cluster's node-agent `authorized_keys` store (§4.3). Another replica
/// losing the election simply reads the secret once this one writes it.
async fn issue_and_store_key(
    client: &Client,
    target_client: &Client,
    namespace: &str,
    cluster_name: &str,
    secret_name: &str,
    agent_namespace: &str,
) -> Result<String, Error> {
    let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    let Some(material) = keys::elect_and_issue(client.clone(), namespace, cluster_name, holder_id).await? else {
        return Err(Error::Unreachable(
            cluster_name.to_string(),
            "key issuance lease held by another replica; retrying next tick".to_string(),
        ));
    };
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(
            [
                ("private_key".to_string(), material.private_pem.clone()),
                ("public_key".to_string(), material.public_openssh.clone()),
                ("authorized_keys".to_string(), material.authorized_keys_line.clone()),
                (ROTATED_AT_FIELD.to_string(), chrono::Utc::now().to_rfc3339()),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    };
    secrets
        .patch(
            secret_name,
            &kube::api::PatchParams::apply(crate::util::MANAGER_NAME).force(),
            &kube::api::Patch::Apply(&secret),
        )
        .await?;

    distribute_authorized_key(target_client, agent_namespace, &material.authorized_keys_line).await?;

    Ok(material.private_pem)
}

/// Merges the newly issued public key into the managed cluster's
/// `authorized_keys` `Secret` so node agents started after this rotation
/// accept the new key without a separate distribution step (§4.3).
async fn distribute_authorized_key(
    target_client: &Client,
    agent_namespace: &str,
    new_line: &str,
) -> Result<(), Error> {
    let secrets: Api<Secret> = Api::namespaced(target_client.clone(), agent_namespace);
    let existing = match secrets.get(AUTHORIZED_KEYS_SECRET_NAME).await {
        Ok(secret) => secret
            .data
            .as_ref()
            .and_then(|d| d.get("authorized_keys"))
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            .unwrap_or_default(),
        Err(kube::Error::Api(ae)) if ae.code == 404 => String::new(),
        Err(e) => return Err(Error::from(e)),
    };
    let merged = keys::append_authorized_key(&existing, new_line);
    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(AUTHORIZED_KEYS_SECRET_NAME.to_string()),
            namespace: Some(agent_namespace.to_string()),
            ..Default::default()
        },
        string_data: Some([("authorized_keys".to_string(), merged)].into_iter().collect()),
        ..Default::default()
    };
    secrets
        .patch(
            AUTHORIZED_KEYS_SECRET_NAME,
            &kube::api::PatchParams::apply(crate::util::MANAGER_NAME).force(),
            &kube::api::Patch::Apply(&secret),
        )
        .await?;
    Ok(())
}
