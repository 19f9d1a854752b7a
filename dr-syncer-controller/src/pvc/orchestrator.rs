//! Data-Mover Coordinator orchestration (§4.5): wires `pvc::discovery` and
//! `pvc::coordinator`'s pure helpers into an actual migration pass, invoked
//! once per sync when `pvcConfig.migrateData` is set.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dr_syncer_types::NamespaceMapping;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::{Api, Client, ResourceExt};

use super::coordinator::{self, CoordinatorConfig, CopyRequest};
use super::discovery::{self, VolumeInfo};
use crate::sync::transform::remap_access_modes;
use crate::util::Error;

const DEFAULT_KUBELET_ROOT: &str = "/var/lib/kubelet";
const DEFAULT_COPY_DRIVER_PATH: &str = "/usr/local/bin/pv-migrate";
const DEFAULT_DEST_ROOT: &str = "/var/lib/dr-syncer/volumes";

fn default_config() -> CoordinatorConfig {
    CoordinatorConfig {
        concurrency: 4,
        copy_driver_path: DEFAULT_COPY_DRIVER_PATH.to_string(),
        max_retries: 3,
        initial_backoff: Duration::from_secs(2),
        max_backoff: Duration::from_secs(30),
        backoff_multiplier_percent: 200,
    }
}

fn node_label_map(nodes: &[Node]) -> HashMap<String, BTreeMap<String, String>> {
    nodes
        .iter()
        .map(|n| (n.name_any(), n.metadata.labels.clone().unwrap_or_default()))
        .collect()
}

/// Discovers every claim-backed volume in the source namespace, matches each
/// to a target-cluster node by affinity, remaps storage class/access modes
/// per the mapping config, and drains the copy set through the bounded
/// worker pool (§4.5 steps 1-4).
pub async fn migrate(source: Client, target: Client, instance: &NamespaceMapping) -> Result<(), Error> {
    let source_namespace = &instance.spec.source_namespace;
    let pvc_config = instance.spec.pvc_config.clone();

    let source_pods: Api<Pod> = Api::namespaced(source.clone(), source_namespace);
    let source_claims: Api<PersistentVolumeClaim> = Api::namespaced(source.clone(), source_namespace);
    let source_volumes: Api<PersistentVolume> = Api::all(source.clone());
    let source_nodes: Api<Node> = Api::all(source.clone());
    let target_nodes: Api<Node> = Api::all(target.clone());

    let pods = source_pods.list(&Default::default()).await?.items;
    let claims: HashMap<String, PersistentVolumeClaim> = source_claims
        .list(&Default::default())
        .await?
        .items
        .into_iter()
        .map(|c| (c.name_any(), c))
        .collect();
    let volumes: HashMap<String, PersistentVolume> = source_volumes
        .list(&Default::default())
        .await?
        .items
        .into_iter()
        .map(|v| (v.name_any(), v))
        .collect();

    let source_node_labels = node_label_map(&source_nodes.list(&Default::default()).await?.items);
    let target_candidates: Vec<(String, BTreeMap<String, String>)> =
        node_label_map(&target_nodes.list(&Default::default()).await?.items)
            .into_iter()
            .collect();

    let mut all_volumes = Vec::new();
    let mut placement: HashMap<(String, String), (String, String)> = HashMap::new();

    for node in source_node_labels.keys() {
        let mut found = discovery::discover_volumes(&pods, node, DEFAULT_KUBELET_ROOT, &claims, &volumes);
        if found.is_empty() {
            continue;
        }
        let source_labels = source_node_labels.get(node).cloned().unwrap_or_default();
        let Some(target_node) = coordinator::match_node(&source_labels, &target_candidates) else {
            eprintln!("data-mover: no candidate target node for source node '{node}'; skipping its volumes");
            continue;
        };
        let target_node = target_node.to_string();
        for info in found.iter_mut() {
            if let Some(class) =
                coordinator::remap_storage_class(info.storage_class.as_deref(), &pvc_config.storage_class_mappings)
            {
                info.storage_class = Some(class);
            }
            remap_access_modes(&mut info.access_modes, &pvc_config.access_mode_mappings);
        }
        for info in found {
            let dest_path = format!("{DEFAULT_DEST_ROOT}/{}/{}", info.claim_namespace, info.claim_name);
            placement.insert((info.claim_namespace.clone(), info.claim_name.clone()), (target_node.clone(), dest_path));
            all_volumes.push(info);
        }
    }

    if all_volumes.is_empty() {
        return Ok(());
    }

    let config = Arc::new(default_config());
    let placement = Arc::new(placement);
    let preserve = pvc_config.preserve_volume_attributes;
    let concurrency = config.concurrency;

    coordinator::drain(all_volumes, concurrency, move |volume| {
        let config = config.clone();
        let placement = placement.clone();
        async move {
            let key = (volume.claim_namespace.clone(), volume.claim_name.clone());
            let Some((target_node, dest_path)) = placement.get(&key).cloned() else {
                return;
            };
            let req = CopyRequest {
                volume,
                target_node,
                dest_path,
                archive: true,
                delete: false,
                compress: preserve,
            };
            if let Err(e) = coordinator::run_copy(&config, &req).await {
                eprintln!(
                    "data-mover: copy failed for claim '{}/{}': {e}",
                    req.volume.claim_namespace, req.volume.claim_name
                );
            }
        }
    })
    .await;

    Ok(())
}
