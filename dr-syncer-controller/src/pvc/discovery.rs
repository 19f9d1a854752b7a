//! Volume Discovery (§4.4): per node, maps bound volume claims to on-disk
//! paths (host, local, CSI).

use k8s_openapi::api::core::v1::{Pod, PersistentVolume, PersistentVolumeClaim};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum VolumeKind {
    HostPath,
    Local,
    Csi(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeInfo {
    pub claim_name: String,
    pub claim_namespace: String,
    pub node: String,
    pub host_path: String,
    pub volume_kind: VolumeKind,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
    pub capacity: Option<String>,
    pub bound_pod_names: Vec<String>,
}

/// Computes the on-disk path of a CSI-backed volume (§4.4):
/// `{kubeletRoot}/pods/{podUID}/volumes/kubernetes.io~csi/{driver}/{handle}`.
pub fn csi_host_path(kubelet_root: &str, pod_uid: &str, driver: &str, handle: &str) -> String {
    format!("{kubelet_root}/pods/{pod_uid}/volumes/kubernetes.io~csi/{driver}/{handle}")
}

/// Discovers all claim-backed volumes bound to pods scheduled on `node`.
/// Multiple pods binding the same claim are folded into one `VolumeInfo`
/// with `boundPodNames` accumulated (§4.4).
pub fn discover_volumes(
    pods: &[Pod],
    node: &str,
    kubelet_root: &str,
    claims: &HashMap<String, PersistentVolumeClaim>,
    volumes: &HashMap<String, PersistentVolume>,
) -> Vec<VolumeInfo> {
    let mut by_claim: HashMap<String, VolumeInfo> = HashMap::new();

    for pod in pods {
        if pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) != Some(node) {
            continue;
        }
        let pod_uid = pod.metadata.uid.clone().unwrap_or_default();
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();

        let Some(pod_volumes) = pod.spec.as_ref().and_then(|s| s.volumes.as_ref()) else {
            continue;
        };
        for volume in pod_volumes {
            let Some(pvc_source) = &volume.persistent_volume_claim else {
                continue;
            };
            let claim_name = pvc_source.claim_name.clone();
            let Some(claim) = claims.get(&claim_name) else {
                continue;
            };
            let storage_class = claim.spec.as_ref().and_then(|s| s.storage_class_name.clone());
            let access_modes = claim
                .spec
                .as_ref()
                .and_then(|s| s.access_modes.clone())
                .unwrap_or_default();
            let capacity = claim
                .status
                .as_ref()
                .and_then(|s| s.capacity.as_ref())
                .and_then(|c| c.get("storage"))
                .map(|q| q.0.clone());

            let volume_name = claim.spec.as_ref().and_then(|s| s.volume_name.clone());
            let Some((host_path, volume_kind)) =
                volume_name.as_deref().and_then(|vn| volumes.get(vn)).and_then(|pv| {
                    let spec = pv.spec.as_ref()?;
                    if let Some(hp) = &spec.host_path {
                        Some((hp.path.clone(), VolumeKind::HostPath))
                    } else if let Some(local) = &spec.local {
                        Some((local.path.clone(), VolumeKind::Local))
                    } else if let Some(csi) = &spec.csi {
                        Some((
                            csi_host_path(kubelet_root, &pod_uid, &csi.driver, &csi.volume_handle),
                            VolumeKind::Csi(csi.driver.clone()),
                        ))
                    } else {
                        None
                    }
                })
            else {
                // Other volume kinds are skipped with a log line (§4.4).
                eprintln!("volume discovery: skipping claim '{claim_name}' with unsupported or unbound volume kind");
                continue;
            };

            by_claim
                .entry(claim_name.clone())
                .and_modify(|info| info.bound_pod_names.push(pod_name.clone()))
                .or_insert(VolumeInfo {
                    claim_name: claim_name.clone(),
                    claim_namespace: namespace.clone(),
                    node: node.to_string(),
                    host_path,
                    volume_kind,
                    storage_class,
                    access_modes,
                    capacity,
                    bound_pod_names: vec![pod_name.clone()],
                });
        }
    }

    by_claim.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csi_path_follows_kubelet_layout() {
        assert_eq!(
            csi_host_path("/var/lib/kubelet", "abc-123", "ebs.csi.aws.com", "vol-001"),
            "/var/lib/kubelet/pods/abc-123/volumes/kubernetes.io~csi/ebs.csi.aws.com/vol-001"
        );
    }
}
