//! Data-Mover Coordinator (§4.5): matches source volumes to destination
//! nodes, provisions claims and sync pods, and drives copies with
//! retry/backoff.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use dr_syncer_types::NameMapping;

use super::discovery::VolumeInfo;
use crate::util::Error;

/// The label keys checked, in order, for node-affinity matching (§4.5 step 1).
pub const AFFINITY_KEYS: &[&str] = &[
    "kubernetes.io/arch",
    "kubernetes.io/os",
    "kubernetes.io/hostname",
    "topology.kubernetes.io/zone",
    "topology.kubernetes.io/region",
    "node.kubernetes.io/instance-type",
];

/// Picks a target node whose labels agree with `source_labels` on the first
/// matching affinity key; falls back to the first available node with a
/// warning if none match (§4.5 step 1).
pub fn match_node<'a>(
    source_labels: &BTreeMap<String, String>,
    candidates: &'a [(String, BTreeMap<String, String>)],
) -> Option<&'a str> {
    if candidates.is_empty() {
        return None;
    }
    for key in AFFINITY_KEYS {
        if let Some(source_value) = source_labels.get(*key) {
            if let Some((name, _)) = candidates
                .iter()
                .find(|(_, labels)| labels.get(*key) == Some(source_value))
            {
                return Some(name);
            }
        }
    }
    eprintln!("data-mover: no affinity match for source labels; falling back to first available node");
    Some(&candidates[0].0)
}

/// Decides whether the sync pod may run on any node (RWX) or must be pinned
/// to the matched node (RWO) — §4.5 step 3.
pub fn sync_pod_can_float(access_modes: &[String]) -> bool {
    access_modes.iter().any(|m| m == "ReadWriteMany")
}

/// Decides whether an existing destination claim's storage request must be
/// patched upward. Never shrinks (§4.5 step 2).
pub fn should_patch_claim_size(existing_bytes: u64, desired_bytes: u64) -> Option<u64> {
    if desired_bytes > existing_bytes {
        Some(desired_bytes)
    } else {
        None
    }
}

/// Applies a `from -> to` storage-class remapping, falling back to the
/// source's own class when no mapping entry matches (§4.6 invariant 2).
pub fn remap_storage_class(
    source_class: Option<&str>,
    mappings: &[NameMapping],
) -> Option<String> {
    let source_class = source_class?;
    mappings
        .iter()
        .find(|m| m.from == source_class)
        .map(|m| m.to.clone())
        .or_else(|| Some(source_class.to_string()))
}

/// A fingerprint identifying one `(sourceClaim, destinationClaim, epoch)`
/// copy job, so a volume copy job runs at most once per fingerprint (§3
/// invariant) and the sync-pod name is deterministic (§4.5 ordering).
pub fn copy_fingerprint(source_claim: &str, dest_claim: &str, epoch: u64) -> String {
    format!("sync-{source_claim}-{dest_claim}-{epoch}")
}

pub struct CopyRequest {
    pub volume: VolumeInfo,
    pub target_node: String,
    pub dest_path: String,
    pub archive: bool,
    pub delete: bool,
    pub compress: bool,
}

pub struct CoordinatorConfig {
    pub concurrency: usize,
    pub copy_driver_path: String,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier_percent: u32,
}

/// Invokes the external copy driver (a `pv-migrate`-compatible binary, §6)
/// with `{sourcePath}/` (trailing slash for content semantics) and
/// `syncer@{targetNode}:{destPath}`.
pub async fn run_copy(config: &CoordinatorConfig, req: &CopyRequest) -> Result<(), Error> {
    let source_arg = format!("{}/", req.volume.host_path);
    let dest_arg = format!("syncer@{}:{}", req.target_node, req.dest_path);

    let mut attempt = 0u32;
    let mut backoff = config.initial_backoff;
    loop {
        let mut cmd = tokio::process::Command::new(&config.copy_driver_path);
        cmd.arg(&source_arg).arg(&dest_arg);
        if req.archive {
            cmd.arg("--archive");
        }
        if req.delete {
            cmd.arg("--delete");
        }
        if req.compress {
            cmd.arg("--compress");
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());

        let output = cmd.output().await?;
        if output.status.success() {
            return Ok(());
        }
        attempt += 1;
        if attempt >= config.max_retries {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::RetryExhausted(format!(
                "copy driver failed after {attempt} attempts: {stderr}"
            )));
        }
        tokio::time::sleep(backoff).await;
        backoff = dr_syncer_common::backoff::grow_backoff(
            backoff,
            config.backoff_multiplier_percent,
            config.max_backoff,
        );
    }
}

/// Runs a bounded worker pool over `items`, invoking `process` for each.
/// Workers are not synchronized against each other; claim identity is the
/// unit of serialization via the caller's fingerprinting (§4.5 ordering).
pub async fn drain<F, Fut>(items: Vec<VolumeInfo>, concurrency: usize, process: F)
where
    F: Fn(VolumeInfo) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let process = Arc::new(process);
    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let process = process.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            process(item).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn matches_on_first_agreeing_key() {
        let source = labels(&[("kubernetes.io/arch", "amd64"), ("topology.kubernetes.io/zone", "us-east-1a")]);
        let candidates = vec![
            ("node-a".to_string(), labels(&[("kubernetes.io/arch", "arm64")])),
            ("node-b".to_string(), labels(&[("kubernetes.io/arch", "amd64")])),
        ];
        assert_eq!(match_node(&source, &candidates), Some("node-b"));
    }

    #[test]
    fn falls_back_to_first_node_when_no_match() {
        let source = labels(&[("kubernetes.io/arch", "amd64")]);
        let candidates = vec![
            ("node-a".to_string(), labels(&[("kubernetes.io/arch", "arm64")])),
            ("node-b".to_string(), labels(&[("kubernetes.io/arch", "arm64")])),
        ];
        assert_eq!(match_node(&source, &candidates), Some("node-a"));
    }

    #[test]
    fn rwx_claims_can_float_rwo_cannot() {
        assert!(sync_pod_can_float(&["ReadWriteMany".to_string()]));
        assert!(!sync_pod_can_float(&["ReadWriteOnce".to_string()]));
    }

    #[test]
    fn claim_size_never_shrinks() {
        assert_eq!(should_patch_claim_size(1_000, 2_000), Some(2_000));
        assert_eq!(should_patch_claim_size(2_000, 1_000), None);
        assert_eq!(should_patch_claim_size(1_000, 1_000), None);
    }

    #[test]
    fn storage_class_remaps_known_entries_and_passes_through_others() {
        let mappings = vec![NameMapping {
            from: "do-block-storage".to_string(),
            to: "do-block-storage-retain".to_string(),
        }];
        assert_eq!(
            remap_storage_class(Some("do-block-storage"), &mappings),
            Some("do-block-storage-retain".to_string())
        );
        assert_eq!(
            remap_storage_class(Some("other-class"), &mappings),
            Some("other-class".to_string())
        );
        assert_eq!(remap_storage_class(None, &mappings), None);
    }

    #[test]
    fn fingerprint_is_deterministic_per_epoch() {
        assert_eq!(copy_fingerprint("src", "dst", 1), "sync-src-dst-1");
        assert_ne!(copy_fingerprint("src", "dst", 1), copy_fingerprint("src", "dst", 2));
    }
}
