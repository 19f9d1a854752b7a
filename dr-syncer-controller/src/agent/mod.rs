//! Agent Health Prober (§4.2): periodically probes each node agent pod for
//! readiness and SSH reachability, rolling results up to
//! `RemoteClusterStatus.pvcSync`.

use dr_syncer_types::{PodAgentState, PodStatusSummary, PvcSyncPhase, SshStatus};
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashMap;
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use crate::util::Error;

/// Expected response to the smoke-test command (§6).
pub const SMOKE_TEST_RESPONSE: &str = "dr-syncer-ssh-test\n";
/// Expected response to the proxy smoke-test command (§6).
pub const PROXY_TEST_RESPONSE: &str = "SSH proxy connection successful\n";

/// Buckets pods by the node they're scheduled on (step 1 of §4.2).
pub fn group_pods_by_node(pods: &[Pod]) -> HashMap<String, Vec<&Pod>> {
    let mut by_node: HashMap<String, Vec<&Pod>> = HashMap::new();
    for pod in pods {
        if let Some(node) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) {
            by_node.entry(node).or_default().push(pod);
        }
    }
    by_node
}

/// Computes `podStatus` (step 2 of §4.2): phase, ready condition, total
/// container-restart count, latest condition-transition time. Grounded on
/// the same field-by-field `Pod` inspection the teacher's
/// `determine_container_action`/`pod_is_ready` use.
pub fn compute_pod_status(pod: &Pod) -> PodStatusSummary {
    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.clone());
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True");
    let restart_count = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0);
    let last_transition_time = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().filter_map(|c| c.last_transition_time.clone()).max_by_key(|t| t.0));

    PodStatusSummary {
        phase,
        ready,
        restart_count,
        last_transition_time,
    }
}

/// Runs the fixed smoke-test command over an already-handshaken SSH session
/// and checks the response matches exactly (§4.2 step 3, §6).
pub fn run_ssh_command(
    host: &str,
    port: u16,
    username: &str,
    private_key_pem: &str,
    command: &str,
    timeout: Duration,
) -> Result<String, Error> {
    let tcp = TcpStream::connect((host, port))?;
    tcp.set_read_timeout(Some(timeout))?;
    tcp.set_write_timeout(Some(timeout))?;
    let mut session = ssh2::Session::new()?;
    session.set_timeout(timeout.as_millis() as u32);
    session.set_tcp_stream(tcp);
    session.handshake()?;
    // Host-key verification intentionally disabled (InsecureIgnoreHostKey):
    // destination pods are ephemeral, see spec's open question in DESIGN.md.
    session.userauth_pubkey_memory(username, None, private_key_pem, None)?;
    if !session.authenticated() {
        return Err(Error::Unreachable(
            host.to_string(),
            "ssh authentication failed".to_string(),
        ));
    }
    let mut channel = session.channel_session()?;
    channel.exec(command)?;
    let mut output = String::new();
    channel.read_to_string(&mut output)?;
    channel.wait_close()?;
    Ok(output)
}

/// Checks both the primary smoke test and the proxy smoke test (§4.2 step 3)
/// and produces the resulting [`SshStatus`]. Retries are handled by the
/// caller via `dr_syncer_common::backoff`.
pub fn probe_ssh(
    host: &str,
    port: u16,
    private_key_pem: &str,
    timeout: Duration,
) -> SshStatus {
    let now = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
        k8s_openapi::jiff::Timestamp::now(),
    ));
    let smoke = run_ssh_command(host, port, "syncer", private_key_pem, "echo dr-syncer-ssh-test", timeout);
    match smoke {
        Ok(out) if out == SMOKE_TEST_RESPONSE => {
            let proxy = run_ssh_command(
                host,
                port,
                "syncer",
                private_key_pem,
                "ssh-command-handler.sh test-connection",
                timeout,
            );
            match proxy {
                Ok(out) if out == PROXY_TEST_RESPONSE => SshStatus {
                    connected: true,
                    last_check_time: now,
                    error: None,
                },
                Ok(out) => SshStatus {
                    connected: false,
                    last_check_time: now,
                    error: Some(format!("unexpected proxy response: {out:?}")),
                },
                Err(e) => SshStatus {
                    connected: false,
                    last_check_time: now,
                    error: Some(e.to_string()),
                },
            }
        }
        Ok(out) => SshStatus {
            connected: false,
            last_check_time: now,
            error: Some(format!("unexpected smoke-test response: {out:?}")),
        },
        Err(e) => SshStatus {
            connected: false,
            last_check_time: now,
            error: Some(e.to_string()),
        },
    }
}

/// Rolls up per-node agent states into the aggregate `pvcSync.phase` and a
/// `k/n ready` message (§4.2 rollup). A node is ready iff `podStatus.ready &&
/// sshStatus.connected` (step 5).
pub fn rollup(states: &[PodAgentState]) -> (PvcSyncPhase, u32, u32, String) {
    let total = states.len() as u32;
    let ready = states.iter().filter(|s| s.ready).count() as u32;
    let phase = if total == 0 {
        PvcSyncPhase::Initializing
    } else if ready == total {
        PvcSyncPhase::Running
    } else if ready > 0 {
        PvcSyncPhase::Degraded
    } else {
        PvcSyncPhase::Failed
    };
    (phase, ready, total, format!("{ready}/{total} ready"))
}

/// A node is ready iff its pod is ready and its SSH check is connected
/// (§4.2 step 5).
pub fn node_ready(pod_status: &PodStatusSummary, ssh_status: &SshStatus) -> bool {
    pod_status.ready && ssh_status.connected
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_syncer_types::PodStatusSummary;

    fn summary(ready: bool) -> PodStatusSummary {
        PodStatusSummary {
            phase: Some("Running".to_string()),
            ready,
            restart_count: 0,
            last_transition_time: None,
        }
    }

    fn ssh(connected: bool) -> SshStatus {
        SshStatus {
            connected,
            last_check_time: None,
            error: None,
        }
    }

    #[test]
    fn node_ready_requires_both_pod_and_ssh() {
        assert!(node_ready(&summary(true), &ssh(true)));
        assert!(!node_ready(&summary(true), &ssh(false)));
        assert!(!node_ready(&summary(false), &ssh(true)));
    }

    fn state(ready: bool) -> PodAgentState {
        PodAgentState {
            node: "n".to_string(),
            ready,
            last_heartbeat: None,
            pod_status: summary(ready),
            ssh_status: ssh(ready),
            message: None,
        }
    }

    #[test]
    fn rollup_running_when_all_ready() {
        let (phase, ready, total, msg) = rollup(&[state(true), state(true)]);
        assert_eq!(phase, PvcSyncPhase::Running);
        assert_eq!((ready, total), (2, 2));
        assert_eq!(msg, "2/2 ready");
    }

    #[test]
    fn rollup_degraded_when_some_ready() {
        let (phase, ..) = rollup(&[state(true), state(false)]);
        assert_eq!(phase, PvcSyncPhase::Degraded);
    }

    #[test]
    fn rollup_failed_when_none_ready() {
        let (phase, ..) = rollup(&[state(false), state(false)]);
        assert_eq!(phase, PvcSyncPhase::Failed);
    }

    #[test]
    fn rollup_initializing_when_no_nodes_known() {
        let (phase, ready, total, _) = rollup(&[]);
        assert_eq!(phase, PvcSyncPhase::Initializing);
        assert_eq!((ready, total), (0, 0));
    }
}
